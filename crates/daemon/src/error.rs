// Engine error taxonomy.

use crate::llm::GenerationError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A precondition on the turn was violated (missing artifact, bad highlight, ...).
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// Generation, search or scrape failed or timed out.
    #[error("upstream service error: {message}")]
    Upstream { message: String, retryable: bool },
    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
    #[error("no operation could be routed for this turn")]
    Routing,
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn upstream(message: impl Into<String>, retryable: bool) -> Self {
        Self::Upstream { message: message.into(), retryable }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { retryable: true, .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Validation(message) => Self::Validation(message),
            StoreError::Backend(error) => Self::Storage(error),
        }
    }
}

impl From<GenerationError> for EngineError {
    fn from(error: GenerationError) -> Self {
        let retryable = error.is_retryable();
        Self::Upstream { message: error.to_string(), retryable }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_category() {
        let not_found: EngineError = StoreError::not_found("thread", "t-1").into();
        assert!(matches!(not_found, EngineError::NotFound { entity: "thread", .. }));

        let invalid: EngineError = StoreError::Validation("bad".into()).into();
        assert!(matches!(invalid, EngineError::Validation(_)));

        let backend: EngineError = StoreError::Backend(anyhow::anyhow!("disk gone")).into();
        assert!(backend.to_string().contains("disk gone"));
    }

    #[test]
    fn generation_timeouts_are_retryable() {
        let error: EngineError = GenerationError::Timeout.into();
        assert!(error.is_retryable());

        let error: EngineError = GenerationError::InputTooLong.into();
        assert!(!error.is_retryable());
    }
}
