// Generation service abstraction: streamed chunks, one-shot calls, and the
// helpers that normalize responses before they reach a handler.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

/// Errors reported by a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,
    #[error("input exceeds the model context window")]
    InputTooLong,
    #[error("generation stream aborted: {0}")]
    Aborted(String),
    #[error("generation service error: {0}")]
    Service(String),
    #[error("generation returned an empty response")]
    EmptyResponse,
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Aborted(_) | Self::Service(_))
    }
}

/// One streamed piece of output. Providers emit either plain text or an
/// ordered list of fragments; both normalize to a single string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text(String),
    Fragments(Vec<String>),
}

impl StreamChunk {
    fn push_onto(self, out: &mut String) {
        match self {
            Self::Text(text) => out.push_str(&text),
            Self::Fragments(fragments) => fragments.iter().for_each(|f| out.push_str(f)),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, GenerationError>> + Send>>;

pub type GenerationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, GenerationError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Short label for logs (`generate`, `follow_up`, `title`, ...).
    pub purpose: &'static str,
    pub system: String,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(purpose: &'static str, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self { purpose, system: system.into(), prompt: prompt.into() }
    }
}

impl Display for GenerationRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} prompt bytes)", self.purpose, self.system.len() + self.prompt.len())
    }
}

/// Trait for calling the language model.
///
/// Production wires an HTTP client; tests inject a scripted mock that
/// records every request.
pub trait GenerationClient: Send + Sync {
    /// Start a streamed completion.
    fn stream(&self, request: GenerationRequest) -> ChunkStream;

    /// One-shot completion. Defaults to draining [`Self::stream`].
    fn invoke(&self, request: GenerationRequest) -> GenerationFuture<'_> {
        let stream = self.stream(request);
        Box::pin(drain(stream))
    }
}

async fn drain(mut stream: ChunkStream) -> Result<String, GenerationError> {
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        chunk?.push_onto(&mut out);
    }
    Ok(out)
}

/// Drain a stream into one string under a deadline. Any error or a timeout
/// discards everything received so far.
pub async fn collect_stream(stream: ChunkStream, limit: Duration) -> Result<String, GenerationError> {
    match tokio::time::timeout(limit, drain(stream)).await {
        Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::EmptyResponse),
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "generation stream timed out");
            Err(GenerationError::Timeout)
        }
    }
}

/// Stream `request` through `client` and collect it with [`collect_stream`].
pub async fn generate_text(
    client: &dyn GenerationClient,
    request: GenerationRequest,
    limit: Duration,
) -> Result<String, GenerationError> {
    debug!(request = %request, "starting generation");
    collect_stream(client.stream(request), limit).await
}

/// Run a one-shot call under a deadline.
pub async fn invoke_with_timeout(
    client: &dyn GenerationClient,
    request: GenerationRequest,
    limit: Duration,
) -> Result<String, GenerationError> {
    debug!(request = %request, "invoking generation");
    tokio::time::timeout(limit, client.invoke(request))
        .await
        .unwrap_or(Err(GenerationError::Timeout))
}

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Split a leading `<think>…</think>` block off a response.
///
/// Returns `(reasoning, visible)`. Without a leading, closed block the
/// response is returned untouched.
pub fn split_thinking(response: &str) -> (Option<String>, String) {
    let trimmed = response.trim_start();
    let Some(rest) = trimmed.strip_prefix(THINK_OPEN) else {
        return (None, response.to_owned());
    };
    let Some(close) = rest.find(THINK_CLOSE) else {
        return (None, response.to_owned());
    };
    let reasoning = rest[..close].trim().to_owned();
    let visible = rest[close + THINK_CLOSE.len()..].trim_start().to_owned();
    (Some(reasoning).filter(|r| !r.is_empty()), visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(items: Vec<Result<StreamChunk, GenerationError>>) -> ChunkStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn text_and_fragments_normalize_in_order() {
        let collected = collect_stream(
            chunks(vec![
                Ok(StreamChunk::Text("Hello".into())),
                Ok(StreamChunk::Fragments(vec![", ".into(), "wor".into()])),
                Ok(StreamChunk::Text("ld".into())),
            ]),
            Duration::from_secs(1),
        )
        .await
        .expect("stream should collect");
        assert_eq!(collected, "Hello, world");
    }

    #[tokio::test]
    async fn mid_stream_error_discards_partial_output() {
        let error = collect_stream(
            chunks(vec![
                Ok(StreamChunk::Text("partial".into())),
                Err(GenerationError::Aborted("connection reset".into())),
                Ok(StreamChunk::Text("never".into())),
            ]),
            Duration::from_secs(1),
        )
        .await
        .expect_err("aborted stream should fail");
        assert_eq!(error, GenerationError::Aborted("connection reset".into()));
    }

    #[tokio::test]
    async fn blank_output_is_an_empty_response() {
        let error = collect_stream(chunks(vec![Ok(StreamChunk::Text("  \n".into()))]), Duration::from_secs(1))
            .await
            .expect_err("blank output should fail");
        assert_eq!(error, GenerationError::EmptyResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out() {
        let stalled: ChunkStream =
            Box::pin(stream::pending::<Result<StreamChunk, GenerationError>>());
        let error = collect_stream(stalled, Duration::from_secs(5))
            .await
            .expect_err("stalled stream should time out");
        assert_eq!(error, GenerationError::Timeout);
        assert!(error.is_retryable());
        assert!(!GenerationError::InputTooLong.is_retryable());
    }

    #[test]
    fn leading_think_block_is_split() {
        let (reasoning, visible) = split_thinking("<think>\nplan it\n</think>\n\n# Title");
        assert_eq!(reasoning.as_deref(), Some("plan it"));
        assert_eq!(visible, "# Title");
    }

    #[test]
    fn responses_without_think_block_are_untouched() {
        assert_eq!(split_thinking("plain"), (None, "plain".to_owned()));
        assert_eq!(split_thinking("text <think>x</think>"), (None, "text <think>x</think>".to_owned()));
        assert_eq!(split_thinking("<think>unclosed"), (None, "<think>unclosed".to_owned()));
    }
}
