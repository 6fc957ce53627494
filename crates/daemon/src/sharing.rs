// Run sharing with a fixed retry policy.

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::config::SharingConfig;
use crate::error::EngineError;
use crate::search::ProviderError;

pub trait RunSharing: Send + Sync {
    /// Publish a run and return its public URL.
    fn share<'a>(
        &'a self,
        run_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;
}

/// Share `run_id`, retrying up to `config.max_attempts` times with a fixed
/// delay between attempts. Only the final failure is surfaced.
pub async fn share_with_retry(
    sharing: &dyn RunSharing,
    run_id: &str,
    config: &SharingConfig,
) -> Result<String, EngineError> {
    if run_id.trim().is_empty() {
        return Err(EngineError::validation("run id must not be empty"));
    }

    let attempts = config.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match sharing.share(run_id).await {
            Ok(url) => {
                info!(run_id, attempt, "shared run");
                return Ok(url);
            }
            Err(error) => {
                warn!(run_id, attempt, max_attempts = attempts, error = %error, "run sharing failed");
                last_error = Some(error);
                if attempt < attempts {
                    tokio::time::sleep(config.retry_delay()).await;
                }
            }
        }
    }

    let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(EngineError::upstream(
        format!("failed to share run after {attempts} attempts: {detail}"),
        true,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl RunSharing for Flaky {
        fn share<'a>(
            &'a self,
            run_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let result = if call > self.failures_before_success {
                Ok(format!("https://share.example/{run_id}"))
            } else {
                Err(ProviderError::Failed(format!("attempt {call}")))
            };
            Box::pin(async move { result })
        }
    }

    fn config() -> SharingConfig {
        SharingConfig { max_attempts: 5, retry_delay_ms: 5_000 }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_fixed_delay() {
        let flaky = Flaky { failures_before_success: 3, calls: AtomicU32::new(0) };
        let started = tokio::time::Instant::now();
        let url = share_with_retry(&flaky, "run-1", &config()).await.expect("share should succeed");
        assert_eq!(url, "https://share.example/run-1");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let flaky = Flaky { failures_before_success: u32::MAX, calls: AtomicU32::new(0) };
        let error = share_with_retry(&flaky, "run-2", &config()).await.expect_err("share should fail");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 5);
        assert!(matches!(error, EngineError::Upstream { retryable: true, .. }));
        assert!(error.to_string().contains("attempt 5"));
    }
}
