use std::future::Future;

use tracing::warn;

use crate::provider::{ProviderError, RetryPolicy};

/// Retry a provider operation under its retry policy with exponential
/// backoff. Only retryable errors are retried; anything else is terminal on
/// the first occurrence. Returns the final outcome together with the number
/// of attempts actually issued.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> (Result<T, ProviderError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return (Ok(result), attempt),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "retry attempts exhausted"
                    );
                }
                return (Err(err), attempt);
            }
        }
    }
}
