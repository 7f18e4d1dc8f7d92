//! The one retry policy used for every external call: exponential backoff
//! with jitter, transient errors only. Centralized so the policy is tested
//! once instead of re-implemented per call site.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::EmbedError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first; 2 means up to 3 calls total.
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, EmbedError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, EmbedError>>,
    {
        let total_attempts = self.max_retries + 1;

        for attempt in 0..total_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let last_attempt = attempt + 1 == total_attempts;
                    if !error.is_transient() || last_attempt {
                        return Err(error);
                    }

                    let backoff = self.backoff_delay(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        total_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "transient provider error, backing off"
                    );
                    sleep(backoff).await;
                }
            }
        }

        // The loop always returns before falling through; the final attempt
        // either succeeds or returns its error above.
        unreachable!("retry loop exited without a result")
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16) as u32)
            .min(self.max_delay);
        let jitter_budget = exponential.as_millis() as u64 / 4;
        let jitter = if jitter_budget == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_budget)
        };
        exponential + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let attempts = AtomicUsize::new(0);

        let result = policy()
            .run(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(EmbedError::Status { status: 503 })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_fail_immediately() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = policy()
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(EmbedError::Status { status: 400 }) }
            })
            .await;

        assert!(matches!(result, Err(EmbedError::Status { status: 400 })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_and_surface_the_last_error() {
        let attempts = AtomicUsize::new(0);

        let result: Result<(), _> = policy()
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(EmbedError::Status { status: 429 }) }
            })
            .await;

        assert!(matches!(result, Err(EmbedError::Status { status: 429 })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
