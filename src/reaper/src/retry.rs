//! Exponential backoff with jitter for transient provider failures.

use common::ProviderError;
use common::config::ReaperConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry behavior shared by listing and abort calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum attempts per call, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Multiplier applied after each retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&ReaperConfig> for RetryConfig {
    fn from(config: &ReaperConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

/// Run `op` under `call_timeout`, retrying transient failures with
/// exponential backoff and jitter.
///
/// Returns the final result and how many retries were spent. Permanent
/// failures (not-found, access-denied) return immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    call_timeout: Duration,
    mut op: F,
) -> (Result<T, ProviderError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1u32;
    loop {
        let result = match tokio::time::timeout(call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(call_timeout)),
        };

        match result {
            Ok(value) => return (Ok(value), attempt - 1),
            Err(err) if err.is_transient() && attempt < config.max_attempts => {
                let sleep = jittered(delay);
                tracing::warn!(
                    error = %err,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = sleep.as_millis() as u64,
                    "transient provider error, backing off"
                );
                tokio::time::sleep(sleep).await;
                delay = next_delay(delay, config);
                attempt += 1;
            }
            Err(err) => return (Err(err), attempt - 1),
        }
    }
}

/// Additive jitter bounded by half the delay, so concurrent janitors
/// retrying against the same provider spread out.
fn jittered(delay: Duration) -> Duration {
    let base = delay.as_millis() as u64;
    let max_jitter = base / 2 + 1;
    let jitter = rand::thread_rng().gen_range(0..max_jitter);
    Duration::from_millis(base.saturating_add(jitter))
}

fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    current.mul_f64(config.backoff_multiplier).min(config.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt_spends_no_retries() {
        let calls = AtomicU32::new(0);
        let (result, retries) = with_retry(&fast_config(), Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ProviderError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let (result, retries) = with_retry(&fast_config(), Duration::from_secs(1), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(ProviderError::Transient("slow down".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let (result, retries) = with_retry(&fast_config(), Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ProviderError::AccessDenied("denied".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::AccessDenied(_))));
        assert_eq!(retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhaust_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let (result, retries) = with_retry(&fast_config(), Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ProviderError::Transient("still down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Transient(_))));
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_takes_the_retry_path() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 2,
            ..fast_config()
        };
        let (result, retries) = with_retry(&config, Duration::from_millis(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ProviderError>(())
            }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(retries, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let config = RetryConfig::default();
        let mut delay = config.initial_delay;
        for _ in 0..16 {
            delay = next_delay(delay, &config);
            assert!(delay <= config.max_delay);
        }
        assert_eq!(delay, config.max_delay);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..100 {
            let base = Duration::from_millis(100);
            let jittered = jittered(base);
            assert!(jittered >= base);
            assert!(jittered <= base + Duration::from_millis(51));
        }
    }
}
