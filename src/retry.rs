//! Bounded exponential-backoff retry around a single fallible async call.
//!
//! The attempt schedule is `initial_delay * 2^attempt_index` with no jitter.
//! Whether an error is worth another attempt is decided by an injectable
//! predicate; [`is_retryable`] is the default and treats network failures,
//! 5xx and 429 as transient.
//!
//! A [`CancellationToken`] is checked before every attempt and raced against
//! every backoff sleep, so a caller that gives up stops the loop at the next
//! await point.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CrewError, Result};

/// Default total attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Exponent cap so the shift below can never overflow.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Predicate deciding whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&CrewError) -> bool + Send + Sync>;

/// Serializable retry settings (the `retry` section of the config file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Sleep at least as long as a 429 `Retry-After` hint asks for.
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            respect_retry_after: false,
        }
    }
}

/// Options for [`execute_with_retry`].
#[derive(Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub is_retryable: RetryPredicate,
    pub respect_retry_after: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryOptions {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            is_retryable: Arc::new(is_retryable),
            respect_retry_after: config.respect_retry_after,
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("respect_retry_after", &self.respect_retry_after)
            .finish_non_exhaustive()
    }
}

impl RetryOptions {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Replace the retry classifier for this call site.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&CrewError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(classifier);
        self
    }

    pub fn with_respect_retry_after(mut self, enabled: bool) -> Self {
        self.respect_retry_after = enabled;
        self
    }

    /// Attempt budget, never below one.
    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// State handed to the operation on every attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Zero-based attempt index.
    pub index: u32,
    /// Total backoff slept before this attempt.
    pub elapsed_backoff: Duration,
    /// Message of the previous attempt's error, if there was one.
    pub previous_error: Option<String>,
}

impl RetryAttempt {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }
}

/// Backoff before the attempt following failed attempt `attempt_index`.
pub fn backoff_delay(initial: Duration, attempt_index: u32) -> Duration {
    let factor = 1u32 << attempt_index.min(MAX_BACKOFF_EXPONENT);
    initial.saturating_mul(factor)
}

/// Default classifier: network failures, 5xx and 429 are transient.
pub fn is_retryable(error: &CrewError) -> bool {
    let Some(provider) = error.provider_error() else {
        return false;
    };
    if provider.is_network() {
        return true;
    }
    matches!(provider.status(), Some(429) | Some(500..=599))
}

/// `true` for rate-limit failures, so callers can treat them separately.
pub fn is_rate_limited(error: &CrewError) -> bool {
    error
        .provider_error()
        .and_then(|e| e.status())
        .is_some_and(|s| s == 429)
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `cancel` fires.
///
/// - Permanent failures are returned as-is, without delay.
/// - After the last allowed attempt the error is wrapped in
///   [`CrewError::RetryExhausted`], carrying only the final attempt's error.
/// - Cancellation, observed before an attempt or during a backoff sleep,
///   returns [`CrewError::Cancelled`] and starts no further attempt.
pub async fn execute_with_retry<T, F, Fut>(
    mut operation: F,
    options: &RetryOptions,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut(RetryAttempt) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = options.attempts();
    let mut attempt = RetryAttempt::default();

    loop {
        if cancel.is_cancelled() {
            debug!(attempt = attempt.index, "Retry loop cancelled before attempt");
            return Err(CrewError::Cancelled);
        }

        let error = match operation(attempt.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let attempts_made = attempt.index + 1;
        if !(options.is_retryable)(&error) {
            debug!(attempt = attempt.index, error = %error, "Permanent failure, not retrying");
            return Err(error);
        }
        if attempts_made >= max_attempts {
            warn!(attempts = attempts_made, error = %error, "Retries exhausted");
            return Err(CrewError::RetryExhausted {
                attempts: attempts_made,
                last: Box::new(error),
            });
        }

        let mut delay = backoff_delay(options.initial_delay, attempt.index);
        if options.respect_retry_after {
            if let Some(hint) = error.provider_error().and_then(|e| e.retry_after()) {
                delay = delay.max(hint);
            }
        }

        warn!(
            attempt = attempts_made,
            max = max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retryable failure, backing off"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(attempt = attempts_made, "Retry loop cancelled during backoff");
                return Err(CrewError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt = RetryAttempt {
            index: attempts_made,
            elapsed_backoff: attempt.elapsed_backoff + delay,
            previous_error: Some(error.to_string()),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn server_error(status: u16, call: u32) -> CrewError {
        CrewError::Provider(ProviderError::Server {
            status,
            message: format!("call {call}"),
        })
    }

    fn client_error(status: u16) -> CrewError {
        CrewError::Provider(ProviderError::Client {
            status,
            message: "bad request".into(),
        })
    }

    fn options() -> RetryOptions {
        RetryOptions::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1000))
    }

    #[test]
    fn test_retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.initial_delay_ms, 1000);
        assert!(!cfg.respect_retry_after);
    }

    #[test]
    fn test_retry_config_deserialize_partial() {
        let cfg: RetryConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.initial_delay_ms, 1000);
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(250));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_large_index_does_not_overflow() {
        let d = backoff_delay(Duration::from_secs(1), u32::MAX);
        assert_eq!(d, Duration::from_secs(1 << MAX_BACKOFF_EXPONENT));
    }

    #[test]
    fn test_default_classifier() {
        assert!(is_retryable(&CrewError::Provider(ProviderError::Network(
            "refused".into()
        ))));
        assert!(is_retryable(&server_error(500, 0)));
        assert!(is_retryable(&server_error(503, 0)));
        assert!(is_retryable(&CrewError::Provider(ProviderError::RateLimited {
            message: "slow".into(),
            retry_after: None,
        })));
        assert!(!is_retryable(&client_error(400)));
        assert!(!is_retryable(&client_error(401)));
        assert!(!is_retryable(&client_error(404)));
        assert!(!is_retryable(&CrewError::Provider(
            ProviderError::InvalidResponse("empty".into())
        )));
        assert!(!is_retryable(&CrewError::Validation("empty query".into())));
    }

    #[test]
    fn test_rate_limit_predicate() {
        let limited = CrewError::Provider(ProviderError::RateLimited {
            message: "slow".into(),
            retry_after: None,
        });
        assert!(is_rate_limited(&limited));
        assert!(!is_rate_limited(&server_error(503, 0)));
        assert!(!is_rate_limited(&client_error(400)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_503_then_success_sleeps_geometric() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = execute_with_retry(
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(server_error(503, n))
                    } else {
                        Ok("answer")
                    }
                }
            },
            &options(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms * 1 + 1000ms * 2
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<()> = execute_with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(client_error(400)) }
            },
            &options(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(CrewError::Provider(ProviderError::Client { status: 400, .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_500_exhausts_with_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = execute_with_retry(
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(server_error(500, n)) }
            },
            &options(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(CrewError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(
                    matches!(*last, CrewError::Provider(ProviderError::Server { ref message, .. }) if message == "call 3"),
                    "expected error from the 3rd call, got {last:?}"
                );
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let task = {
            let calls = Arc::clone(&calls);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                execute_with_retry(
                    |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(server_error(503, 0)) }
                    },
                    &options(),
                    &cancel,
                )
                .await
            })
        };

        // First attempt fails at t=0, backoff runs until t=1000ms.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(CrewError::Cancelled)), "got {result:?}");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = execute_with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            &options(),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(CrewError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_state_is_threaded_through() {
        let seen = std::sync::Mutex::new(Vec::new());

        let _ = execute_with_retry(
            |attempt| {
                seen.lock().unwrap().push(attempt.clone());
                async move {
                    if attempt.index < 2 {
                        Err(server_error(502, attempt.index + 1))
                    } else {
                        Ok(())
                    }
                }
            },
            &options(),
            &CancellationToken::new(),
        )
        .await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_first());
        assert_eq!(seen[0].previous_error, None);
        assert_eq!(seen[1].elapsed_backoff, Duration::from_millis(1000));
        assert_eq!(seen[2].elapsed_backoff, Duration::from_millis(3000));
        assert!(seen[2]
            .previous_error
            .as_deref()
            .is_some_and(|m| m.contains("call 2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier_overrides_default() {
        let calls = AtomicU32::new(0);
        let opts = options().with_classifier(|e| matches!(e, CrewError::Validation(_)));

        let result: Result<()> = execute_with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error(503, 0)) }
            },
            &opts,
            &CancellationToken::new(),
        )
        .await;

        // 503 is not retryable under this classifier.
        assert!(matches!(result, Err(CrewError::Provider(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_clamped_to_one() {
        let calls = AtomicU32::new(0);
        let opts = options().with_max_attempts(0);

        let result: Result<()> = execute_with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error(503, 1)) }
            },
            &opts,
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(CrewError::RetryExhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_respected_when_enabled() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let opts = options()
            .with_initial_delay(Duration::from_millis(100))
            .with_respect_retry_after(true);

        let result = execute_with_retry(
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CrewError::Provider(ProviderError::RateLimited {
                            message: "slow".into(),
                            retry_after: Some(Duration::from_secs(5)),
                        }))
                    } else {
                        Ok(n)
                    }
                }
            },
            &opts,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_ignored_by_default() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let opts = options().with_initial_delay(Duration::from_millis(100));

        execute_with_retry(
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CrewError::Provider(ProviderError::RateLimited {
                            message: "slow".into(),
                            retry_after: Some(Duration::from_secs(5)),
                        }))
                    } else {
                        Ok(())
                    }
                }
            },
            &opts,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }
}
