//! Retry with reconnection.
//!
//! Every attempt starts from a fresh connection. A connection that saw an
//! error is dropped, never reused.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tablevault_store::{ObjectStore, StoreConnector};
use tracing::{debug, error, warn};

use crate::UploadError;

/// Default number of attempts per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// No delay at all.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Delay after failed attempt `attempt` (1-based), with ±25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped <= 0.0 {
            return Duration::ZERO;
        }
        let jitter = capped * 0.25;
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }
}

/// How often and how patiently a task is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Final result of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed. Carries the last error.
    Exhausted { error: UploadError, attempts: u32 },
    /// A failure no retry can fix.
    Fatal(UploadError),
}

/// Runs `op` on a fresh connection from `connector` until it succeeds, fails
/// fatally, or `policy.max_attempts` is used up.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    connector: &dyn StoreConnector,
    key: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(Box<dyn ObjectStore>) -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let result = match connector.connect() {
            Ok(store) => op(store).await,
            Err(e) => Err(UploadError::Store(e)),
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(key = %key, attempt, "succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_retryable() => {
                error!(key = %key, attempt, error = %e, "unrecoverable upload failure");
                return RetryOutcome::Fatal(e);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            error!(
                key = %key,
                attempts = attempt,
                error = %error,
                "giving up after retries, the next walk will pick the file up again"
            );
            return RetryOutcome::Exhausted {
                error,
                attempts: attempt,
            };
        }

        let delay = policy.backoff.delay_for_attempt(attempt);
        warn!(
            key = %key,
            attempt,
            error = %error,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "attempt failed, reconnecting"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablevault_store::{MemoryStore, Operation, StoreError};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_backoff(Backoff::none())
    }

    async fn head(store: Box<dyn ObjectStore>) -> Result<bool, UploadError> {
        Ok(store.head_object("k").await?.is_some())
    }

    #[test]
    fn backoff_grows_and_caps() {
        let b = Backoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            factor: 2.0,
        };
        let within = |d: Duration, base: f64| {
            let s = d.as_secs_f64();
            s >= base * 0.75 && s <= base * 1.25
        };
        assert!(within(b.delay_for_attempt(1), 1.0));
        assert!(within(b.delay_for_attempt(2), 2.0));
        assert!(within(b.delay_for_attempt(3), 4.0));
        assert!(within(b.delay_for_attempt(10), 4.0));
        assert_eq!(Backoff::none().delay_for_attempt(5), Duration::ZERO);
    }

    #[test]
    fn jitter_spreads_both_ways() {
        let b = Backoff {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            factor: 1.0,
        };
        let samples: Vec<f64> = (0..2000)
            .map(|_| b.delay_for_attempt(1).as_secs_f64())
            .collect();
        let min = samples.iter().cloned().fold(f64::MAX, f64::min);
        let max = samples.iter().cloned().fold(f64::MIN, f64::max);
        assert!(min >= 7.5 && max <= 12.5, "min={min} max={max}");
        assert!(min < 9.0, "never below base: min={min}");
        assert!(max > 11.0, "never above base: max={max}");
    }

    #[tokio::test]
    async fn success_on_third_attempt() {
        let store = MemoryStore::new();
        store.fail_next(Operation::Head, 2);

        let outcome = execute_with_retry(&policy(3), &store, "k", head).await;
        assert!(matches!(
            outcome,
            RetryOutcome::Succeeded {
                value: false,
                attempts: 3
            }
        ));
        assert_eq!(store.connects(), 3);
        assert_eq!(store.count(Operation::Head), 3);
    }

    #[tokio::test]
    async fn exhausted_after_budget() {
        let store = MemoryStore::new();
        store.fail_next(Operation::Head, 5);

        let outcome = execute_with_retry(&policy(3), &store, "k", head).await;
        match outcome {
            RetryOutcome::Exhausted { error, attempts } => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    error,
                    UploadError::Store(StoreError::Injected(Operation::Head))
                ));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(store.connects(), 3);
    }

    #[tokio::test]
    async fn failed_connect_counts_as_attempt() {
        let store = MemoryStore::new();
        store.fail_next(Operation::Connect, 1);

        let outcome = execute_with_retry(&policy(3), &store, "k", head).await;
        assert!(matches!(
            outcome,
            RetryOutcome::Succeeded { attempts: 2, .. }
        ));
        assert_eq!(store.count(Operation::Head), 1);
    }

    #[tokio::test]
    async fn invariant_violation_is_not_retried() {
        let store = MemoryStore::new();
        let outcome: RetryOutcome<()> = execute_with_retry(&policy(3), &store, "k", |_store| async {
            Err(UploadError::Invariant("part 2 after part 4".into()))
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Fatal(UploadError::Invariant(_))));
        assert_eq!(store.connects(), 1);
    }
}
