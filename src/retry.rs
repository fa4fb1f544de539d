use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::time::sleep;

/// Failure fragments worth retrying. Shared by the submission engine and the
/// generic retry helper so "is this failure transient" is defined once.
///
/// Nonce/gas/mempool races resolve themselves within a block or two, and
/// insufficient-funds can be a race against an unconfirmed inbound transfer.
/// Anything else (reverts for business reasons, bad calldata) is fatal.
const RETRYABLE_PATTERNS: &[&str] = &[
    "nonce too low",
    "nonce is too low",
    "invalid nonce",
    "already known",
    "known transaction",
    "underpriced",
    "fee too low",
    "max fee per gas less than block base fee",
    "insufficient funds",
    "expired",
    "deadline",
    "timeout",
    "timed out",
    "connection",
    "reset by peer",
    "temporarily unavailable",
    "too many requests",
    "rate limit",
    "429",
    "502",
    "503",
    "504",
];

pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Nonce-class failures require refetching the account nonce before the next
/// attempt; everything else reuses it so an escalated retry replaces the
/// stuck transaction instead of queueing behind it.
pub fn is_nonce_error(message: &str) -> bool {
    message.to_lowercase().contains("nonce")
}

const BACKOFF_FACTOR: f64 = 2.0;
const JITTER: f64 = 0.25;

/// Retry an async operation with multiplicative backoff and jitter.
///
/// For simple non-transactional calls (balance reads, nonce fetches). Only
/// failures matching the shared retryable patterns are retried; the rest
/// propagate immediately.
pub async fn retry_async<F, Fut, T>(
    mut op: F,
    attempts: usize,
    initial_delay: Duration,
) -> anyhow::Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts && is_retryable(&format!("{e:#}")) => {
                let base = initial_delay.as_secs_f64() * BACKOFF_FACTOR.powi(attempt as i32 - 1);
                let jitter = rand::thread_rng().gen_range(-JITTER..=JITTER);
                sleep(Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Cooperative cancellation token with a preemptible sleep.
///
/// The scheduler consults it between ticks and strategy executions; the
/// submission engine threads it through backoff sleeps so a shutdown does not
/// have to sit out a full retry sequence.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns true when the full duration elapsed, false when preempted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = sleep(duration) => true,
            _ = notified => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn classifies_nonce_and_gas_races_as_retryable() {
        assert!(is_retryable("nonce too low"));
        assert!(is_retryable("replacement transaction underpriced"));
        assert!(is_retryable("already known"));
        assert!(is_retryable("429 Too Many Requests"));
        assert!(is_retryable("execution reverted: EXPIRED"));
        assert!(!is_retryable("execution reverted: INSUFFICIENT_LIQUIDITY"));
        assert!(!is_retryable("invalid sender"));
    }

    #[test]
    fn nonce_errors_are_detected_case_insensitively() {
        assert!(is_nonce_error("Nonce too low"));
        assert!(!is_nonce_error("underpriced"));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let counter = AtomicUsize::new(0);
        let res = retry_async(
            |_| {
                let current = counter.fetch_add(1, Ordering::Relaxed);
                async move {
                    if current < 2 {
                        Err(anyhow!("connection refused"))
                    } else {
                        Ok(7u32)
                    }
                }
            },
            4,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let res: anyhow::Result<()> = retry_async(
            |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                async { Err(anyhow!("execution reverted: bad input")) }
            },
            5,
            Duration::from_millis(1),
        )
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cancelled_token_preempts_sleep() {
        let token = CancelToken::new();
        token.cancel();
        assert!(!token.sleep(Duration::from_secs(60)).await);
    }
}
