//! Global probe throttle: a refill token bucket shared by every plugin
//! worker. Once per second the refill task inserts up to `per_second`
//! tokens; whatever does not fit is discarded, so idle seconds never build
//! up a burst. One token buys one probe.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ScanError;

#[derive(Clone)]
pub struct RateLimiter {
    bucket: async_channel::Receiver<()>,
    cancel: CancellationToken,
}

impl RateLimiter {
    /// Start the refill task. It stops, closing the bucket, when `cancel`
    /// fires; nothing is produced after that.
    pub fn new(per_second: usize, cancel: CancellationToken) -> Self {
        let (tx, bucket) = async_channel::bounded(per_second);
        let refill_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = refill_cancel.cancelled() => break,
                    _ = tick.tick() => {
                        for _ in 0..per_second {
                            // Full bucket: drop the remainder of this refill.
                            if tx.try_send(()).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            debug!("rate limiter refill stopped");
        });
        RateLimiter { bucket, cancel }
    }

    /// Wait for one token. Returns [`ScanError::Cancelled`] once the
    /// limiter's context is cancelled.
    pub async fn acquire(&self) -> Result<(), ScanError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
            token = self.bucket.recv() => token.map_err(|_| ScanError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(limiter: &RateLimiter) -> usize {
        let mut tokens = 0;
        while limiter.bucket.try_recv().is_ok() {
            tokens += 1;
        }
        tokens
    }

    #[tokio::test(start_paused = true)]
    async fn refill_does_not_carry_over() {
        let cancel = CancellationToken::new();
        let limiter = RateLimiter::new(5, cancel.clone());

        // Two refill ticks have passed but the bucket caps at one second's
        // worth of tokens.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(drain(&limiter), 5);

        // The next tick refills exactly one second's worth again.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(drain(&limiter), 5);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(drain(&limiter), 0);
        assert!(matches!(
            limiter.acquire().await,
            Err(ScanError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_paces_to_the_configured_rate() {
        let cancel = CancellationToken::new();
        let limiter = RateLimiter::new(5, cancel);

        let start = tokio::time::Instant::now();
        for _ in 0..50 {
            limiter.acquire().await.unwrap();
        }
        let elapsed = start.elapsed();
        // 50 probes at 5/s: the last batch unlocks at the ninth refill.
        assert!(elapsed >= Duration::from_secs(9), "finished in {elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "finished in {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_acquire_unblocks_on_cancel() {
        let cancel = CancellationToken::new();
        let limiter = RateLimiter::new(1, cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(drain(&limiter), 1);

        let waiter = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire().await }
        });
        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(ScanError::Cancelled)));
    }
}
