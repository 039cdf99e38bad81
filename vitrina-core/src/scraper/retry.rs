use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetrySection;

use super::error::{ScrapeError, ScrapeResult};

/// Runs fallible operations up to a fixed number of attempts, sleeping an
/// exponentially growing, jittered delay between attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_attempts: usize,
    base_delay_ms: u64,
    cap_ms: u64,
    jitter_ms: u64,
}

impl Backoff {
    pub fn new(max_retries: usize, schedule: RetrySection) -> Self {
        Self {
            max_attempts: max_retries.max(1),
            base_delay_ms: schedule.base_delay_ms,
            cap_ms: schedule.backoff_cap_ms,
            jitter_ms: schedule.jitter_ms,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Base delay slept after attempt `attempt` fails, before jitter.
    /// Doubles per attempt and never exceeds the configured cap.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        let grown = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(grown.min(self.cap_ms))
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter_ms == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..self.jitter_ms);
        base + Duration::from_millis(jitter)
    }

    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> ScrapeResult<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = ScrapeResult<T>>,
    {
        let mut attempt = 1usize;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_attempts {
                        return Err(ScrapeError::Exhausted {
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }
                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    warn!(
                        operation = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "operation failed, retrying"
                    );
                    attempt += 1;
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}
