//! Opt-in reconnect with exponential backoff and jitter.

use super::ConnectionSupervisor;
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::Result;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for [`ConnectionSupervisor::connect_with_policy`].
///
/// The wait after each failed attempt doubles from `initial` up to
/// `ceiling`, and the actual delay is drawn from the upper half of that
/// window so clients that lost the same server spread their retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempts: u32,
    initial: Duration,
    ceiling: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            ClientConfig::RECONNECT_ATTEMPTS,
            ClientConfig::RECONNECT_INITIAL_DELAY,
            ClientConfig::RECONNECT_MAX_DELAY,
        )
    }
}

impl ReconnectPolicy {
    /// `attempts` counts the first connect; zero is treated as one.
    pub fn new(attempts: u32, initial: Duration, ceiling: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial,
            ceiling: ceiling.max(initial),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Longest wait after `failed` consecutive failures (1-based).
    fn window(&self, failed: u32) -> Duration {
        let doublings = failed.saturating_sub(1);
        let factor = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.ceiling)
    }

    /// Delay before the next attempt after `failed` consecutive failures.
    pub fn delay_after(&self, failed: u32) -> Duration {
        let window = self.window(failed);
        let half = window / 2;
        let spread = (window - half).as_nanos() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        half + Duration::from_nanos(jitter)
    }
}

impl ConnectionSupervisor {
    /// [`connect`](Self::connect), retrying retryable failures per `policy`.
    ///
    /// Each attempt picks a fresh candidate, so endpoints that just failed
    /// are tried last. Non-retryable errors (an unavailable directory, an
    /// invalid state) are returned immediately.
    pub async fn connect_with_policy(&self, policy: &ReconnectPolicy) -> Result<Endpoint> {
        let mut failed = 0;
        loop {
            match self.connect().await {
                Ok(endpoint) => {
                    if failed > 0 {
                        debug!("Connected after {} failed attempts", failed);
                    }
                    return Ok(endpoint);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    failed += 1;
                    if failed >= policy.attempts() {
                        warn!("All {} connect attempts failed. Last error: {}", failed, e);
                        return Err(e);
                    }
                    let delay = policy.delay_after(failed);
                    warn!(
                        "Connect attempt {}/{} failed: {}. Retrying in {:?}",
                        failed,
                        policy.attempts(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
