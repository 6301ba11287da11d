//! Reconnection policy: bounded exponential backoff, mid-game only

use std::time::Duration;

use rand::Rng;

use crate::session::state::SessionState;

/// Tunable backoff for re-establishing a dropped connection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Fraction of each delay randomized (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Only sessions dropped mid-game are worth resuming
    pub fn should_reconnect(&self, state: SessionState) -> bool {
        self.max_attempts > 0 && state == SessionState::InGame
    }

    /// Deterministic delay before attempt `attempt` (1-based), `None` once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        let delay = self.base_delay.saturating_mul(factor);
        Some(delay.min(self.max_delay))
    }

    /// `delay_for` spread by up to `jitter` in either direction
    pub fn jittered_delay(&self, attempt: u32) -> Option<Duration> {
        let delay = self.delay_for(attempt)?;
        if self.jitter <= 0.0 {
            return Some(delay);
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        Some(delay.mul_f64(factor).min(self.max_delay))
    }
}
