//! Session manager configuration
//!
//! Tuning for the call session manager. The reconnect defaults (30 s
//! grace window, 1 s doubling to an 8 s cap) are policy, not protocol;
//! deployments adjust them through the `with_*` setters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnection policy applied when the transport drops mid-call
///
/// While `Reconnecting`, rejoin attempts are spaced by an exponential
/// backoff starting at `initial_delay`, multiplied by
/// `backoff_multiplier` per failed attempt and capped at `max_delay`.
/// The whole recovery must finish inside `grace_period` or the session
/// fails with `ReconnectTimeout`.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use telecare_call_core::ReconnectPolicy;
///
/// let policy = ReconnectPolicy::default();
/// assert_eq!(policy.grace_period, Duration::from_secs(30));
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
/// // capped
/// assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Total window a `Reconnecting` session has to recover
    pub grace_period: Duration,
    /// Delay before the first rejoin attempt
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Add ±10% jitter to each delay
    ///
    /// Off by default so the schedule is deterministic; turn it on for
    /// fleets where synchronized rejoin stampedes matter.
    pub use_jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }
}

impl ReconnectPolicy {
    /// Set the recovery grace period
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the delay before the first rejoin attempt
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Set the cap on inter-attempt delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Enable or disable delay jitter
    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Delay to apply before the given 1-based rejoin attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let millis =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped = Duration::from_millis(millis as u64).min(self.max_delay);
        if self.use_jitter {
            let jitter = (rand::random::<f64>() - 0.5) * 0.2;
            Duration::from_millis((capped.as_millis() as f64 * (1.0 + jitter)) as u64)
        } else {
            capped
        }
    }
}

/// Configuration for the call session manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Attempt to acquire a camera track at session start
    ///
    /// When off, sessions are audio-only by construction and no camera
    /// warning is raised.
    pub enable_video: bool,
    /// Capacity of the broadcast event stream handed to subscribers
    pub event_buffer: usize,
    /// Reconnection policy for mid-call transport drops
    pub reconnect: ReconnectPolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            enable_video: true,
            event_buffer: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl CallConfig {
    /// Enable or disable camera acquisition
    pub fn with_video(mut self, enable_video: bool) -> Self {
        self.enable_video = enable_video;
        self
    }

    /// Set the broadcast event buffer capacity
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    /// Set the reconnection policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_to_the_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.delay_for_attempt(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = ReconnectPolicy::default()
            .with_jitter(true)
            .with_initial_delay(Duration::from_secs(4));
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1).as_millis();
            assert!((3600..=4400).contains(&delay), "delay {delay}ms out of band");
        }
    }

    #[test]
    fn builders_override_defaults() {
        let config = CallConfig::default()
            .with_video(false)
            .with_reconnect(ReconnectPolicy::default().with_grace_period(Duration::from_secs(5)));
        assert!(!config.enable_video);
        assert_eq!(config.reconnect.grace_period, Duration::from_secs(5));
    }
}
