//! Bounded reconnect policy. Fixed delay by default, optional multiplier.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive automatic attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first attempt, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Multiplier applied per attempt (`1.0` = fixed delay).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on the delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 { 5 }
fn default_delay_ms() -> u64 { 3_000 }
fn default_multiplier() -> f64 { 1.0 }
fn default_max_delay_ms() -> u64 { 60_000 }

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Fixed-delay policy with the given bound.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// No automatic reconnection at all.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// Stateless policy: computes the delay for a given attempt number.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Returns `true` if another attempt may be scheduled after `made`
    /// attempts have already been scheduled.
    pub fn should_reconnect(&self, made: u32) -> bool {
        made < self.config.max_attempts
    }

    /// Delay before the `attempt`-th reconnect (1-based), or `None` once
    /// `attempt` exceeds the budget.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_attempts {
            return None;
        }
        let base_ms =
            self.config.delay_ms as f64 * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_delay_ms as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_by_default() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=5 {
            assert_eq!(policy.next_delay(attempt), Some(Duration::from_secs(3)));
        }
        assert!(policy.next_delay(6).is_none());
        assert!(policy.next_delay(0).is_none());
    }

    #[test]
    fn multiplier_is_capped() {
        let policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 10,
            delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 500,
        });
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert_eq!(policy.next_delay(4).unwrap().as_millis(), 500);
    }

    #[test]
    fn should_reconnect_boundary() {
        let policy = ReconnectPolicy::new(ReconnectConfig::fixed(2, Duration::from_millis(10)));
        assert!(policy.should_reconnect(0));
        assert!(policy.should_reconnect(1));
        assert!(!policy.should_reconnect(2));
        assert!(!ReconnectPolicy::new(ReconnectConfig::disabled()).should_reconnect(0));
    }
}
