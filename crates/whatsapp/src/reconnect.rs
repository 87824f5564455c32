//! Bounded exponential backoff for session reconnects.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures tolerated before the adapter stops retrying.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(40)));
        assert_eq!(policy.delay_for(6), Some(Duration::from_secs(300)));
        assert_eq!(policy.delay_for(9), Some(Duration::from_secs(300)));
    }

    #[test]
    fn stops_after_budget() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        assert!(policy.delay_for(1).is_some());
        assert_eq!(policy.delay_for(2), None);
        assert_eq!(policy.delay_for(u32::MAX), None);
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = ReconnectPolicy {
            max_attempts: u32::MAX,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(40), Some(Duration::from_secs(60)));
    }
}
