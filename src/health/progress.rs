//! Adaptive interval for the pipeline progress check
//!
//! While the pipeline lags (or cannot be read) the check backs off by
//! doubling its interval up to a cap. As soon as the lag is back under the
//! threshold the interval snaps back to its default.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveInterval {
    default: Duration,
    max: Duration,
    current: Duration,
}

impl AdaptiveInterval {
    /// Create an interval starting at `default`; `max` is raised to `default` if lower
    pub fn new(default: Duration, max: Duration) -> Self {
        Self {
            default,
            max: max.max(default),
            current: default,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn default_interval(&self) -> Duration {
        self.default
    }

    pub fn max_interval(&self) -> Duration {
        self.max
    }

    /// Double the interval, saturating at the cap
    pub fn back_off(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }

    pub fn reset(&mut self) -> Duration {
        self.current = self.default;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_doubles_up_to_cap() {
        let mut interval =
            AdaptiveInterval::new(Duration::from_secs(60), Duration::from_secs(3600));
        let seen: Vec<u64> = (0..8).map(|_| interval.back_off().as_secs()).collect();
        assert_eq!(seen, vec![120, 240, 480, 960, 1920, 3600, 3600, 3600]);
    }

    #[test]
    fn test_reset_returns_to_default() {
        let mut interval =
            AdaptiveInterval::new(Duration::from_secs(60), Duration::from_secs(3600));
        interval.back_off();
        interval.back_off();
        assert_eq!(interval.reset(), Duration::from_secs(60));
    }

    #[test]
    fn test_cap_below_default_is_raised() {
        let interval = AdaptiveInterval::new(Duration::from_secs(60), Duration::from_secs(10));
        assert_eq!(interval.max_interval(), Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn prop_interval_only_doubles_or_resets(steps in prop::collection::vec(any::<bool>(), 0..64)) {
            let default = Duration::from_secs(60);
            let max = Duration::from_secs(3600);
            let mut interval = AdaptiveInterval::new(default, max);

            for lagging in steps {
                let before = interval.current();
                let after = if lagging { interval.back_off() } else { interval.reset() };

                prop_assert!(after >= default && after <= max);
                if lagging {
                    prop_assert_eq!(after, (before * 2).min(max));
                } else {
                    prop_assert_eq!(after, default);
                }
            }
        }
    }
}
