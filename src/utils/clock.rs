//! Time sources and interval gating
//!
//! Every periodic check in the manager compares "now" against its own
//! last-run timestamp. [`IntervalGate`] holds that timestamp and
//! [`CheckOutcome`] carries the "not yet due" result back to the caller.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

// ============================================================================
// Clock
// ============================================================================

/// Source of wall-clock time in milliseconds since the epoch
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;

    fn now_micros(&self) -> i64 {
        self.now_millis() * 1000
    }
}

/// Real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn now_micros(&self) -> i64 {
        Utc::now().timestamp_micros()
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Interval Gate
// ============================================================================

/// Result of an interval-gated check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome<T> {
    /// The interval has not elapsed; nothing was queried
    NotDue,
    /// The check ran and produced a value
    Ran(T),
}

impl<T> CheckOutcome<T> {
    pub fn is_due(&self) -> bool {
        matches!(self, Self::Ran(_))
    }

    pub fn ran(self) -> Option<T> {
        match self {
            Self::Ran(value) => Some(value),
            Self::NotDue => None,
        }
    }
}

/// Tracks when a periodic check last ran
#[derive(Debug, Clone)]
pub struct IntervalGate {
    interval_ms: i64,
    last_run_ms: i64,
}

impl IntervalGate {
    /// Gate whose first check is due immediately
    pub fn due_now(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as i64,
            last_run_ms: 0,
        }
    }

    /// Gate whose first check is delayed by one full interval from `now_ms`
    pub fn starting_at(interval: Duration, now_ms: i64) -> Self {
        Self {
            interval_ms: interval.as_millis() as i64,
            last_run_ms: now_ms,
        }
    }

    /// Returns true and records `now_ms` as the last run when the interval has elapsed
    pub fn try_pass(&mut self, now_ms: i64) -> bool {
        if now_ms - self.last_run_ms < self.interval_ms {
            return false;
        }
        self.last_run_ms = now_ms;
        true
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(0) as u64)
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval_ms = interval.as_millis() as i64;
    }

    pub fn last_run_millis(&self) -> i64 {
        self.last_run_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_not_due_before_interval() {
        let mut gate = IntervalGate::starting_at(Duration::from_secs(30), 1_000);
        assert!(!gate.try_pass(1_000));
        assert!(!gate.try_pass(30_999));
        assert_eq!(gate.last_run_millis(), 1_000);
    }

    #[test]
    fn test_gate_resets_on_pass() {
        let mut gate = IntervalGate::starting_at(Duration::from_secs(30), 1_000);
        assert!(gate.try_pass(31_000));
        assert_eq!(gate.last_run_millis(), 31_000);
        assert!(!gate.try_pass(31_001));
        assert!(gate.try_pass(61_000));
    }

    #[test]
    fn test_due_now_gate_passes_first_time() {
        let mut gate = IntervalGate::due_now(Duration::from_secs(15));
        assert!(gate.try_pass(1_700_000_000_000));
        assert!(!gate.try_pass(1_700_000_000_001));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(5);
        clock.advance(Duration::from_millis(10));
        assert_eq!(clock.now_millis(), 15);
        assert_eq!(clock.now_micros(), 15_000);
    }

    #[test]
    fn test_check_outcome_accessors() {
        assert!(CheckOutcome::Ran(3).is_due());
        assert_eq!(CheckOutcome::Ran(3).ran(), Some(3));
        assert_eq!(CheckOutcome::<u32>::NotDue.ran(), None);
    }
}
