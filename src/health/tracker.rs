//! Bookkeeping for peer managers that stopped sending proof of life

use std::collections::HashMap;

/// Peer managers currently considered inactive, keyed by (adapter type, work item)
///
/// The value is the last proof-of-life timestamp seen for the manager.
#[derive(Debug, Default)]
pub struct InactiveManagerTracker {
    inactive: HashMap<(String, i64), String>,
}

impl InactiveManagerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a manager; returns true when it was not tracked before
    pub fn track(&mut self, adapter_type: &str, work_item_id: i64, last_seen: &str) -> bool {
        self.inactive
            .insert((adapter_type.to_string(), work_item_id), last_seen.to_string())
            .is_none()
    }

    /// Stop tracking a manager; returns true when it was tracked
    pub fn untrack(&mut self, adapter_type: &str, work_item_id: i64) -> bool {
        self.inactive
            .remove(&(adapter_type.to_string(), work_item_id))
            .is_some()
    }

    pub fn is_tracked(&self, adapter_type: &str, work_item_id: i64) -> bool {
        self.inactive
            .contains_key(&(adapter_type.to_string(), work_item_id))
    }

    /// Drop entries whose work item is no longer listed as a manager item
    pub fn retain_listed(&mut self, listed: &[i64]) {
        self.inactive.retain(|(_, id), _| listed.contains(id));
    }

    pub fn len(&self) -> usize {
        self.inactive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inactive.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_reports_new_entries_once() {
        let mut tracker = InactiveManagerTracker::new();
        assert!(tracker.track("MANAGER", 11, "2024-06-10 14:53:54.567"));
        assert!(!tracker.track("MANAGER", 11, "2024-06-10 14:53:54.567"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_untrack() {
        let mut tracker = InactiveManagerTracker::new();
        tracker.track("MANAGER", 11, "t");
        assert!(tracker.untrack("MANAGER", 11));
        assert!(!tracker.untrack("MANAGER", 11));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retain_listed_prunes_vanished_items() {
        let mut tracker = InactiveManagerTracker::new();
        tracker.track("MANAGER", 11, "t");
        tracker.track("MANAGER", 12, "t");
        tracker.retain_listed(&[12]);
        assert!(!tracker.is_tracked("MANAGER", 11));
        assert!(tracker.is_tracked("MANAGER", 12));
    }
}
