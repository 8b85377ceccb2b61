//! Per-category sync state.
//!
//! Pure logic, no I/O. Staleness is measured from the first unsynced
//! mutation, so repeated mutations never move the clock forward.
use serde::{Deserialize, Serialize};

use crate::category::{BackupCategory, CategoryMap};
use crate::types::Timestamp;

/// Sync state of one category.
///
/// Invariant: `synced` implies `sync_required_since.is_none()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySyncState {
    pub synced: bool,
    pub sync_required_since: Option<Timestamp>,
    pub last_sync_completed_at: Option<Timestamp>,
}

impl Default for CategorySyncState {
    fn default() -> Self {
        Self {
            synced: true,
            sync_required_since: None,
            last_sync_completed_at: None,
        }
    }
}

impl CategorySyncState {
    /// Unsynced for strictly longer than `threshold_ms`.
    pub fn is_stale(&self, now: Timestamp, threshold_ms: u64) -> bool {
        self.sync_required_since
            .is_some_and(|since| now.saturating_sub(since) > threshold_ms)
    }
}

/// Sync state for every category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTracker {
    states: CategoryMap<CategorySyncState>,
}

impl CategoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted states.
    pub fn from_states(states: CategoryMap<CategorySyncState>) -> Self {
        let mut tracker = Self { states };
        // Repair rows written by older builds that broke the invariant.
        for (_, state) in tracker.states.iter_mut() {
            if state.synced && state.sync_required_since.is_some() {
                state.sync_required_since = None;
            }
            if !state.synced && state.sync_required_since.is_none() {
                state.synced = true;
            }
        }
        tracker
    }

    /// A local mutation invalidated the remote copy.
    ///
    /// Returns `true` if this started the staleness clock.
    pub fn mark_required(&mut self, category: BackupCategory, now: Timestamp) -> bool {
        let state = &mut self.states[category];
        state.synced = false;
        if state.sync_required_since.is_none() {
            state.sync_required_since = Some(now);
            true
        } else {
            false
        }
    }

    /// The latest local snapshot is durably stored remotely.
    pub fn mark_synced(&mut self, category: BackupCategory, at: Timestamp) {
        let state = &mut self.states[category];
        state.synced = true;
        state.sync_required_since = None;
        state.last_sync_completed_at = Some(at);
    }

    /// A write completed but newer mutations are not in it: record the
    /// completion, keep the category required, and measure staleness from
    /// the first of those newer mutations.
    pub fn mark_partially_synced(
        &mut self,
        category: BackupCategory,
        at: Timestamp,
        required_since: Timestamp,
    ) {
        let state = &mut self.states[category];
        state.synced = false;
        state.sync_required_since = Some(required_since);
        state.last_sync_completed_at = Some(at);
    }

    pub fn is_stale(&self, category: BackupCategory, now: Timestamp, threshold_ms: u64) -> bool {
        self.states[category].is_stale(now, threshold_ms)
    }

    pub fn is_synced(&self, category: BackupCategory) -> bool {
        self.states[category].synced
    }

    pub fn get(&self, category: BackupCategory) -> &CategorySyncState {
        &self.states[category]
    }

    pub fn states(&self) -> &CategoryMap<CategorySyncState> {
        &self.states
    }

    /// Categories that currently need a write.
    pub fn required(&self) -> impl Iterator<Item = BackupCategory> + '_ {
        self.states
            .iter()
            .filter(|(_, s)| !s.synced)
            .map(|(c, _)| c)
    }
}

/// Stale categories in `states` at `now`.
pub fn stale_categories(
    states: &CategoryMap<CategorySyncState>,
    now: Timestamp,
    threshold_ms: u64,
) -> Vec<BackupCategory> {
    states
        .iter()
        .filter(|(_, s)| s.is_stale(now, threshold_ms))
        .map(|(c, _)| c)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60_000;
    const THRESHOLD: u64 = 30 * MIN;

    #[test]
    fn defaults_are_synced() {
        let tracker = CategoryTracker::new();
        for category in BackupCategory::ALL {
            assert!(tracker.is_synced(category));
            assert_eq!(tracker.get(category).sync_required_since, None);
        }
        assert_eq!(tracker.required().count(), 0);
    }

    #[test]
    fn mark_required_is_idempotent() {
        let mut tracker = CategoryTracker::new();
        assert!(tracker.mark_required(BackupCategory::Settings, 1_000));
        assert!(!tracker.mark_required(BackupCategory::Settings, 5_000));
        assert!(!tracker.mark_required(BackupCategory::Settings, 9_000));
        assert_eq!(
            tracker.get(BackupCategory::Settings).sync_required_since,
            Some(1_000)
        );
        assert!(!tracker.is_synced(BackupCategory::Settings));
    }

    #[test]
    fn stale_then_resolved() {
        let now = 100 * MIN;
        let mut tracker = CategoryTracker::new();
        tracker.mark_required(BackupCategory::Widgets, now - 31 * MIN);
        assert!(tracker.is_stale(BackupCategory::Widgets, now, THRESHOLD));

        tracker.mark_synced(BackupCategory::Widgets, now);
        assert!(!tracker.is_stale(BackupCategory::Widgets, now, THRESHOLD));
        assert_eq!(
            tracker.get(BackupCategory::Widgets).last_sync_completed_at,
            Some(now)
        );
    }

    #[test]
    fn threshold_is_strict() {
        let mut tracker = CategoryTracker::new();
        tracker.mark_required(BackupCategory::Metadata, 0);
        assert!(!tracker.is_stale(BackupCategory::Metadata, THRESHOLD, THRESHOLD));
        assert!(tracker.is_stale(BackupCategory::Metadata, THRESHOLD + 1, THRESHOLD));
    }

    #[test]
    fn partial_sync_restarts_clock() {
        let mut tracker = CategoryTracker::new();
        tracker.mark_required(BackupCategory::Blocktank, 1_000);
        tracker.mark_partially_synced(BackupCategory::Blocktank, 8_000, 6_000);
        let state = tracker.get(BackupCategory::Blocktank);
        assert!(!state.synced);
        assert_eq!(state.sync_required_since, Some(6_000));
        assert_eq!(state.last_sync_completed_at, Some(8_000));
    }

    #[test]
    fn categories_are_independent() {
        let mut tracker = CategoryTracker::new();
        tracker.mark_required(BackupCategory::Settings, 0);
        tracker.mark_required(BackupCategory::LdkActivity, 10 * MIN);
        let stale = stale_categories(tracker.states(), 35 * MIN, THRESHOLD);
        assert_eq!(stale, vec![BackupCategory::Settings]);
        tracker.mark_synced(BackupCategory::Settings, 35 * MIN);
        assert!(tracker.is_synced(BackupCategory::Settings));
        assert!(!tracker.is_synced(BackupCategory::LdkActivity));
    }

    #[test]
    fn from_states_repairs_invariant() {
        let mut states = CategoryMap::<CategorySyncState>::default();
        states[BackupCategory::Settings] = CategorySyncState {
            synced: true,
            sync_required_since: Some(5),
            last_sync_completed_at: None,
        };
        let tracker = CategoryTracker::from_states(states);
        assert_eq!(tracker.get(BackupCategory::Settings).sync_required_since, None);
    }
}
