use crate::category::BackupCategory;
use crate::history::BackupRecord;

use super::BackupEvent;

/// Intention produced by the pure orchestrator state.
///
/// The loop executes these against the scheduler, the store and the
/// outbound channels.
#[derive(Debug)]
pub(crate) enum BackupEffect {
    /// (Re)arm the debounce timer of a category.
    ArmDebounce(BackupCategory),

    /// Put a backup record. The outcome comes back tagged with `seq`.
    Write {
        category: BackupCategory,
        seq: u64,
        record: BackupRecord,
    },

    /// Tracker changed: persist it and publish a snapshot to readers.
    TrackerChanged,

    /// Surface an event to the application.
    Emit(BackupEvent),
}
