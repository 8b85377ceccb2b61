//! Orchestrator state: pure logic, no async, no store access.
//!
//! Every `handle_*` method returns `Vec<BackupEffect>`; the loop executes
//! them. Only this struct mutates the tracker.
use crate::category::{BackupCategory, CategoryMap};
use crate::history::BackupRecord;
use crate::tracker::CategoryTracker;
use crate::types::{BackupBlob, Timestamp, WalletNetwork};

use super::effect::BackupEffect;
use super::{BackupEvent, CategoryStatus, SyncPhase};

/// Write bookkeeping for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WriteSlot {
    /// Sequence number of the most recently dispatched write.
    pub(crate) last_seq: u64,
    /// Writes dispatched and not yet completed.
    pub(crate) in_flight: u32,
    /// Bumped on every local mutation.
    pub(crate) revision: u64,
    /// `revision` as of the last dispatch.
    pub(crate) dispatched_revision: u64,
    /// First mutation since the last dispatch.
    pub(crate) redirtied_at: Option<Timestamp>,
}

pub(crate) struct OrchestratorState {
    network: WalletNetwork,
    tracker: CategoryTracker,
    slots: CategoryMap<WriteSlot>,
    cancelled: bool,
}

impl OrchestratorState {
    pub(crate) fn new(network: WalletNetwork, tracker: CategoryTracker) -> Self {
        Self {
            network,
            tracker,
            slots: CategoryMap::default(),
            cancelled: false,
        }
    }

    pub(crate) fn tracker(&self) -> &CategoryTracker {
        &self.tracker
    }

    /// Teardown started. Every later handler is a no-op.
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    // ── Local mutation ───────────────────────────────────────────────────

    /// A local mutation invalidated the remote copy of `category`.
    ///
    /// Debounced categories get their timer re-armed. The channel-state
    /// category is written by the caller right away.
    pub(crate) fn handle_mutation(&mut self, category: BackupCategory, now: Timestamp) -> Vec<BackupEffect> {
        if self.cancelled {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.mark_dirty(category, now) {
            effects.push(BackupEffect::TrackerChanged);
        }
        if category.is_debounced() {
            effects.push(BackupEffect::ArmDebounce(category));
        }
        effects
    }

    fn mark_dirty(&mut self, category: BackupCategory, now: Timestamp) -> bool {
        let before = *self.tracker.get(category);
        self.tracker.mark_required(category, now);
        let slot = &mut self.slots[category];
        slot.revision += 1;
        if slot.redirtied_at.is_none() {
            slot.redirtied_at = Some(now);
        }
        before != *self.tracker.get(category)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// Start a write of `blob`. Runs even if the category is already
    /// synced: puts are idempotent.
    pub(crate) fn begin_write(
        &mut self,
        category: BackupCategory,
        blob: BackupBlob,
        now: Timestamp,
    ) -> Vec<BackupEffect> {
        if self.cancelled {
            return Vec::new();
        }
        let slot = &mut self.slots[category];
        slot.last_seq += 1;
        slot.in_flight += 1;
        slot.dispatched_revision = slot.revision;
        slot.redirtied_at = None;
        let seq = slot.last_seq;

        let record = BackupRecord::new(category, self.network, now, blob);
        vec![
            BackupEffect::Emit(BackupEvent::WriteDispatched { category, seq }),
            BackupEffect::Write {
                category,
                seq,
                record,
            },
        ]
    }

    /// The Lightning node emitted a channel-state snapshot: mark and write
    /// it immediately, outside the debounce cycle.
    pub(crate) fn handle_node_snapshot(&mut self, blob: BackupBlob, now: Timestamp) -> Vec<BackupEffect> {
        if self.cancelled {
            return Vec::new();
        }
        let category = BackupCategory::LdkChannelState;
        let mut effects = Vec::new();
        if self.mark_dirty(category, now) {
            effects.push(BackupEffect::TrackerChanged);
        }
        effects.extend(self.begin_write(category, blob, now));
        effects
    }

    // ── Completion ───────────────────────────────────────────────────────

    /// Apply the outcome of write `seq`.
    ///
    /// Only the most recently dispatched write may touch the tracker; an
    /// older write finishing late is reported and otherwise ignored.
    pub(crate) fn handle_write_result(
        &mut self,
        category: BackupCategory,
        seq: u64,
        outcome: Result<(), String>,
        now: Timestamp,
    ) -> Vec<BackupEffect> {
        if self.cancelled {
            return Vec::new();
        }
        let slot = &mut self.slots[category];
        slot.in_flight = slot.in_flight.saturating_sub(1);
        if seq != slot.last_seq {
            return vec![BackupEffect::Emit(BackupEvent::StaleCompletionIgnored {
                category,
                seq,
                latest: slot.last_seq,
            })];
        }

        match outcome {
            Ok(()) => {
                let complete = slot.revision == slot.dispatched_revision;
                if complete {
                    self.tracker.mark_synced(category, now);
                } else {
                    let since = slot.redirtied_at.unwrap_or(now);
                    self.tracker.mark_partially_synced(category, now, since);
                }
                vec![
                    BackupEffect::TrackerChanged,
                    BackupEffect::Emit(BackupEvent::Synced {
                        category,
                        seq,
                        complete,
                    }),
                ]
            }
            Err(reason) => vec![BackupEffect::Emit(BackupEvent::WriteFailed {
                category,
                seq,
                reason,
            })],
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Categories a periodic retry should re-dispatch: required, idle, and
    /// not waiting on a debounce timer.
    pub(crate) fn retry_candidates(&self, debounce_pending: impl Fn(BackupCategory) -> bool) -> Vec<BackupCategory> {
        if self.cancelled {
            return Vec::new();
        }
        self.tracker
            .required()
            .filter(|c| self.slots[*c].in_flight == 0 && !debounce_pending(*c))
            .collect()
    }

    pub(crate) fn status(&self, debounce_pending: impl Fn(BackupCategory) -> bool) -> CategoryMap<CategoryStatus> {
        CategoryMap::from_fn(|category| {
            let state = *self.tracker.get(category);
            let slot = &self.slots[category];
            let phase = if slot.in_flight > 0 {
                SyncPhase::Writing
            } else if state.synced {
                SyncPhase::Synced
            } else {
                SyncPhase::Required
            };
            CategoryStatus {
                state,
                phase,
                debounce_pending: debounce_pending(category),
                last_seq: slot.last_seq,
            }
        })
    }
}
