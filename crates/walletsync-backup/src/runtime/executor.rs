//! Effect executor: the only place that touches the store, the
//! persistence layer and the outbound channels.
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::category::{BackupCategory, CategoryMap};
use crate::error::BackupError;
use crate::external::SnapshotSource;
use crate::history::{self, BackupRecord};
use crate::persist::TrackerPersistence;
use crate::scheduler::{DebounceScheduler, Producer};
use crate::store::ReplicatedStore;
use crate::tracker::CategorySyncState;
use crate::types::BackupBlob;

use super::effect::BackupEffect;
use super::state::OrchestratorState;
use super::BackupEvent;

/// Outcome of one dispatched write, routed back to the loop.
#[derive(Debug)]
pub(super) struct WriteResult {
    pub(super) category: BackupCategory,
    pub(super) seq: u64,
    pub(super) outcome: Result<(), String>,
}

pub(super) struct RuntimeIo {
    snapshots: Arc<dyn SnapshotSource>,
    persistence: Arc<dyn TrackerPersistence>,
    identity_key: String,
    events: mpsc::Sender<BackupEvent>,
    tracker_tx: watch::Sender<CategoryMap<CategorySyncState>>,
    pub(super) store: Option<Arc<dyn ReplicatedStore>>,
    results_tx: mpsc::UnboundedSender<WriteResult>,
    results_rx: Option<mpsc::UnboundedReceiver<WriteResult>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl RuntimeIo {
    pub(super) fn new(
        snapshots: Arc<dyn SnapshotSource>,
        persistence: Arc<dyn TrackerPersistence>,
        identity_key: String,
        events: mpsc::Sender<BackupEvent>,
        tracker_tx: watch::Sender<CategoryMap<CategorySyncState>>,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            snapshots,
            persistence,
            identity_key,
            events,
            tracker_tx,
            store: None,
            results_tx,
            results_rx: Some(results_rx),
            tasks,
            cancel,
        }
    }

    /// The receiving end of write outcomes. Taken once by the loop.
    pub(super) fn take_results(&mut self) -> Option<mpsc::UnboundedReceiver<WriteResult>> {
        self.results_rx.take()
    }

    /// Tracker that background work of this runtime is spawned on.
    pub(super) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Current local snapshot of `category`.
    pub(super) fn snapshot(&self, category: BackupCategory) -> BackupBlob {
        self.snapshots.snapshot(category)
    }

    /// Producer handed to the debounce scheduler: re-reads the snapshot
    /// source when the timer fires.
    fn producer(&self, category: BackupCategory) -> Producer {
        let snapshots = self.snapshots.clone();
        Arc::new(move || snapshots.snapshot(category))
    }

    pub(super) fn emit(&self, event: BackupEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!("backup event dropped: {e}");
        }
    }

    fn save_tracker(&self, states: &CategoryMap<CategorySyncState>) {
        if let Err(e) = self.persistence.save(&self.identity_key, states) {
            tracing::warn!("failed to persist backup tracker: {e}");
        }
        self.tracker_tx.send_replace(states.clone());
    }

    fn spawn_write(&self, category: BackupCategory, seq: u64, record: BackupRecord) {
        let store = self.store.clone();
        let results = self.results_tx.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let outcome = match store {
                None => Err(BackupError::NotConnected),
                Some(store) => tokio::select! {
                    _ = cancel.cancelled() => return,
                    written = history::write_backup(store.as_ref(), &record) => written.map(|_| ()),
                },
            };
            match &outcome {
                Ok(()) => tracing::debug!(%category, seq, "backup written"),
                Err(e) => tracing::warn!(%category, seq, "backup write failed: {e}"),
            }
            let _ = results.send(WriteResult {
                category,
                seq,
                outcome: outcome.map_err(|e| e.to_string()),
            });
        });
    }
}

/// Execute effects produced by the orchestrator state.
pub(super) fn execute_effects(
    effects: Vec<BackupEffect>,
    state: &OrchestratorState,
    scheduler: &mut DebounceScheduler,
    io: &RuntimeIo,
) {
    for effect in effects {
        match effect {
            BackupEffect::ArmDebounce(category) => {
                scheduler.schedule(category, io.producer(category));
            }
            BackupEffect::Write {
                category,
                seq,
                record,
            } => {
                tracing::debug!(%category, seq, bytes = record.payload.len(), "dispatching backup");
                io.spawn_write(category, seq, record);
            }
            BackupEffect::TrackerChanged => io.save_tracker(state.tracker().states()),
            BackupEffect::Emit(event) => io.emit(event),
        }
    }
}
