//! Backup runtime: one task that owns the tracker and drives every write.
//!
//! The application talks to it through a cloneable [`BackupHandle`];
//! readers that only need sync state watch tracker snapshots instead.
pub(crate) mod effect;
mod executor;
mod r#loop;
pub(crate) mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use walletsync_transport::ConnectionState;

use crate::category::{BackupCategory, CategoryMap};
use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::external::SnapshotSource;
use crate::history::{self, BackupListing};
use crate::persist::TrackerPersistence;
use crate::store::ReplicatedStore;
use crate::tracker::{CategorySyncState, CategoryTracker};
use crate::types::{BackupBlob, Clock, Timestamp};

use state::OrchestratorState;

/// The store handle of the current connection, if any. Replaced on every
/// fresh connection, cleared while disconnected.
pub type StoreSlot = watch::Receiver<Option<Arc<dyn ReplicatedStore>>>;

// ── Status ────────────────────────────────────────────────────────────

/// Where a category is in its write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Synced,
    Required,
    Writing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryStatus {
    pub state: CategorySyncState,
    pub phase: SyncPhase,
    pub debounce_pending: bool,
    /// Sequence number of the most recent write (0 if none this session).
    pub last_seq: u64,
}

// ── Events (runtime → app) ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    WriteDispatched {
        category: BackupCategory,
        seq: u64,
    },
    /// Write `seq` landed. `complete` is false when newer mutations arrived
    /// while it was in flight, so the category is still required.
    Synced {
        category: BackupCategory,
        seq: u64,
        complete: bool,
    },
    WriteFailed {
        category: BackupCategory,
        seq: u64,
        reason: String,
    },
    /// An older write finished after a newer one was dispatched.
    StaleCompletionIgnored {
        category: BackupCategory,
        seq: u64,
        latest: u64,
    },
    WarningRaised {
        stale: Vec<BackupCategory>,
    },
    WarningCleared,
    TransportStateChanged(ConnectionState),
}

// ── Commands (app → runtime) ─────────────────────────────────────────

pub(crate) enum BackupCommand {
    NotifyMutation {
        category: BackupCategory,
    },
    SyncNow {
        category: BackupCategory,
    },
    Status {
        reply: oneshot::Sender<CategoryMap<CategoryStatus>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

// ── BackupHandle (app-facing API) ────────────────────────────────────

/// Handle to a running backup runtime. Cheap to clone.
#[derive(Clone)]
pub struct BackupHandle {
    cmd_tx: mpsc::Sender<BackupCommand>,
    tracker_rx: watch::Receiver<CategoryMap<CategorySyncState>>,
    store_rx: StoreSlot,
    config: Arc<BackupConfig>,
}

impl BackupHandle {
    /// Local state of `category` changed; its remote copy is now outdated.
    pub async fn notify_mutation(&self, category: BackupCategory) -> Result<(), BackupError> {
        self.send(BackupCommand::NotifyMutation { category }).await
    }

    /// Write `category` now, skipping the debounce quiet period.
    pub async fn sync_now(&self, category: BackupCategory) -> Result<(), BackupError> {
        self.send(BackupCommand::SyncNow { category }).await
    }

    /// Current status of every category.
    pub async fn status(&self) -> Result<CategoryMap<CategoryStatus>, BackupError> {
        let (reply, rx) = oneshot::channel();
        self.send(BackupCommand::Status { reply }).await?;
        rx.await.map_err(|_| BackupError::ShutDown)
    }

    /// Tracker snapshots, updated after every change.
    pub fn tracker(&self) -> watch::Receiver<CategoryMap<CategorySyncState>> {
        self.tracker_rx.clone()
    }

    /// The store handle of the current connection.
    pub fn store(&self) -> Option<Arc<dyn ReplicatedStore>> {
        self.store_rx.borrow().clone()
    }

    fn connected_store(&self) -> Result<Arc<dyn ReplicatedStore>, BackupError> {
        self.store().ok_or(BackupError::NotConnected)
    }

    /// Stored backups of `category` on the configured network, newest first.
    pub async fn list_backups(&self, category: BackupCategory) -> Result<Vec<BackupListing>, BackupError> {
        let store = self.connected_store()?;
        history::list_backups(store.as_ref(), category, self.config.network).await
    }

    pub async fn fetch_backup(
        &self,
        timestamp: Timestamp,
        category: BackupCategory,
    ) -> Result<BackupBlob, BackupError> {
        let store = self.connected_store()?;
        history::fetch_backup(store.as_ref(), timestamp, category, self.config.network).await
    }

    pub async fn fetch_latest(
        &self,
        category: BackupCategory,
    ) -> Result<Option<(Timestamp, BackupBlob)>, BackupError> {
        let store = self.connected_store()?;
        history::fetch_latest(store.as_ref(), category, self.config.network).await
    }

    /// Stop the runtime: pending timers are cancelled and the tracker is
    /// frozen. Resolves once the loop has exited.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.cmd_tx.send(BackupCommand::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    async fn send(&self, cmd: BackupCommand) -> Result<(), BackupError> {
        self.cmd_tx.send(cmd).await.map_err(|_| BackupError::ShutDown)
    }
}

// ── BackupRuntime ────────────────────────────────────────────────────

/// Everything the runtime needs from the session.
pub struct RuntimeParts {
    pub config: BackupConfig,
    /// Restored tracker state.
    pub tracker: CategoryTracker,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub persistence: Arc<dyn TrackerPersistence>,
    /// Key the tracker is persisted under.
    pub identity_key: String,
    pub store: StoreSlot,
    /// Channel-state snapshots from the Lightning node.
    pub node_snapshots: mpsc::UnboundedReceiver<BackupBlob>,
    pub clock: Clock,
    /// Shared with the escalation monitor so it can report warnings.
    pub events: mpsc::Sender<BackupEvent>,
    pub cancel: CancellationToken,
}

pub struct BackupRuntime;

impl BackupRuntime {
    /// Spawn the runtime loop on `tasks`.
    pub fn spawn(parts: RuntimeParts, tasks: &TaskTracker) -> BackupHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (tracker_tx, tracker_rx) = watch::channel(parts.tracker.states().clone());
        let config = Arc::new(parts.config);

        let state = OrchestratorState::new(config.network, parts.tracker);
        let io = executor::RuntimeIo::new(
            parts.snapshots,
            parts.persistence,
            parts.identity_key,
            parts.events,
            tracker_tx,
            tasks.clone(),
            parts.cancel.clone(),
        );

        tasks.spawn(r#loop::runtime_loop(
            state,
            io,
            config.clone(),
            parts.clock,
            cmd_rx,
            parts.store.clone(),
            parts.node_snapshots,
            parts.cancel,
        ));

        BackupHandle {
            cmd_tx,
            tracker_rx,
            store_rx: parts.store,
            config,
        }
    }
}
