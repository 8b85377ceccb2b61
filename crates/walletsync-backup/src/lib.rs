//! Remote backup synchronization for a Bitcoin/Lightning wallet.
//!
//! Local wallet state is split into independent [`BackupCategory`]s. A
//! mutation marks its category required; after a quiet period the
//! category's current snapshot is written to a replicated store reached
//! through a reconnecting relay connection. The Lightning node's own
//! channel-state snapshots skip the quiet period and are written as they
//! arrive. Categories that stay unsynced for too long raise a repeated
//! user-visible warning until they recover.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use walletsync_backup::*;
//! use walletsync_transport::{TransportConfig, WsConnector};
//!
//! # async fn example() -> Result<(), BackupError> {
//! let snapshots = SharedSnapshots::new();
//! let deps = SessionDeps {
//!     identity: Arc::new(StaticIdentity(WalletIdentity::from_seed([1; 32]))),
//!     snapshots: Arc::new(snapshots.clone()),
//!     node_stream: Arc::new(LocalNodeStream::new()),
//!     warnings: Arc::new(TracingWarningSink),
//!     persistence: Arc::new(SqlitePersistence::open("backup-state.db")?),
//! };
//! let session = BackupSession::start(WsConnector, TransportConfig::new(), BackupConfig::default(), deps).await?;
//! let backups = session.handle();
//!
//! snapshots.set(BackupCategory::Settings, b"{\"currency\":\"EUR\"}".to_vec());
//! backups.notify_mutation(BackupCategory::Settings).await?;
//!
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod category;
pub mod config;
pub mod error;
pub mod external;
pub mod history;
pub mod identity;
pub mod monitor;
pub mod persist;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tracker;
pub mod types;

pub use category::{BackupCategory, CategoryMap};
pub use config::{
    BackupConfig, RetryPolicy, BACKUP_CHECK_INTERVAL, DEBOUNCE_QUIET_PERIOD,
    FAILED_BACKUP_CHECK_TIME, FAILED_BACKUP_NOTIFICATION_INTERVAL, STORE_REQUEST_TIMEOUT,
};
pub use error::BackupError;
pub use external::{
    LocalNodeStream, NodeBackupCallback, NodeBackupStream, SharedSnapshots, SnapshotSource,
    SubscriptionHandle, TracingWarningSink, WarningSink,
};
pub use history::{
    backup_key, fetch_backup, fetch_latest, list_backups, write_backup, BackupListing,
    BackupRecord,
};
pub use identity::{verify_signature, IdentityProvider, StaticIdentity, WalletIdentity};
pub use monitor::{EscalationMonitor, MonitorSettings};
pub use persist::{MemoryPersistence, SqlitePersistence, TrackerPersistence};
pub use runtime::{
    BackupEvent, BackupHandle, BackupRuntime, CategoryStatus, RuntimeParts, StoreSlot, SyncPhase,
};
pub use scheduler::{DebounceScheduler, Producer};
pub use session::{BackupSession, SessionDeps};
pub use store::{GetOptions, KeyRange, MemoryStore, RelayStoreClient, ReplicatedStore, StoreEntry};
pub use tracker::{stale_categories, CategorySyncState, CategoryTracker};
pub use types::{now_ms, BackupBlob, Clock, Timestamp, WalletNetwork};
