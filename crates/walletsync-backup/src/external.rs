//! Collaborators the engine consumes from the surrounding wallet: local
//! snapshot producers, the Lightning node's backup stream and the
//! user-notification sink.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::category::{BackupCategory, CategoryMap};
use crate::types::BackupBlob;

/// Serializes the current local state of a category.
///
/// Called lazily, when a debounce timer fires, so the blob reflects every
/// mutation up to that instant.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self, category: BackupCategory) -> BackupBlob;
}

impl<F> SnapshotSource for F
where
    F: Fn(BackupCategory) -> BackupBlob + Send + Sync,
{
    fn snapshot(&self, category: BackupCategory) -> BackupBlob {
        self(category)
    }
}

/// Snapshot source backed by an in-memory slot per category.
///
/// Clones share slots. Handy wherever the wallet state is simply "the last
/// blob somebody stored".
#[derive(Clone, Default)]
pub struct SharedSnapshots {
    slots: Arc<Mutex<CategoryMap<BackupBlob>>>,
}

impl SharedSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, category: BackupCategory, blob: impl Into<BackupBlob>) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())[category] = blob.into();
    }
}

impl SnapshotSource for SharedSnapshots {
    fn snapshot(&self, category: BackupCategory) -> BackupBlob {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())[category].clone()
    }
}

/// Callback invoked with every channel-state snapshot the node emits.
pub type NodeBackupCallback = Box<dyn Fn(BackupBlob) + Send + Sync>;

/// Opaque subscription token returned by [`NodeBackupStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// The Lightning node's own backup emitter. Fires at arbitrary times,
/// independent of the debounce cycle.
pub trait NodeBackupStream: Send + Sync {
    fn subscribe(&self, callback: NodeBackupCallback) -> SubscriptionHandle;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// In-process [`NodeBackupStream`]: whoever holds it can `emit`.
#[derive(Clone, Default)]
pub struct LocalNodeStream {
    inner: Arc<LocalNodeStreamInner>,
}

#[derive(Default)]
struct LocalNodeStreamInner {
    next: AtomicU64,
    subscribers: Mutex<Vec<(u64, Arc<NodeBackupCallback>)>>,
}

impl LocalNodeStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a snapshot to every subscriber. Returns how many were called.
    pub fn emit(&self, snapshot: BackupBlob) -> usize {
        let subscribers: Vec<_> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in &subscribers {
            cb(snapshot.clone());
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl NodeBackupStream for LocalNodeStream {
    fn subscribe(&self, callback: NodeBackupCallback) -> SubscriptionHandle {
        let id = self.inner.next.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _)| *id != handle.0);
    }
}

/// User-visible notifications. Fire-and-forget.
pub trait WarningSink: Send + Sync {
    fn show_warning(&self, title: &str, message: &str);

    fn show_error(&self, title: &str, message: &str);
}

/// Sink that only logs. Used by headless deployments and the stress tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingWarningSink;

impl WarningSink for TracingWarningSink {
    fn show_warning(&self, title: &str, message: &str) {
        tracing::warn!(%title, "{message}");
    }

    fn show_error(&self, title: &str, message: &str) {
        tracing::error!(%title, "{message}");
    }
}
