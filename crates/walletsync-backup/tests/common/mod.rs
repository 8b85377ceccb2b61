//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use walletsync_backup::store::wire::{self, StoreOp, StoreReply, StoreRequest, StoreResponse};
use walletsync_backup::*;
use walletsync_transport::SocketPeer;

pub const START_MS: u64 = 1_700_000_000_000;
pub const MINUTE: Duration = Duration::from_secs(60);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

pub fn test_config() -> BackupConfig {
    BackupConfig::default()
        .network(WalletNetwork::Regtest)
        .escalation_enabled(true)
}

pub fn identity(seed: u8) -> WalletIdentity {
    WalletIdentity::from_seed([seed; 32])
}

// ── Warning sink ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingWarningSink {
    log: Arc<Mutex<SinkLog>>,
}

#[derive(Default)]
struct SinkLog {
    warnings: Vec<(String, String)>,
    errors: Vec<(String, String)>,
}

impl RecordingWarningSink {
    pub fn warnings(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().warnings.clone()
    }

    pub fn warning_count(&self) -> usize {
        self.log.lock().unwrap().warnings.len()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().errors.clone()
    }
}

impl WarningSink for RecordingWarningSink {
    fn show_warning(&self, title: &str, message: &str) {
        self.log
            .lock()
            .unwrap()
            .warnings
            .push((title.to_string(), message.to_string()));
    }

    fn show_error(&self, title: &str, message: &str) {
        self.log
            .lock()
            .unwrap()
            .errors
            .push((title.to_string(), message.to_string()));
    }
}

// ── Runtime harness (no transport) ───────────────────────────────────────

pub struct RuntimeHarness {
    pub handle: BackupHandle,
    pub events: mpsc::Receiver<BackupEvent>,
    pub store: MemoryStore,
    pub snapshots: SharedSnapshots,
    pub node_tx: mpsc::UnboundedSender<BackupBlob>,
    pub store_tx: watch::Sender<Option<Arc<dyn ReplicatedStore>>>,
    pub persistence: Arc<MemoryPersistence>,
    pub cancel: CancellationToken,
    pub tasks: TaskTracker,
}

pub const WALLET: &str = "test-wallet";

pub fn spawn_runtime(config: BackupConfig) -> RuntimeHarness {
    spawn_runtime_with(config, CategoryTracker::new())
}

/// Runtime bound to an in-memory store that is "connected" from the start.
pub fn spawn_runtime_with(config: BackupConfig, tracker: CategoryTracker) -> RuntimeHarness {
    let store = MemoryStore::new();
    let snapshots = SharedSnapshots::new();
    let persistence = Arc::new(MemoryPersistence::new());
    let (store_tx, store_rx) =
        watch::channel(Some(Arc::new(store.clone()) as Arc<dyn ReplicatedStore>));
    let (node_tx, node_rx) = mpsc::unbounded_channel();
    let (event_tx, events) = mpsc::channel(1024);
    let cancel = CancellationToken::new();
    let tasks = TaskTracker::new();

    let handle = BackupRuntime::spawn(
        RuntimeParts {
            config,
            tracker,
            snapshots: Arc::new(snapshots.clone()),
            persistence: persistence.clone(),
            identity_key: WALLET.to_string(),
            store: store_rx,
            node_snapshots: node_rx,
            clock: Clock::starting_at(START_MS),
            events: event_tx,
            cancel: cancel.clone(),
        },
        &tasks,
    );

    RuntimeHarness {
        handle,
        events,
        store,
        snapshots,
        node_tx,
        store_tx,
        persistence,
        cancel,
        tasks,
    }
}

impl RuntimeHarness {
    /// Store a new local snapshot and report the mutation.
    pub async fn mutate(&self, category: BackupCategory, payload: &str) {
        self.snapshots.set(category, payload.as_bytes().to_vec());
        self.handle.notify_mutation(category).await.unwrap();
    }

    pub async fn phase(&self, category: BackupCategory) -> SyncPhase {
        self.handle.status().await.unwrap()[category].phase
    }

    /// Payloads written for `category`, in completion order.
    pub fn written(&self, category: BackupCategory) -> Vec<Vec<u8>> {
        payloads(&self.store, WalletNetwork::Regtest, category)
    }

    /// Every event received so far.
    pub fn drain_events(&mut self) -> Vec<BackupEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Decoded payloads of every put under the category directory.
pub fn payloads(store: &MemoryStore, network: WalletNetwork, category: BackupCategory) -> Vec<Vec<u8>> {
    let dir = format!("backups/{network}/{category}/");
    store
        .puts_under(&dir)
        .into_iter()
        .map(|(_, bytes)| BackupRecord::from_bytes(&bytes).unwrap().payload)
        .collect()
}

/// Wait (in virtual time) for the first event matching `pred`.
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<BackupEvent>,
    pred: impl Fn(&BackupEvent) -> bool,
) -> BackupEvent {
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed within an hour")
}

// ── In-process relay ─────────────────────────────────────────────────────

/// Serve every accepted socket from `store`, verifying write signatures.
pub fn spawn_relay(
    mut accepted: mpsc::UnboundedReceiver<SocketPeer>,
    store: MemoryStore,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(peer) = accepted.recv().await {
            tokio::spawn(serve_peer(peer, store.clone()));
        }
    })
}

async fn serve_peer(mut peer: SocketPeer, store: MemoryStore) {
    while let Some(frame) = peer.recv().await {
        let Ok(request) = StoreRequest::from_bytes(&frame) else {
            continue;
        };
        let result = apply(&store, &request).await;
        let response = StoreResponse {
            id: request.id,
            result,
        };
        peer.deliver(response.to_bytes().unwrap());
    }
}

async fn apply(store: &MemoryStore, request: &StoreRequest) -> Result<StoreReply, String> {
    let ns = request.namespace.as_str();
    match &request.op {
        StoreOp::Get { key, skip_cache } => store
            .get(key, GetOptions { skip_cache: *skip_cache })
            .await
            .map(StoreReply::Value)
            .map_err(|e| e.to_string()),
        StoreOp::Put {
            key,
            value,
            signature,
        } => {
            if !verify_signature(ns, &wire::put_signable(ns, key, value), signature) {
                return Err("invalid signature".into());
            }
            store
                .put(key, value.clone())
                .await
                .map(|_| StoreReply::Done)
                .map_err(|e| e.to_string())
        }
        StoreOp::Del { key, signature } => {
            if !verify_signature(ns, &wire::del_signable(ns, key), signature) {
                return Err("invalid signature".into());
            }
            store
                .del(key)
                .await
                .map(|_| StoreReply::Done)
                .map_err(|e| e.to_string())
        }
        StoreOp::List { range } => store
            .list(range.clone())
            .await
            .map(StoreReply::Entries)
            .map_err(|e| e.to_string()),
    }
}
