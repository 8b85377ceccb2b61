//! Session wiring: one backup engine per unlocked wallet identity.
//!
//! Start-up resolves the signing identity first. If that fails the user is
//! told once and nothing is spawned. Otherwise the session owns the relay
//! transport, the runtime loop, the escalation monitor and the node-stream
//! subscription, and tears all of them down together.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use walletsync_transport::{Connector, RelayTransport, TransportConfig, TransportEvent};

use crate::config::BackupConfig;
use crate::error::BackupError;
use crate::external::{NodeBackupStream, SnapshotSource, SubscriptionHandle, WarningSink};
use crate::identity::{IdentityProvider, WalletIdentity};
use crate::monitor::{EscalationMonitor, MonitorSettings};
use crate::persist::TrackerPersistence;
use crate::runtime::{BackupEvent, BackupHandle, BackupRuntime, RuntimeParts};
use crate::store::{RelayStoreClient, ReplicatedStore};
use crate::tracker::CategoryTracker;
use crate::types::Clock;

pub const IDENTITY_ERROR_TITLE: &str = "Backup unavailable";

/// Collaborators supplied by the wallet.
#[derive(Clone)]
pub struct SessionDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub node_stream: Arc<dyn NodeBackupStream>,
    pub warnings: Arc<dyn WarningSink>,
    pub persistence: Arc<dyn TrackerPersistence>,
}

pub struct BackupSession {
    handle: BackupHandle,
    events: Option<mpsc::Receiver<BackupEvent>>,
    transport: RelayTransport,
    namespace: String,
    node_stream: Arc<dyn NodeBackupStream>,
    subscription: SubscriptionHandle,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl BackupSession {
    /// Start the engine for the active wallet.
    pub async fn start(
        connector: impl Connector,
        transport_config: TransportConfig,
        config: BackupConfig,
        deps: SessionDeps,
    ) -> Result<Self, BackupError> {
        let identity = match deps.identity.signing_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::error!("cannot start backups: {e}");
                deps.warnings.show_error(
                    IDENTITY_ERROR_TITLE,
                    "The wallet key could not be loaded, so backups are paused until it is unlocked.",
                );
                return Err(match e {
                    BackupError::Identity(_) => e,
                    other => BackupError::Identity(other.to_string()),
                });
            }
        };
        let namespace = identity.namespace();

        let tracker = match deps.persistence.load(&namespace) {
            Ok(Some(states)) => CategoryTracker::from_states(states),
            Ok(None) => CategoryTracker::new(),
            Err(e) => {
                tracing::warn!("backup tracker not restored, starting fresh: {e}");
                CategoryTracker::new()
            }
        };

        let clock = Clock::new();
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (store_tx, store_rx) = watch::channel(None);

        let transport = RelayTransport::new(connector, transport_config);
        tasks.spawn(bind_store(
            transport.clone(),
            transport.events(),
            store_tx,
            identity,
            config.request_timeout,
            event_tx.clone(),
            cancel.clone(),
        ));

        let (node_tx, node_rx) = mpsc::unbounded_channel();
        let subscription = deps.node_stream.subscribe(Box::new(move |snapshot| {
            let _ = node_tx.send(snapshot);
        }));

        let monitor_settings = MonitorSettings::from(&config);
        let handle = BackupRuntime::spawn(
            RuntimeParts {
                config,
                tracker,
                snapshots: deps.snapshots,
                persistence: deps.persistence,
                identity_key: namespace.clone(),
                store: store_rx,
                node_snapshots: node_rx,
                clock,
                events: event_tx.clone(),
                cancel: cancel.clone(),
            },
            &tasks,
        );

        let monitor = EscalationMonitor::new(
            monitor_settings,
            handle.tracker(),
            deps.warnings,
            event_tx,
            clock,
        );
        tasks.spawn(monitor.run(cancel.clone()));

        transport.start();
        tracing::info!(namespace = %namespace, "backup session started");

        Ok(Self {
            handle,
            events: Some(event_rx),
            transport,
            namespace,
            node_stream: deps.node_stream,
            subscription,
            cancel,
            tasks,
        })
    }

    pub fn handle(&self) -> BackupHandle {
        self.handle.clone()
    }

    /// The event stream. Available once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<BackupEvent>> {
        self.events.take()
    }

    pub fn transport(&self) -> &RelayTransport {
        &self.transport
    }

    /// Store namespace of the wallet identity.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Tear everything down: freeze the tracker, cancel timers, unsubscribe
    /// from the node, close the relay connection.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
        self.cancel.cancel();
        self.node_stream.unsubscribe(self.subscription);
        self.transport.close().await;
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!(namespace = %self.namespace, "backup session stopped");
    }
}

impl Drop for BackupSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keep the store slot bound to the transport's current socket: a fresh
/// client per connection, nothing while disconnected.
async fn bind_store(
    transport: RelayTransport,
    mut events: broadcast::Receiver<TransportEvent>,
    store_tx: watch::Sender<Option<Arc<dyn ReplicatedStore>>>,
    identity: WalletIdentity,
    request_timeout: Duration,
    event_tx: mpsc::Sender<BackupEvent>,
    cancel: CancellationToken,
) {
    let mut bound: Option<u64> = None;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(TransportEvent::Open { generation, socket }) => {
                match RelayStoreClient::new(socket, identity.clone(), request_timeout) {
                    Ok(client) => {
                        tracing::debug!(generation, socket = client.socket_id(), "store bound");
                        bound = Some(generation);
                        store_tx.send_replace(Some(client as Arc<dyn ReplicatedStore>));
                    }
                    Err(e) => {
                        tracing::warn!(generation, "cannot bind store: {e}");
                        transport.report_closed(generation);
                    }
                }
            }
            Ok(TransportEvent::Close { generation }) => {
                if bound == Some(generation) {
                    bound = None;
                    store_tx.send_replace(None);
                }
            }
            Ok(TransportEvent::StateChanged(state)) => {
                let _ = event_tx.try_send(BackupEvent::TransportStateChanged(state));
            }
            Ok(TransportEvent::Error { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "transport events lagged, rebinding store");
                match transport.current_socket() {
                    Some((generation, socket)) if bound != Some(generation) => {
                        if let Ok(client) = RelayStoreClient::new(socket, identity.clone(), request_timeout) {
                            bound = Some(generation);
                            store_tx.send_replace(Some(client as Arc<dyn ReplicatedStore>));
                        }
                    }
                    Some(_) => {}
                    None => {
                        bound = None;
                        store_tx.send_replace(None);
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    store_tx.send_replace(None);
}
