use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::TransportConfig;
use crate::socket::{Connector, RelaySocket};
use crate::state::{ConnectionState, TransportEvent};

/// One logical, self-healing connection to a relay endpoint.
///
/// After a socket closes, a single reconnect loop waits the configured delay
/// and retries until a new socket opens. Close reports that arrive while a
/// loop is running do not start another one. Every new socket gets a fresh
/// generation number and is published as [`TransportEvent::Open`].
#[derive(Clone)]
pub struct RelayTransport {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Box<dyn Connector>,
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    current: Mutex<Option<(u64, Arc<RelaySocket>)>>,
    reconnecting: AtomicBool,
    started: AtomicBool,
    generation: AtomicU64,
    attempts: AtomicU64,
    loops_started: AtomicU64,
    events: broadcast::Sender<TransportEvent>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RelayTransport {
    /// Create a transport. Nothing connects until [`start`](Self::start),
    /// so callers can subscribe to events first.
    pub fn new(connector: impl Connector, config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                connector: Box::new(connector),
                config,
                state,
                current: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                started: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                loops_started: AtomicU64::new(0),
                events,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Open the first socket. The first attempt is immediate; failures fall
    /// into the regular reconnect cycle. Calling twice has no effect.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.spawn_connect_loop(false);
    }

    /// Subscribe to transport events.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// The open socket and its generation, if connected.
    pub fn current_socket(&self) -> Option<(u64, Arc<RelaySocket>)> {
        self.inner.lock_current().clone()
    }

    /// Report that the socket of `generation` is unusable (a dependent saw a
    /// send fail, or the socket closed). Starts reconnecting unless a loop is
    /// already running or the report is about an older socket.
    pub fn report_closed(&self, generation: u64) {
        self.inner.handle_socket_lost(generation);
    }

    /// Number of successful opens so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Number of connect attempts so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Number of connect loops ever spawned (initial connect included).
    pub fn loops_started(&self) -> u64 {
        self.inner.loops_started.load(Ordering::Acquire)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Tear down: stop reconnecting, close the socket, wait for background
    /// tasks. Terminal.
    pub async fn close(&self) {
        self.inner.transition(ConnectionState::Closed);
        self.inner.shutdown.cancel();
        if let Some((_, socket)) = self.inner.lock_current().take() {
            socket.close();
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("relay transport closed");
    }
}

impl Inner {
    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<(u64, Arc<RelaySocket>)>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if current.can_transition(next) {
                previous = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });
        match previous {
            Some(from) => {
                tracing::debug!(%from, to = %next, "relay connection state");
                let _ = self.events.send(TransportEvent::StateChanged(next));
                true
            }
            None => false,
        }
    }

    /// Spawn the connect loop unless one is already in flight.
    fn spawn_connect_loop(self: &Arc<Self>, delay_first: bool) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("reconnect loop already active");
            return false;
        }
        self.loops_started.fetch_add(1, Ordering::AcqRel);
        let inner = Arc::clone(self);
        self.tasks.spawn(async move { inner.connect_loop(delay_first).await });
        true
    }

    async fn connect_loop(self: Arc<Self>, mut delay: bool) {
        loop {
            if delay {
                self.transition(ConnectionState::Reconnecting);
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                }
            }
            delay = true;

            self.transition(ConnectionState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.connector.connect(&self.config) => result,
            };

            match result {
                Ok(socket) => {
                    socket.set_max_listeners(self.config.max_listeners);
                    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    *self.lock_current() = Some((generation, socket.clone()));
                    self.reconnecting.store(false, Ordering::Release);
                    self.transition(ConnectionState::Connected);
                    tracing::info!(
                        generation,
                        attempt,
                        socket_id = socket.id(),
                        endpoint = %self.config.endpoint,
                        "relay connected"
                    );
                    let _ = self.events.send(TransportEvent::Open {
                        generation,
                        socket: socket.clone(),
                    });
                    self.spawn_close_watcher(generation, socket);
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, "relay connect failed: {e}");
                    let _ = self.events.send(TransportEvent::Error {
                        attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.reconnecting.store(false, Ordering::Release);
    }

    fn spawn_close_watcher(self: &Arc<Self>, generation: u64, socket: Arc<RelaySocket>) {
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {}
                _ = socket.closed() => inner.handle_socket_lost(generation),
            }
        });
    }

    fn handle_socket_lost(self: &Arc<Self>, generation: u64) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if generation < self.generation.load(Ordering::Acquire) {
            tracing::debug!(generation, "ignoring close of a replaced socket");
            return;
        }

        let lost = {
            let mut current = self.lock_current();
            match current.as_ref() {
                Some((g, _)) if *g == generation => current.take(),
                _ => None,
            }
        };
        if let Some((_, socket)) = lost {
            socket.close();
            tracing::info!(generation, "relay socket closed");
            let _ = self.events.send(TransportEvent::Close { generation });
        }

        self.spawn_connect_loop(true);
    }
}
