use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::{TransportConfig, DEFAULT_SOCKET_LISTENERS};
use crate::TransportError;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// One open relay socket, as seen by its users.
///
/// Frames are opaque byte vectors. Outgoing frames queue to the connector's
/// pump; incoming frames fan out to every subscribed listener. The number of
/// listeners is capped, and the transport raises the cap on each fresh
/// socket before handing it out.
pub struct RelaySocket {
    id: u64,
    outgoing: mpsc::Sender<Vec<u8>>,
    incoming: broadcast::Sender<Vec<u8>>,
    max_listeners: AtomicUsize,
    closed: CancellationToken,
}

/// The far side of a [`RelaySocket`]: driven by a connector's I/O pump,
/// or by an in-process relay in tests.
pub struct SocketPeer {
    socket_id: u64,
    outgoing: mpsc::Receiver<Vec<u8>>,
    incoming: broadcast::Sender<Vec<u8>>,
    closed: CancellationToken,
}

impl RelaySocket {
    /// Create a connected socket/peer pair.
    pub fn channel(send_buffer: usize, recv_buffer: usize) -> (Arc<RelaySocket>, SocketPeer) {
        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        let (out_tx, out_rx) = mpsc::channel(send_buffer.max(1));
        let (in_tx, _) = broadcast::channel(recv_buffer.max(1));
        let closed = CancellationToken::new();

        let socket = Arc::new(RelaySocket {
            id,
            outgoing: out_tx,
            incoming: in_tx.clone(),
            max_listeners: AtomicUsize::new(DEFAULT_SOCKET_LISTENERS),
            closed: closed.clone(),
        });
        let peer = SocketPeer {
            socket_id: id,
            outgoing: out_rx,
            incoming: in_tx,
            closed,
        };
        (socket, peer)
    }

    /// Process-unique socket id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame for the relay.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::SocketClosed { socket_id: self.id });
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransportError::SocketClosed { socket_id: self.id }),
            sent = self.outgoing.send(frame) => {
                sent.map_err(|_| TransportError::SocketClosed { socket_id: self.id })
            }
        }
    }

    /// Register a listener for incoming frames.
    ///
    /// Listeners should also watch [`closed()`](Self::closed): the fan-out
    /// channel itself does not end when the socket closes.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Vec<u8>>, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::SocketClosed { socket_id: self.id });
        }
        let max = self.max_listeners.load(Ordering::Acquire);
        if self.incoming.receiver_count() >= max {
            return Err(TransportError::TooManyListeners {
                socket_id: self.id,
                max,
            });
        }
        Ok(self.incoming.subscribe())
    }

    pub fn set_max_listeners(&self, max: usize) {
        self.max_listeners.store(max, Ordering::Release);
    }

    pub fn max_listeners(&self) -> usize {
        self.max_listeners.load(Ordering::Acquire)
    }

    /// Number of currently subscribed listeners.
    pub fn listener_count(&self) -> usize {
        self.incoming.receiver_count()
    }

    /// Resolves once the socket is closed, from either side.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the socket. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for RelaySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySocket")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl SocketPeer {
    pub fn socket_id(&self) -> u64 {
        self.socket_id
    }

    /// Next frame the socket owner sent. `None` once the socket is closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            frame = self.outgoing.recv() => frame,
            _ = self.closed.cancelled() => None,
        }
    }

    /// Push a frame to every listener. Returns how many received it.
    pub fn deliver(&self, frame: Vec<u8>) -> usize {
        if self.closed.is_cancelled() {
            return 0;
        }
        self.incoming.send(frame).unwrap_or(0)
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Opens relay sockets.
///
/// In production: [`WsConnector`](crate::WsConnector) (WebSocket).
/// In tests and simulations: [`MemoryConnector`](crate::MemoryConnector).
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &TransportConfig) -> Result<Arc<RelaySocket>, TransportError>;
}
