use std::sync::Arc;

use crate::socket::RelaySocket;

/// Lifecycle of the single logical relay connection.
///
/// `Disconnected → Connecting → Connected → Reconnecting → Connecting → …`
///
/// There is no failure state: the transport retries until it is torn down,
/// which is the only way to reach `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Disconnected, Closed)
                | (Connecting, Closed)
                | (Connected, Closed)
                | (Reconnecting, Closed)
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
            ConnectionState::Reconnecting => write!(f, "RECONNECTING"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Events the transport publishes to upper layers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A socket opened. `generation` increases on every successful
    /// (re)connect; dependents bind fresh state to the new socket.
    Open {
        generation: u64,
        socket: Arc<RelaySocket>,
    },
    /// The socket of `generation` closed.
    Close { generation: u64 },
    /// A connect attempt failed. Never fatal.
    Error { attempt: u64, reason: String },
    /// The connection state changed.
    StateChanged(ConnectionState),
}
