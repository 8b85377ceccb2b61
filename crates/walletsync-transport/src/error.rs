/// Errors returned by the relay transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid relay endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("socket {socket_id} is closed")]
    SocketClosed { socket_id: u64 },

    #[error("socket {socket_id} listener limit reached ({max})")]
    TooManyListeners { socket_id: u64, max: usize },

    #[error("transport is shut down")]
    Shutdown,
}
