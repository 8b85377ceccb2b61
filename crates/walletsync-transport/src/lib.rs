//! Reconnecting relay transport for wallet backup replication.
//!
//! Owns one logical connection to a relay endpoint and keeps it alive:
//! when the socket closes, a single reconnect loop retries on a fixed delay
//! until a new socket opens. Connection failures are never surfaced as
//! errors to callers; they only show up as [`TransportEvent`]s.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use walletsync_transport::{RelayTransport, TransportConfig, TransportEvent, WsConnector};
//!
//! # async fn example() {
//! let transport = RelayTransport::new(WsConnector, TransportConfig::new());
//! let mut events = transport.events();
//! transport.start();
//!
//! while let Ok(event) = events.recv().await {
//!     if let TransportEvent::Open { generation, socket } = event {
//!         println!("socket {} open (generation {generation})", socket.id());
//!     }
//! }
//! # }
//! ```

mod config;
mod error;
mod memory;
mod socket;
mod state;
mod transport;
mod ws;

pub use config::{
    TransportConfig, DEFAULT_MAX_LISTENERS, DEFAULT_RECONNECT_DELAY, DEFAULT_RELAY_URL,
    DEFAULT_SOCKET_LISTENERS,
};
pub use error::TransportError;
pub use memory::MemoryConnector;
pub use socket::{Connector, RelaySocket, SocketPeer};
pub use state::{ConnectionState, TransportEvent};
pub use transport::RelayTransport;
pub use ws::WsConnector;
