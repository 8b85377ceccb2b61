//! In-process relay connector.
//!
//! Hands the far side of every accepted socket to whoever holds the
//! acceptor channel, so tests and simulations can play the relay.
//! Connect failures and outages are scripted.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::TransportConfig;
use crate::socket::{Connector, RelaySocket, SocketPeer};
use crate::TransportError;

#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    accepted: mpsc::UnboundedSender<SocketPeer>,
    failures_remaining: AtomicU64,
    online: AtomicBool,
    attempts: AtomicU64,
    live: Mutex<Vec<Arc<RelaySocket>>>,
}

impl MemoryConnector {
    /// Create a connector and the channel on which accepted sockets arrive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(MemoryInner {
                accepted: tx,
                failures_remaining: AtomicU64::new(0),
                online: AtomicBool::new(true),
                attempts: AtomicU64::new(0),
                live: Mutex::new(Vec::new()),
            }),
        };
        (connector, rx)
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_next(&self, count: u64) {
        self.inner.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// While offline, every connect attempt fails.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// Total connect attempts seen.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Close every socket this connector opened (relay restart).
    pub fn drop_connections(&self) -> usize {
        let mut live = self.inner.live.lock().unwrap_or_else(|e| e.into_inner());
        let count = live.iter().filter(|s| !s.is_closed()).count();
        for socket in live.drain(..) {
            socket.close();
        }
        count
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &TransportConfig) -> Result<Arc<RelaySocket>, TransportError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        let scripted_failure = self
            .inner
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure || !self.inner.online.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                endpoint: config.endpoint.clone(),
                source: anyhow::anyhow!("memory relay unreachable"),
            });
        }

        let (socket, peer) = RelaySocket::channel(config.send_buffer, config.recv_buffer);
        if self.inner.accepted.send(peer).is_err() {
            return Err(TransportError::Connect {
                endpoint: config.endpoint.clone(),
                source: anyhow::anyhow!("memory relay stopped accepting"),
            });
        }
        self.inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(socket.clone());
        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let (connector, mut accepted) = MemoryConnector::new();
        let config = TransportConfig::new();
        connector.fail_next(2);

        assert!(connector.connect(&config).await.is_err());
        assert!(connector.connect(&config).await.is_err());
        let socket = connector.connect(&config).await.unwrap();
        let peer = accepted.recv().await.unwrap();
        assert_eq!(peer.socket_id(), socket.id());
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test]
    async fn drop_connections_closes_sockets() {
        let (connector, _accepted) = MemoryConnector::new();
        let socket = connector.connect(&TransportConfig::new()).await.unwrap();
        assert_eq!(connector.drop_connections(), 1);
        assert!(socket.is_closed());
    }
}
