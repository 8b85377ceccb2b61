use std::time::Duration;

/// Default relay endpoint used when neither the builder nor the
/// environment provides one.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:45475";

/// Delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Listener capacity a socket starts with before the transport raises it.
pub const DEFAULT_SOCKET_LISTENERS: usize = 10;

/// Listener capacity applied to every freshly opened socket.
pub const DEFAULT_MAX_LISTENERS: usize = 1000;

/// Configuration for a [`RelayTransport`](crate::RelayTransport).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use walletsync_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .endpoint("ws://192.168.0.21:45475")
///     .reconnect_delay(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Relay endpoint (`ws://` or `wss://`).
    pub(crate) endpoint: String,
    /// Fixed wait before each reconnect attempt.
    pub(crate) reconnect_delay: Duration,
    /// Listener capacity set on each new socket before it is published.
    pub(crate) max_listeners: usize,
    /// Outgoing frame queue depth per socket.
    pub(crate) send_buffer: usize,
    /// Incoming frame fan-out buffer per socket.
    pub(crate) recv_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    ///
    /// If the `WALLETSYNC_RELAY_URL` environment variable is set, it is used
    /// as the relay endpoint. This can be overridden with [`.endpoint()`].
    ///
    /// [`.endpoint()`]: TransportConfig::endpoint
    pub fn new() -> Self {
        let endpoint = std::env::var("WALLETSYNC_RELAY_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());

        Self {
            endpoint,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_listeners: DEFAULT_MAX_LISTENERS,
            send_buffer: 256,
            recv_buffer: 256,
        }
    }

    /// Set the relay endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the wait between reconnect attempts (default: 2s).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the listener capacity applied to each new socket (default: 1000).
    pub fn max_listeners(mut self, max: usize) -> Self {
        self.max_listeners = max;
        self
    }

    /// Set the per-socket outgoing queue depth (default: 256).
    pub fn send_buffer(mut self, capacity: usize) -> Self {
        self.send_buffer = capacity;
        self
    }

    /// Set the per-socket incoming fan-out buffer (default: 256).
    pub fn recv_buffer(mut self, capacity: usize) -> Self {
        self.recv_buffer = capacity;
        self
    }

    /// The configured relay endpoint.
    pub fn relay_endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = TransportConfig::new()
            .endpoint("ws://relay.test:1")
            .reconnect_delay(Duration::from_millis(10))
            .max_listeners(64);
        assert_eq!(config.relay_endpoint(), "ws://relay.test:1");
        assert_eq!(config.reconnect_delay, Duration::from_millis(10));
        assert_eq!(config.max_listeners, 64);
        assert!(config.max_listeners > DEFAULT_SOCKET_LISTENERS);
    }
}
