use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_websockets::{ClientBuilder, Message, WebSocketStream};

use crate::config::TransportConfig;
use crate::socket::{Connector, RelaySocket, SocketPeer};
use crate::TransportError;

/// Opens relay sockets over WebSocket.
///
/// Each socket gets a pump task that moves binary frames between the
/// WebSocket and the socket channels, and closes the socket when either
/// side goes away.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, config: &TransportConfig) -> Result<Arc<RelaySocket>, TransportError> {
        let uri: http::Uri = config
            .endpoint
            .parse()
            .map_err(|_| TransportError::InvalidEndpoint(config.endpoint.clone()))?;

        let (stream, _response) = ClientBuilder::from_uri(uri)
            .connect()
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: config.endpoint.clone(),
                source: e.into(),
            })?;

        let (socket, peer) = RelaySocket::channel(config.send_buffer, config.recv_buffer);
        tokio::spawn(pump(stream, peer));
        Ok(socket)
    }
}

async fn pump<S>(mut stream: WebSocketStream<S>, mut peer: SocketPeer)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let socket_id = peer.socket_id();
    loop {
        tokio::select! {
            frame = peer.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = stream.send(Message::binary(frame)).await {
                        tracing::warn!(socket_id, "relay write failed: {e}");
                        break;
                    }
                }
                None => {
                    let _ = stream.close().await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(msg)) if msg.is_binary() => {
                    peer.deliver(msg.as_payload().to_vec());
                }
                Some(Ok(msg)) if msg.is_close() => {
                    tracing::debug!(socket_id, "relay sent close frame");
                    break;
                }
                // Ping/pong are answered by the stream itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(socket_id, "relay read failed: {e}");
                    break;
                }
                None => break,
            },
        }
    }
    peer.close();
}
