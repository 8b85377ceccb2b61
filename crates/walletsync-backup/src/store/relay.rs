//! [`ReplicatedStore`] over a relay socket.
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use walletsync_transport::RelaySocket;

use super::wire::{self, StoreOp, StoreReply, StoreRequest, StoreResponse};
use super::{GetOptions, KeyRange, ReplicatedStore, StoreEntry};
use crate::error::BackupError;
use crate::identity::WalletIdentity;

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<StoreReply, String>>>>;

/// Store client bound to one socket and one identity.
///
/// A client lives exactly as long as its socket: when the socket closes,
/// outstanding requests fail and new ones are refused. After a reconnect
/// the session builds a fresh client on the new socket.
///
/// Reads are served from a local mirror of keys this client has already
/// seen, unless the caller asks for `skip_cache`.
pub struct RelayStoreClient {
    socket: Arc<RelaySocket>,
    identity: WalletIdentity,
    namespace: String,
    timeout: Duration,
    next_id: AtomicU64,
    pending: Arc<Pending>,
    mirror: Mutex<BTreeMap<String, Option<Vec<u8>>>>,
}

impl RelayStoreClient {
    /// Bind to `socket` and start dispatching responses.
    pub fn new(
        socket: Arc<RelaySocket>,
        identity: WalletIdentity,
        timeout: Duration,
    ) -> Result<Arc<Self>, BackupError> {
        let rx = socket.subscribe()?;
        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(dispatch_responses(socket.clone(), rx, pending.clone()));

        let namespace = identity.namespace();
        Ok(Arc::new(Self {
            socket,
            identity,
            namespace,
            timeout,
            next_id: AtomicU64::new(1),
            pending,
            mirror: Mutex::new(BTreeMap::new()),
        }))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn socket_id(&self) -> u64 {
        self.socket.id()
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    fn mirror(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Option<Vec<u8>>>> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn request(&self, op: StoreOp) -> Result<StoreReply, BackupError> {
        if self.socket.is_closed() {
            return Err(BackupError::NotConnected);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op_name = op.name();
        let key = op.key().to_string();
        let frame = StoreRequest {
            id,
            namespace: self.namespace.clone(),
            op,
        }
        .to_bytes()?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if let Err(e) = self.socket.send(frame).await {
            lock(&self.pending).remove(&id);
            tracing::debug!(id, op = op_name, "store request not sent: {e}");
            return Err(BackupError::NotConnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(reason))) => Err(BackupError::StoreRejected {
                op: op_name,
                key,
                reason,
            }),
            // Dispatcher dropped the sender: the socket closed underneath us.
            Ok(Err(_)) => Err(BackupError::NotConnected),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(BackupError::Timeout {
                    millis: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<StoreReply, String>>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn unexpected(op: &'static str, key: &str, reply: StoreReply) -> BackupError {
    BackupError::StoreRejected {
        op,
        key: key.to_string(),
        reason: format!("unexpected reply: {reply:?}"),
    }
}

/// Route responses to waiting requests until the socket closes, then fail
/// whatever is still outstanding.
async fn dispatch_responses(
    socket: Arc<RelaySocket>,
    mut rx: broadcast::Receiver<Vec<u8>>,
    pending: Arc<Pending>,
) {
    loop {
        tokio::select! {
            biased;
            _ = socket.closed() => break,
            frame = rx.recv() => match frame {
                Ok(bytes) => {
                    let response = match StoreResponse::from_bytes(&bytes) {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::debug!(socket = socket.id(), "ignoring frame: {e}");
                            continue;
                        }
                    };
                    match lock(&pending).remove(&response.id) {
                        Some(tx) => {
                            let _ = tx.send(response.result);
                        }
                        None => tracing::debug!(id = response.id, "response for unknown request"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(socket = socket.id(), skipped = n, "store client lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    let dropped = {
        let mut map = lock(&pending);
        let n = map.len();
        map.clear();
        n
    };
    if dropped > 0 {
        tracing::debug!(socket = socket.id(), dropped, "socket closed with requests in flight");
    }
}

#[async_trait::async_trait]
impl ReplicatedStore for RelayStoreClient {
    async fn get(&self, key: &str, opts: GetOptions) -> Result<Option<Vec<u8>>, BackupError> {
        if !opts.skip_cache {
            if let Some(cached) = self.mirror().get(key) {
                return Ok(cached.clone());
            }
        }
        let reply = self
            .request(StoreOp::Get {
                key: key.to_string(),
                skip_cache: opts.skip_cache,
            })
            .await?;
        match reply {
            StoreReply::Value(value) => {
                self.mirror().insert(key.to_string(), value.clone());
                Ok(value)
            }
            other => Err(unexpected("get", key, other)),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), BackupError> {
        let signature = self
            .identity
            .sign(&wire::put_signable(&self.namespace, key, &value));
        let reply = self
            .request(StoreOp::Put {
                key: key.to_string(),
                value: value.clone(),
                signature,
            })
            .await?;
        match reply {
            StoreReply::Done => {
                self.mirror().insert(key.to_string(), Some(value));
                Ok(())
            }
            other => Err(unexpected("put", key, other)),
        }
    }

    async fn del(&self, key: &str) -> Result<(), BackupError> {
        let signature = self.identity.sign(&wire::del_signable(&self.namespace, key));
        let reply = self
            .request(StoreOp::Del {
                key: key.to_string(),
                signature,
            })
            .await?;
        match reply {
            StoreReply::Done => {
                self.mirror().insert(key.to_string(), None);
                Ok(())
            }
            other => Err(unexpected("del", key, other)),
        }
    }

    async fn list(&self, range: KeyRange) -> Result<Vec<StoreEntry>, BackupError> {
        let start = range.start.clone();
        match self.request(StoreOp::List { range }).await? {
            StoreReply::Entries(entries) => Ok(entries),
            other => Err(unexpected("list", &start, other)),
        }
    }
}
