/// In-process relay: accepts sockets from a `MemoryConnector` and serves
/// store requests against a shared `MemoryStore`, checking write signatures
/// the way a real relay does.
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walletsync_backup::store::wire::{self, StoreOp, StoreReply, StoreRequest, StoreResponse};
use walletsync_backup::{verify_signature, GetOptions, MemoryStore, ReplicatedStore};
use walletsync_transport::SocketPeer;

pub fn spawn(mut accepted: mpsc::UnboundedReceiver<SocketPeer>, store: MemoryStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(peer) = accepted.recv().await {
            tracing::debug!(socket = peer.socket_id(), "relay accepted socket");
            tokio::spawn(serve(peer, store.clone()));
        }
    })
}

async fn serve(mut peer: SocketPeer, store: MemoryStore) {
    while let Some(frame) = peer.recv().await {
        let request = match StoreRequest::from_bytes(&frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("relay dropped malformed frame: {e}");
                continue;
            }
        };
        let response = StoreResponse {
            id: request.id,
            result: apply(&store, &request).await,
        };
        match response.to_bytes() {
            Ok(bytes) => {
                peer.deliver(bytes);
            }
            Err(e) => tracing::warn!("relay failed to encode response: {e}"),
        }
    }
}

async fn apply(store: &MemoryStore, request: &StoreRequest) -> Result<StoreReply, String> {
    let ns = request.namespace.as_str();
    let key = |k: &str| format!("{ns}/{k}");
    match &request.op {
        StoreOp::Get { key: k, skip_cache } => store
            .get(&key(k), GetOptions { skip_cache: *skip_cache })
            .await
            .map(StoreReply::Value)
            .map_err(|e| e.to_string()),
        StoreOp::Put {
            key: k,
            value,
            signature,
        } => {
            if !verify_signature(ns, &wire::put_signable(ns, k, value), signature) {
                return Err("invalid signature".into());
            }
            store
                .put(&key(k), value.clone())
                .await
                .map(|_| StoreReply::Done)
                .map_err(|e| e.to_string())
        }
        StoreOp::Del { key: k, signature } => {
            if !verify_signature(ns, &wire::del_signable(ns, k), signature) {
                return Err("invalid signature".into());
            }
            store
                .del(&key(k))
                .await
                .map(|_| StoreReply::Done)
                .map_err(|e| e.to_string())
        }
        StoreOp::List { range } => {
            let scoped = walletsync_backup::KeyRange {
                start: key(&range.start),
                end: range.end.as_deref().map(key),
            };
            let prefix = format!("{ns}/");
            store
                .list(scoped)
                .await
                .map(|entries| {
                    entries
                        .into_iter()
                        .map(|mut entry| {
                            if let Some(stripped) = entry.key.strip_prefix(&prefix) {
                                entry.key = stripped.to_string();
                            }
                            entry
                        })
                        .collect()
                })
                .map(StoreReply::Entries)
                .map_err(|e| e.to_string())
        }
    }
}
