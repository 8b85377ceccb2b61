//! Relay store wire format: MessagePack request/response frames.
//!
//! Each request carries the caller's namespace and a correlation id. Writes
//! carry an Ed25519 signature over a domain-separated message, so the
//! relay-side store can verify that the namespace owner issued them.
use serde::{Deserialize, Serialize};

use super::{KeyRange, StoreEntry};
use crate::error::BackupError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub id: u64,
    pub namespace: String,
    pub op: StoreOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOp {
    Get {
        key: String,
        skip_cache: bool,
    },
    Put {
        key: String,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
        #[serde(with = "serde_bytes")]
        signature: Vec<u8>,
    },
    Del {
        key: String,
        #[serde(with = "serde_bytes")]
        signature: Vec<u8>,
    },
    List {
        range: KeyRange,
    },
}

impl StoreOp {
    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::Get { .. } => "get",
            StoreOp::Put { .. } => "put",
            StoreOp::Del { .. } => "del",
            StoreOp::List { .. } => "list",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreOp::Get { key, .. } | StoreOp::Put { key, .. } | StoreOp::Del { key, .. } => key,
            StoreOp::List { range } => &range.start,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    pub id: u64,
    pub result: Result<StoreReply, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreReply {
    Value(#[serde(with = "serde_bytes")] Option<Vec<u8>>),
    Done,
    Entries(Vec<StoreEntry>),
}

/// Message signed for a put.
pub fn put_signable(namespace: &str, key: &str, value: &[u8]) -> Vec<u8> {
    signable(b"walletsync/put", namespace, key, value)
}

/// Message signed for a delete.
pub fn del_signable(namespace: &str, key: &str) -> Vec<u8> {
    signable(b"walletsync/del", namespace, key, &[])
}

fn signable(domain: &[u8], namespace: &str, key: &str, value: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain.len() + namespace.len() + key.len() + value.len() + 3);
    msg.extend_from_slice(domain);
    msg.push(0);
    msg.extend_from_slice(namespace.as_bytes());
    msg.push(0);
    msg.extend_from_slice(key.as_bytes());
    msg.push(0);
    msg.extend_from_slice(value);
    msg
}

impl StoreRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackupError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl StoreResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackupError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_del_signables_differ() {
        let put = put_signable("ns", "k", b"");
        let del = del_signable("ns", "k");
        assert_ne!(put, del);
    }

    #[test]
    fn signable_separates_fields() {
        assert_ne!(
            put_signable("ns", "ab", b"c"),
            put_signable("ns", "a", b"bc")
        );
    }

    #[test]
    fn error_response_survives_encoding() {
        let resp = StoreResponse {
            id: 9,
            result: Err("bad signature".into()),
        };
        let decoded = StoreResponse::from_bytes(&resp.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn put_frame_carries_value_as_binary() {
        let record = crate::history::BackupRecord::new(
            crate::category::BackupCategory::Settings,
            crate::types::WalletNetwork::Regtest,
            1,
            vec![0xff; 1000],
        );
        let value = record.to_bytes().unwrap();
        let frame = StoreRequest {
            id: 1,
            namespace: "ns".into(),
            op: StoreOp::Put {
                key: record.key(),
                value: value.clone(),
                signature: vec![0xee; 64],
            },
        }
        .to_bytes()
        .unwrap();
        // Value and signature framed as bins: only the key and headers on top.
        assert!(frame.len() < value.len() + 64 + 128, "frame {} for value {}", frame.len(), value.len());

        let decoded = StoreRequest::from_bytes(&frame).unwrap();
        match decoded.op {
            StoreOp::Put { value: v, .. } => assert_eq!(v, value),
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn value_reply_round_trips_high_bytes() {
        let resp = StoreResponse {
            id: 3,
            result: Ok(StoreReply::Entries(vec![StoreEntry {
                key: "k".into(),
                value: Some(vec![0x80, 0xff, 0x00]),
            }])),
        };
        let bytes = resp.to_bytes().unwrap();
        assert_eq!(StoreResponse::from_bytes(&bytes).unwrap(), resp);

        let resp = StoreResponse {
            id: 4,
            result: Ok(StoreReply::Value(None)),
        };
        assert_eq!(StoreResponse::from_bytes(&resp.to_bytes().unwrap()).unwrap(), resp);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(StoreRequest::from_bytes(&[0xc1, 0x00]).is_err());
    }
}
