//! Replicated store: the key-addressed, network-backed storage the backups
//! are written to.
//!
//! The engine depends only on the [`ReplicatedStore`] contract.
//! [`RelayStoreClient`] speaks it over a relay socket; [`MemoryStore`] keeps
//! everything in process.
pub mod memory;
pub mod relay;
pub mod wire;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::BackupError;

pub use memory::MemoryStore;
pub use relay::RelayStoreClient;

/// Read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOptions {
    /// Fetch from the network even if a local mirror has the key.
    pub skip_cache: bool,
}

impl GetOptions {
    pub fn fresh() -> Self {
        Self { skip_cache: true }
    }
}

/// Half-open key range `[start, end)`. `end = None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: String,
    pub end: Option<String>,
}

impl KeyRange {
    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            start: prefix.to_string(),
            end: prefix_end(prefix),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        key >= self.start.as_str() && self.end.as_deref().map_or(true, |end| key < end)
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_end(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.pop() {
        if last < 0x7f {
            bytes.push(last + 1);
            return String::from_utf8(bytes).ok();
        }
    }
    None
}

/// One key and its value (`None` for a deletion marker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub value: Option<Vec<u8>>,
}

/// Key-addressed store bound to one identity.
#[async_trait::async_trait]
pub trait ReplicatedStore: Send + Sync {
    async fn get(&self, key: &str, opts: GetOptions) -> Result<Option<Vec<u8>>, BackupError>;

    /// Overwriting put. Safe to repeat.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), BackupError>;

    async fn del(&self, key: &str) -> Result<(), BackupError>;

    /// Entries in `range`, sorted by key.
    async fn list(&self, range: KeyRange) -> Result<Vec<StoreEntry>, BackupError>;

    /// Entries in `range` as an async sequence.
    fn iter(&self, range: KeyRange) -> BoxStream<'_, Result<StoreEntry, BackupError>> {
        stream::once(self.list(range))
            .flat_map(|listed| match listed {
                Ok(entries) => stream::iter(entries.into_iter().map(Ok)).boxed(),
                Err(e) => stream::iter(std::iter::once(Err(e))).boxed(),
            })
            .boxed()
    }

    /// Immediate children of the directory `dir` (keys are `/`-separated).
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>, BackupError> {
        let prefix = if dir.is_empty() || dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        let mut children: Vec<String> = self
            .list(KeyRange::prefix(&prefix))
            .await?
            .into_iter()
            .filter(|e| e.value.is_some())
            .filter_map(|e| {
                e.key
                    .strip_prefix(prefix.as_str())?
                    .split('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .collect();
        children.dedup();
        Ok(children)
    }
}
