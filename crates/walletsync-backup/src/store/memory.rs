use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{GetOptions, KeyRange, ReplicatedStore, StoreEntry};
use crate::error::BackupError;

/// In-process replicated store.
///
/// Cheap to clone; clones share contents. Records every put and can be
/// scripted to fail or to delay individual puts, which lets tests reorder
/// write completions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<String, Option<Vec<u8>>>,
    puts: Vec<(String, Vec<u8>)>,
    put_attempts: u64,
    fail_writes: bool,
    put_delays: VecDeque<Duration>,
    fresh_reads: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Successful puts, in completion order.
    pub fn puts(&self) -> Vec<(String, Vec<u8>)> {
        self.state().puts.clone()
    }

    /// Successful puts whose key starts with `prefix`.
    pub fn puts_under(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.state()
            .puts
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Puts attempted, failed ones included.
    pub fn put_attempts(&self) -> u64 {
        self.state().put_attempts
    }

    /// Reject every write while set.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Delay the next not-yet-started put by `delay`. Queued delays apply to
    /// puts in the order they start.
    pub fn delay_next_put(&self, delay: Duration) {
        self.state().put_delays.push_back(delay);
    }

    /// Number of reads that bypassed the cache.
    pub fn fresh_reads(&self) -> u64 {
        self.state().fresh_reads
    }

    pub fn clear_puts(&self) {
        self.state().puts.clear();
    }
}

#[async_trait::async_trait]
impl ReplicatedStore for MemoryStore {
    async fn get(&self, key: &str, opts: GetOptions) -> Result<Option<Vec<u8>>, BackupError> {
        let mut state = self.state();
        if opts.skip_cache {
            state.fresh_reads += 1;
        }
        Ok(state.entries.get(key).cloned().flatten())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), BackupError> {
        let delay = {
            let mut state = self.state();
            state.put_attempts += 1;
            state.put_delays.pop_front()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_writes {
            return Err(BackupError::StoreRejected {
                op: "put",
                key: key.to_string(),
                reason: "memory store: writes disabled".into(),
            });
        }
        state.entries.insert(key.to_string(), Some(value.clone()));
        state.puts.push((key.to_string(), value));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), BackupError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(BackupError::StoreRejected {
                op: "del",
                key: key.to_string(),
                reason: "memory store: writes disabled".into(),
            });
        }
        state.entries.insert(key.to_string(), None);
        Ok(())
    }

    async fn list(&self, range: KeyRange) -> Result<Vec<StoreEntry>, BackupError> {
        let state = self.state();
        Ok(state
            .entries
            .range(range.start.clone()..)
            .take_while(|(k, _)| range.contains(k))
            .map(|(k, v)| StoreEntry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn put_get_del() {
        let store = MemoryStore::new();
        store.put("a/1", vec![1]).await.unwrap();
        assert_eq!(store.get("a/1", GetOptions::default()).await.unwrap(), Some(vec![1]));

        store.del("a/1").await.unwrap();
        assert_eq!(store.get("a/1", GetOptions::fresh()).await.unwrap(), None);
        assert_eq!(store.fresh_reads(), 1);

        // Deletion leaves a marker visible to listings.
        let listed = store.list(KeyRange::prefix("a/")).await.unwrap();
        assert_eq!(listed, vec![StoreEntry { key: "a/1".into(), value: None }]);
    }

    #[tokio::test]
    async fn failing_writes_are_counted_not_stored() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.put("k", vec![1]).await.is_err());
        assert_eq!(store.put_attempts(), 1);
        assert!(store.puts().is_empty());
    }

    #[tokio::test]
    async fn list_dir_and_iter() {
        let store = MemoryStore::new();
        for key in ["contacts/alice", "contacts/bob/profile", "contacts/bob/avatar", "other/x"] {
            store.put(key, vec![0]).await.unwrap();
        }
        assert_eq!(store.list_dir("contacts").await.unwrap(), vec!["alice", "bob"]);

        let keys: Vec<String> = store
            .iter(KeyRange::prefix("contacts/"))
            .map(|e| e.unwrap().key)
            .collect()
            .await;
        assert_eq!(keys, vec!["contacts/alice", "contacts/bob/avatar", "contacts/bob/profile"]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_put_completes_later() {
        let store = MemoryStore::new();
        store.delay_next_put(Duration::from_secs(10));

        let slow = {
            let store = store.clone();
            tokio::spawn(async move { store.put("k", b"slow".to_vec()).await })
        };
        tokio::task::yield_now().await;
        store.put("k", b"fast".to_vec()).await.unwrap();
        slow.await.unwrap().unwrap();

        let order: Vec<Vec<u8>> = store.puts().into_iter().map(|(_, v)| v).collect();
        assert_eq!(order, vec![b"fast".to_vec(), b"slow".to_vec()]);
    }
}
