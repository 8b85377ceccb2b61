//! Backup records and the key layout of backup history.
//!
//! Every write lands at `backups/{network}/{category}/{timestamp}`, with the
//! timestamp zero-padded to 20 digits so that lexical key order is
//! chronological. Nothing is overwritten; recovery flows pick a timestamp
//! from [`list_backups`].
use serde::{Deserialize, Serialize};

use crate::category::BackupCategory;
use crate::error::BackupError;
use crate::store::{GetOptions, KeyRange, ReplicatedStore};
use crate::types::{BackupBlob, Timestamp, WalletNetwork};

const ROOT: &str = "backups";

/// What is actually stored: the category blob plus enough context to
/// validate it on fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub category: BackupCategory,
    pub network: WalletNetwork,
    pub timestamp: Timestamp,
    #[serde(with = "serde_bytes")]
    pub payload: BackupBlob,
}

/// One entry of a history listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupListing {
    pub timestamp: Timestamp,
}

impl BackupRecord {
    pub fn new(
        category: BackupCategory,
        network: WalletNetwork,
        timestamp: Timestamp,
        payload: BackupBlob,
    ) -> Self {
        Self {
            category,
            network,
            timestamp,
            payload,
        }
    }

    pub fn key(&self) -> String {
        backup_key(self.network, self.category, self.timestamp)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackupError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Directory holding every backup of `category` on `network`.
pub fn category_dir(network: WalletNetwork, category: BackupCategory) -> String {
    format!("{ROOT}/{network}/{category}/")
}

pub fn backup_key(network: WalletNetwork, category: BackupCategory, timestamp: Timestamp) -> String {
    format!("{}{timestamp:020}", category_dir(network, category))
}

/// Write one backup record.
pub async fn write_backup(
    store: &dyn ReplicatedStore,
    record: &BackupRecord,
) -> Result<String, BackupError> {
    let key = record.key();
    store.put(&key, record.to_bytes()?).await?;
    Ok(key)
}

/// Timestamps of every stored backup of `category`, newest first.
pub async fn list_backups(
    store: &dyn ReplicatedStore,
    category: BackupCategory,
    network: WalletNetwork,
) -> Result<Vec<BackupListing>, BackupError> {
    let dir = category_dir(network, category);
    let mut listings: Vec<BackupListing> = store
        .list(KeyRange::prefix(&dir))
        .await?
        .into_iter()
        .filter(|entry| entry.value.is_some())
        .filter_map(|entry| {
            let ts = entry.key.strip_prefix(dir.as_str())?.parse().ok()?;
            Some(BackupListing { timestamp: ts })
        })
        .collect();
    listings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(listings)
}

/// Payload of the backup taken at `timestamp`. Always read fresh from the
/// network.
pub async fn fetch_backup(
    store: &dyn ReplicatedStore,
    timestamp: Timestamp,
    category: BackupCategory,
    network: WalletNetwork,
) -> Result<BackupBlob, BackupError> {
    let key = backup_key(network, category, timestamp);
    let bytes = store
        .get(&key, GetOptions::fresh())
        .await?
        .ok_or_else(|| BackupError::NotFound { key: key.clone() })?;
    let record = BackupRecord::from_bytes(&bytes)?;
    if record.category != category || record.network != network {
        return Err(BackupError::Deserialization(format!(
            "record at {key} belongs to {}/{}",
            record.network, record.category
        )));
    }
    Ok(record.payload)
}

/// Newest backup of `category`, if any.
pub async fn fetch_latest(
    store: &dyn ReplicatedStore,
    category: BackupCategory,
    network: WalletNetwork,
) -> Result<Option<(Timestamp, BackupBlob)>, BackupError> {
    let Some(newest) = list_backups(store, category, network).await?.into_iter().next() else {
        return Ok(None);
    };
    let payload = fetch_backup(store, newest.timestamp, category, network).await?;
    Ok(Some((newest.timestamp, payload)))
}
