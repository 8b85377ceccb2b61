//! Durable storage of tracker state across restarts, keyed by wallet
//! identity.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::category::{BackupCategory, CategoryMap};
use crate::error::BackupError;
use crate::tracker::CategorySyncState;

/// Loads and saves the per-category sync state of one wallet identity.
pub trait TrackerPersistence: Send + Sync {
    /// `None` if nothing was ever saved for `identity`.
    fn load(&self, identity: &str) -> Result<Option<CategoryMap<CategorySyncState>>, BackupError>;

    fn save(
        &self,
        identity: &str,
        states: &CategoryMap<CategorySyncState>,
    ) -> Result<(), BackupError>;
}

/// SQLite-backed persistence: one row per (identity, category), state as JSON.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackupError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, BackupError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BackupError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS backup_sync_state (
                identity   TEXT NOT NULL,
                category   TEXT NOT NULL,
                state      TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                PRIMARY KEY (identity, category)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TrackerPersistence for SqlitePersistence {
    fn load(&self, identity: &str) -> Result<Option<CategoryMap<CategorySyncState>>, BackupError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT category, state FROM backup_sync_state WHERE identity = ?1")?;
        let rows = stmt.query_map(params![identity], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut states = CategoryMap::<CategorySyncState>::default();
        let mut found = false;
        for row in rows {
            let (name, json) = row?;
            let Ok(category) = name.parse::<BackupCategory>() else {
                tracing::warn!(category = %name, "skipping unknown persisted category");
                continue;
            };
            states[category] = serde_json::from_str(&json)?;
            found = true;
        }
        Ok(found.then_some(states))
    }

    fn save(
        &self,
        identity: &str,
        states: &CategoryMap<CategorySyncState>,
    ) -> Result<(), BackupError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO backup_sync_state (identity, category, state)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(identity, category)
                 DO UPDATE SET state = excluded.state, updated_at = strftime('%s','now')",
            )?;
            for (category, state) in states.iter() {
                let json = serde_json::to_string(state)?;
                stmt.execute(params![identity, category.as_str(), json])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Process-local persistence, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryPersistence {
    saved: Mutex<HashMap<String, CategoryMap<CategorySyncState>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackerPersistence for MemoryPersistence {
    fn load(&self, identity: &str) -> Result<Option<CategoryMap<CategorySyncState>>, BackupError> {
        let saved = self.saved.lock().unwrap_or_else(|e| e.into_inner());
        Ok(saved.get(identity).cloned())
    }

    fn save(
        &self,
        identity: &str,
        states: &CategoryMap<CategorySyncState>,
    ) -> Result<(), BackupError> {
        let mut saved = self.saved.lock().unwrap_or_else(|e| e.into_inner());
        saved.insert(identity.to_string(), states.clone());
        Ok(())
    }
}
