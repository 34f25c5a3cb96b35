//! Key-value persistence for snapshot state.
//!
//! The core persists exactly two documents: the rolling snapshot history and
//! the custom baseline. Both are JSON values stored under fixed keys in
//! whatever [`KeyValueStore`] the host hands in.

use crate::db;
use anyhow::{Context, Result};
use log::trace;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Key holding the rolling list of count snapshots.
pub const SNAPSHOTS_KEY: &str = "snapshots";
/// Key holding the user-resettable baseline.
pub const CUSTOM_BASELINE_KEY: &str = "custom_baseline";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON document, `None` if the key is absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    store
        .get(key)?
        .map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("Stored value under `{key}` is not valid JSON"))
        })
        .transpose()
}

/// Encode `value` as JSON and write it under `key`.
pub fn save_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("Failed to encode value for `{key}`"))?;
    trace!("Writing {} bytes under `{key}`", raw.len());
    store.put(key, &raw)
}

/// Volatile store, for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// Store backed by the `kv` table of the encore database.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = db::connect(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        db::kv_get(&self.conn(), key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        db::kv_put(&self.conn(), key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        db::kv_remove(&self.conn(), key)
    }
}
