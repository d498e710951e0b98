//! Legacy single-blob history storage.
//!
//! Older clients kept the whole trip history as one JSON array under
//! [`LEGACY_HISTORY_KEY`] in a synchronous key-value store. Writes rewrite the
//! entire blob, so a crash mid-write can lose all history. New data goes to
//! the SQLite [`TripStore`](crate::TripStore); this module exists so that data
//! can be read once and migrated.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::error::Result;
use crate::types::ShoppingTrip;

/// Key holding the legacy history blob.
pub const LEGACY_HISTORY_KEY: &str = "carttracker_history_v1";

/// Minimal synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory store, used when a host has no legacy data and in tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed store: one file per key.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reader/writer for the legacy history layout.
pub struct LegacyTripLog<'a> {
    kv: &'a dyn KeyValueStore,
}

impl<'a> LegacyTripLog<'a> {
    pub fn new(kv: &'a dyn KeyValueStore) -> Self {
        Self { kv }
    }

    /// Raw blob, if present.
    pub fn raw(&self) -> Result<Option<String>> {
        self.kv.get_item(LEGACY_HISTORY_KEY)
    }

    /// Parse the blob. `Ok(None)` when no blob exists.
    pub fn load(&self) -> Result<Option<Vec<ShoppingTrip>>> {
        match self.raw()? {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    /// Read-all, prepend, write-all. Not atomic.
    pub fn save_trip(&self, trip: &ShoppingTrip) -> Result<()> {
        let mut trips = self.load()?.unwrap_or_default();
        trips.insert(0, trip.clone());
        self.kv
            .set_item(LEGACY_HISTORY_KEY, &serde_json::to_string(&trips)?)?;
        debug!("[LegacyTripLog] Wrote {} trips", trips.len());
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.kv.remove_item(LEGACY_HISTORY_KEY)
    }
}
