// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token persistence over a string key-value boundary.
//!
//! The whole [`TokenPair`] lives under a single key as JSON. Missing or
//! malformed content means "no session" and is never an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::token::TokenPair;

/// Default storage key for the serialized token pair.
pub const DEFAULT_STORAGE_KEY: &str = "auth_tokens";

/// Minimal string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// In-process storage; contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a state directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write: temp file then rename, so readers never see a torn value.
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.dir.join(format!("{key}.json.{}.{seq}.tmp", std::process::id()));
        std::fs::write(&tmp_path, value)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Persists the token pair as a single JSON value.
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(backend, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(backend: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self { backend, key: key.into() }
    }

    /// Store backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the persisted pair. Corrupt entries are purged and read as `None`.
    pub fn load(&self) -> Option<TokenPair> {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, "failed to read persisted tokens: {e:#}");
                return None;
            }
        };

        match serde_json::from_str::<TokenPair>(&raw) {
            Ok(pair) if pair.is_well_formed() => Some(pair),
            Ok(_) => {
                warn!(key = %self.key, "persisted tokens incomplete, clearing");
                self.clear();
                None
            }
            Err(e) => {
                warn!(key = %self.key, "failed to parse persisted tokens, clearing: {e}");
                self.clear();
                None
            }
        }
    }

    /// Replace the persisted pair.
    pub fn save(&self, pair: &TokenPair) {
        let json = match serde_json::to_string(pair) {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to serialize tokens: {e}");
                return;
            }
        };
        if let Err(e) = self.backend.set(&self.key, &json) {
            warn!(key = %self.key, "failed to persist tokens: {e:#}");
            return;
        }
        debug!(key = %self.key, expires_at = pair.expires_at, "persisted tokens");
    }

    pub fn clear(&self) {
        if let Err(e) = self.backend.remove(&self.key) {
            warn!(key = %self.key, "failed to clear persisted tokens: {e:#}");
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").field("key", &self.key).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
