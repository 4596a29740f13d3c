//! Persistence adapter for the two process-wide slots described in
//! spec.md §6/§9: `lit-wallet-signature` and `lit-session-key`.
//!
//! Design note (spec.md §9 "Global mutable storage slots"): rather than a
//! pair of hard-coded global statics, the slots are reached through a
//! `PersistenceAdapter` trait passed in at client construction. The default
//! adapter is platform-provided — in-memory off the web, browser
//! `localStorage` when compiled for `wasm32` — matching the teacher crate's
//! `Storage` trait, which drew the same file-vs-wasm32 split.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};

pub const WALLET_SIGNATURE_KEY: &str = "lit-wallet-signature";
pub const SESSION_KEY_KEY: &str = "lit-session-key";

/// Storage errors are always recovered locally (spec.md §7): callers log a
/// failure from this trait and continue with regeneration rather than
/// propagating it.
pub trait PersistenceAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory adapter. The default off-browser implementation, and the one
/// used throughout the test suite.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().unwrap();
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.remove(key);
        Ok(())
    }
}

/// File-backed adapter for CLI/server hosts that want the slots to survive
/// a process restart.
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: &str) -> Result<Self> {
        let path = PathBuf::from(base_dir);
        std::fs::create_dir_all(&path)?;
        Ok(Self { base_dir: path })
    }
}

impl PersistenceAdapter for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.base_dir.join(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(
            std::fs::read_to_string(&path).with_context(|| format!("reading {key}"))?,
        ))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.base_dir.join(key);
        std::fs::write(path, value).with_context(|| format!("writing {key}"))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.base_dir.join(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// `localStorage`-backed adapter for WASM hosts, the platform-provided
/// default described in spec.md §9.
#[cfg(target_arch = "wasm32")]
pub struct LocalStorageAdapter;

#[cfg(target_arch = "wasm32")]
impl PersistenceAdapter for LocalStorageAdapter {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let window = web_sys::window().ok_or_else(|| anyhow::anyhow!("no window"))?;
        let storage = window
            .local_storage()
            .map_err(|_| anyhow::anyhow!("failed to get localStorage"))?
            .ok_or_else(|| anyhow::anyhow!("localStorage not available"))?;
        storage
            .get_item(key)
            .map_err(|_| anyhow::anyhow!("failed to read from localStorage"))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let window = web_sys::window().ok_or_else(|| anyhow::anyhow!("no window"))?;
        let storage = window
            .local_storage()
            .map_err(|_| anyhow::anyhow!("failed to get localStorage"))?
            .ok_or_else(|| anyhow::anyhow!("localStorage not available"))?;
        storage
            .set_item(key, value)
            .map_err(|_| anyhow::anyhow!("failed to write to localStorage"))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let window = web_sys::window().ok_or_else(|| anyhow::anyhow!("no window"))?;
        let storage = window
            .local_storage()
            .map_err(|_| anyhow::anyhow!("failed to get localStorage"))?
            .ok_or_else(|| anyhow::anyhow!("localStorage not available"))?;
        storage
            .remove_item(key)
            .map_err(|_| anyhow::anyhow!("failed to remove from localStorage"))
    }
}

/// Read a slot and best-effort log a parse/read failure instead of
/// propagating it, per spec.md §7 "Storage errors are always recovered
/// locally".
pub fn read_slot_lossy<T: for<'de> serde::Deserialize<'de>>(
    adapter: &dyn PersistenceAdapter,
    key: &str,
) -> Option<T> {
    match adapter.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, %err, "stored slot failed to parse, regenerating");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(key, %err, "stored slot failed to read, regenerating");
            None
        }
    }
}

/// Write a slot, logging (not propagating) a failure — "best-effort" per
/// spec.md §4.B/§4.C.
pub fn write_slot_lossy<T: serde::Serialize>(adapter: &dyn PersistenceAdapter, key: &str, value: &T) {
    let serialized = match serde_json::to_string(value) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(key, %err, "failed to serialize slot for persistence");
            return;
        }
    };
    if let Err(err) = adapter.set(key, &serialized) {
        tracing::warn!(key, %err, "failed to persist slot");
    }
}
