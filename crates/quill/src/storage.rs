// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! String key/value storage backing the session snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Minimal storage contract: get/set/remove a string by key.
///
/// Writes are best-effort. Durability beyond read-after-write within the
/// same process is not promised.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local storage, gone when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// JSON-file storage with an in-memory mirror.
///
/// Every mutation rewrites the whole file atomically (unique tmp + rename).
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<HashMap<String, String>>(&data) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), "ignoring corrupt session file: {e}");
                    HashMap::new()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), "no session file: {e}");
                HashMap::new()
            }
        };
        Self { path, entries: Mutex::new(entries) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &HashMap<String, String>) {
        if let Err(e) = write_atomic(&self.path, entries) {
            warn!(path = %self.path.display(), "failed to write session file: {e}");
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_owned(), value.to_owned());
        self.flush(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries);
        }
    }
}

/// Write `entries` as JSON to `path` via a uniquely named temp file.
fn write_atomic(path: &Path, entries: &HashMap<String, String>) -> anyhow::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(entries)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve the state directory for quill data.
///
/// Checks `QUILL_STATE_DIR`, then `$XDG_STATE_HOME/quill`,
/// then `$HOME/.local/state/quill`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("QUILL_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("quill");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/quill");
    }
    PathBuf::from(".quill")
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
