//! Durable set of notification ids the user has read on this machine.
//!
//! The set is loaded once when opened and written through on every change.
//! Read state is owned by this client, so storage problems are logged and
//! never bubble up into user actions.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Storage surface for [`ReadIdSet`].
pub trait ReadStateBackend: Send {
    fn load(&self) -> Result<HashSet<String>>;
    fn save(&self, ids: &HashSet<String>) -> Result<()>;
}

/// Stores the ids as a sorted JSON array in one file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReadStateBackend for JsonFileBackend {
    fn load(&self) -> Result<HashSet<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn save(&self, ids: &HashSet<String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let sorted: BTreeSet<&String> = ids.iter().collect();
        let body = serde_json::to_vec_pretty(&sorted)?;

        // Each save gets its own temp file in the target directory, so
        // concurrent writers never share a half-written file.
        let mut file = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        file.write_all(&body)
            .with_context(|| format!("failed to write {}", file.path().display()))?;
        file.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory backend. Clones share the same storage, which lets tests
/// "restart" by opening a second set over the same backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl MemoryBackend {
    pub fn stored(&self) -> HashSet<String> {
        self.ids.lock().unwrap().clone()
    }
}

impl ReadStateBackend for MemoryBackend {
    fn load(&self) -> Result<HashSet<String>> {
        Ok(self.stored())
    }

    fn save(&self, ids: &HashSet<String>) -> Result<()> {
        *self.ids.lock().unwrap() = ids.clone();
        Ok(())
    }
}

pub struct ReadIdSet {
    ids: HashSet<String>,
    backend: Box<dyn ReadStateBackend>,
}

impl ReadIdSet {
    /// Load the set from `backend`. Unreadable storage starts an empty set.
    pub fn open(backend: impl ReadStateBackend + 'static) -> Self {
        let ids = match backend.load() {
            Ok(ids) => {
                debug!(count = ids.len(), "read notification ids loaded");
                ids
            }
            Err(e) => {
                warn!(error = ?e, "failed to load read notification ids, starting empty");
                HashSet::new()
            }
        };
        Self {
            ids,
            backend: Box::new(backend),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Record one id. Returns `false` if it was already recorded.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_owned()) {
            return false;
        }
        self.persist();
        true
    }

    /// Record many ids with a single write. Returns how many were new.
    pub fn insert_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let added = ids
            .into_iter()
            .filter(|id| self.ids.insert((*id).to_owned()))
            .count();
        if added > 0 {
            self.persist();
        }
        added
    }

    fn persist(&self) {
        if let Err(e) = self.backend.save(&self.ids) {
            warn!(error = ?e, count = self.ids.len(), "failed to persist read notification ids");
        }
    }
}

impl std::fmt::Debug for ReadIdSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadIdSet").field("len", &self.ids.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenBackend;

    impl ReadStateBackend for BrokenBackend {
        fn load(&self) -> Result<HashSet<String>> {
            anyhow::bail!("disk on fire")
        }

        fn save(&self, _ids: &HashSet<String>) -> Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("read.json");

        let mut first = ReadIdSet::open(JsonFileBackend::new(&path));
        assert!(first.is_empty());
        assert!(first.insert("alert-1"));
        assert!(!first.insert("alert-1"));
        assert_eq!(first.insert_all(["alert-2", "alert-1", "alert-3"]), 2);
        drop(first);

        let reopened = ReadIdSet::open(JsonFileBackend::new(&path));
        assert_eq!(reopened.len(), 3);
        assert!(reopened.contains("alert-2"));

        // Only the state file is left behind.
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, ["read.json"]);
    }

    #[test]
    fn interleaved_writers_each_publish_a_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read.json");

        let mut first = ReadIdSet::open(JsonFileBackend::new(&path));
        let mut second = ReadIdSet::open(JsonFileBackend::new(&path));
        for i in 0..20 {
            assert!(first.insert(&format!("alert-{i}")));
            assert!(second.insert(&format!("signal-{i}")));
        }

        // The last writer wins with a complete, parseable set.
        let stored = JsonFileBackend::new(&path).load().unwrap();
        assert_eq!(stored.len(), 20);
        assert!(stored.iter().all(|id| id.starts_with("signal-")));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read.json");
        fs::write(&path, "{not json").unwrap();

        let set = ReadIdSet::open(JsonFileBackend::new(&path));
        assert!(set.is_empty());
    }

    #[test]
    fn storage_failures_do_not_lose_in_memory_state() {
        let mut set = ReadIdSet::open(BrokenBackend);
        assert!(set.insert("alert-9"));
        assert!(set.contains("alert-9"));
    }

    #[test]
    fn memory_backend_shares_storage() {
        let backend = MemoryBackend::default();
        let mut set = ReadIdSet::open(backend.clone());
        set.insert("alert-4");
        assert!(backend.stored().contains("alert-4"));
        assert!(ReadIdSet::open(backend).contains("alert-4"));
    }
}
