//! Key-value storage for settings and persistent anchors.
//!
//! Values are opaque strings (JSON documents in practice). The in-memory
//! store backs tests and throwaway runs; the file store keeps every entry in
//! one JSON object on disk so it survives restarts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    /// All keys starting with `prefix`, in lexicographic order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        prefix_keys(&self.entries, prefix)
    }
}

/// Store backed by a single JSON object file, rewritten on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|err| Error::config(format!("{}: {err}", path.display())))?
            }
        } else {
            BTreeMap::new()
        };
        debug!("opened store {} with {} entries", path.display(), entries.len());
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        prefix_keys(&self.entries, prefix)
    }
}

fn prefix_keys(entries: &BTreeMap<String, String>, prefix: &str) -> Vec<String> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("xremu-{name}-{unique}"));
        fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_memory_store_prefix_scan() {
        let mut store = MemoryStore::new();
        store.set("anchor:a/1", "x".into()).unwrap();
        store.set("anchor:a/2", "y".into()).unwrap();
        store.set("anchor:b/1", "z".into()).unwrap();
        store.set("settings", "{}".into()).unwrap();

        assert_eq!(store.keys_with_prefix("anchor:a/"), vec!["anchor:a/1", "anchor:a/2"]);
        store.remove("anchor:a/1").unwrap();
        assert_eq!(store.keys_with_prefix("anchor:a/"), vec!["anchor:a/2"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = temp_dir("store");
        let path = dir.join("state.json");
        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.set("k1", "v1".into()).unwrap();
            store.set("k2", "v2".into()).unwrap();
            store.remove("k1").unwrap();
        }
        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("k1"), None);
        assert_eq!(store.get("k2").as_deref(), Some("v2"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = temp_dir("corrupt");
        let path = dir.join("state.json");
        fs::write(&path, "not json").unwrap();
        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("state.json"));
        let _ = fs::remove_dir_all(dir);
    }
}
