//! Checkpoint store trait and implementations

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::snapshot::Snapshot;

/// Keyed snapshot storage: one blob per tag
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot under `tag`, replacing any previous blob
    fn save(&self, tag: &str, snapshot: &Snapshot) -> StoreResult<()>;

    /// Load the snapshot stored under `tag`, `None` if nothing was saved
    fn load(&self, tag: &str) -> StoreResult<Option<Snapshot>>;

    /// List tags that currently have a blob
    fn tags(&self) -> StoreResult<Vec<String>>;
}

/// Reject tags that cannot be used as a file name component
pub fn validate_tag(tag: &str) -> StoreResult<()> {
    let reason = if tag.is_empty() {
        Some("tag is empty")
    } else if tag.contains('/') || tag.contains('\\') {
        Some("contains a path separator")
    } else if tag.starts_with('.') {
        Some("starts with a dot")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StoreError::InvalidTag {
            tag: tag.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// File-backed store: `<dir>/<tag><suffix>` holds the JSON snapshot
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory holding the checkpoint files
    base_path: PathBuf,
    /// File name suffix appended to every tag
    suffix: String,
}

impl FileStore {
    /// Open or create a store at the given directory
    pub fn open(path: impl AsRef<Path>, suffix: impl Into<String>) -> StoreResult<Self> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|source| StoreError::Io {
            path: base_path.clone(),
            source,
        })?;
        let suffix = suffix.into();
        debug!(?base_path, %suffix, "FileStore::open: opened checkpoint store");
        Ok(Self { base_path, suffix })
    }

    /// Directory holding the checkpoint files
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the blob for a tag
    pub fn path_for(&self, tag: &str) -> StoreResult<PathBuf> {
        validate_tag(tag)?;
        Ok(self.base_path.join(format!("{}{}", tag, self.suffix)))
    }
}

impl CheckpointStore for FileStore {
    fn save(&self, tag: &str, snapshot: &Snapshot) -> StoreResult<()> {
        let path = self.path_for(tag)?;
        debug!(%tag, ?path, cycle_index = snapshot.cycle_index, "FileStore::save: called");

        let json = serde_json::to_vec_pretty(snapshot).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        // Write to a sibling temp file then rename so readers never see a partial blob
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        info!(%tag, cycle_index = snapshot.cycle_index, "Checkpoint saved");
        Ok(())
    }

    fn load(&self, tag: &str) -> StoreResult<Option<Snapshot>> {
        let path = self.path_for(tag)?;
        debug!(%tag, ?path, "FileStore::load: called");

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%tag, "FileStore::load: no checkpoint for tag");
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let snapshot: Snapshot = serde_json::from_slice(&content).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        info!(%tag, cycle_index = snapshot.cycle_index, "Checkpoint loaded");
        Ok(Some(snapshot))
    }

    fn tags(&self) -> StoreResult<Vec<String>> {
        let entries = fs::read_dir(&self.base_path).map_err(|source| StoreError::Io {
            path: self.base_path.clone(),
            source,
        })?;

        let mut tags = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.base_path.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(tag) = name.strip_suffix(&self.suffix)
                && !tag.is_empty()
            {
                tags.push(tag.to_string());
            }
        }

        tags.sort();
        Ok(tags)
    }
}

/// In-memory store, useful for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryStore {
    fn save(&self, tag: &str, snapshot: &Snapshot) -> StoreResult<()> {
        validate_tag(tag)?;
        debug!(%tag, cycle_index = snapshot.cycle_index, "MemoryStore::save: called");
        let mut blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        blobs.insert(tag.to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, tag: &str) -> StoreResult<Option<Snapshot>> {
        validate_tag(tag)?;
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.get(tag).cloned())
    }

    fn tags(&self) -> StoreResult<Vec<String>> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut tags: Vec<String> = blobs.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn snapshot(cycle_index: usize) -> Snapshot {
        Snapshot::new(json!({"w": cycle_index}), json!({"lr": 0.1}), json!({"steps": cycle_index}), cycle_index)
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path(), "_checkpoint.json").unwrap();

        store.save("last", &snapshot(3)).unwrap();

        let loaded = store.load("last").unwrap().expect("snapshot should exist");
        assert_eq!(loaded, snapshot(3));
        assert!(temp.path().join("last_checkpoint.json").exists());
    }

    #[test]
    fn test_missing_tag_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path(), "_checkpoint.json").unwrap();

        assert!(store.load("best").unwrap().is_none());
    }

    #[test]
    fn test_save_overwrites_previous_blob() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path(), ".json").unwrap();

        store.save("last", &snapshot(1)).unwrap();
        store.save("last", &snapshot(2)).unwrap();

        assert_eq!(store.load("last").unwrap().unwrap().cycle_index, 2);
        assert!(!temp.path().join("last.tmp").exists());
    }

    #[test]
    fn test_custom_tag_uses_same_layout() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path(), "_checkpoint.json").unwrap();

        store.save("warmup", &snapshot(1)).unwrap();
        assert!(temp.path().join("warmup_checkpoint.json").exists());
    }

    #[test]
    fn test_tags_lists_saved_blobs() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path(), "_checkpoint.json").unwrap();

        store.save("last", &snapshot(1)).unwrap();
        store.save("best", &snapshot(1)).unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.tags().unwrap(), vec!["best".to_string(), "last".to_string()]);
    }

    #[test]
    fn test_malformed_blob_is_error() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path(), "_checkpoint.json").unwrap();
        fs::write(temp.path().join("last_checkpoint.json"), "not json").unwrap();

        let err = store.load("last").unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[test]
    fn test_invalid_tags_rejected() {
        assert!(validate_tag("").is_err());
        assert!(validate_tag("../escape").is_err());
        assert!(validate_tag(".hidden").is_err());
        assert!(validate_tag("best").is_ok());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load("last").unwrap().is_none());

        store.save("last", &snapshot(4)).unwrap();
        assert_eq!(store.load("last").unwrap().unwrap().cycle_index, 4);
        assert_eq!(store.tags().unwrap(), vec!["last".to_string()]);
    }

    proptest::proptest! {
        #[test]
        fn test_tags_match_saved_set(tags in proptest::collection::btree_set("[a-z][a-z0-9_-]{0,11}", 0..6)) {
            let temp = TempDir::new().unwrap();
            let store = FileStore::open(temp.path(), "_checkpoint.json").unwrap();

            for (i, tag) in tags.iter().enumerate() {
                store.save(tag, &snapshot(i)).unwrap();
            }

            let expected: Vec<String> = tags.into_iter().collect();
            proptest::prop_assert_eq!(store.tags().unwrap(), expected);
        }
    }
}
