//! Durable persistence for release records.
//!
//! The orchestrator requires at-least read-your-writes consistency from the
//! store; a failed write is fatal for the release since progress could no
//! longer be tracked safely.

use crate::error::{Result, StateError};
use crate::record::ReleaseRecord;
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Durable key-value store for release records, keyed by release id
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a record, replacing any previous version
    async fn put(&self, record: &ReleaseRecord) -> Result<()>;

    /// Load a record by id
    async fn get(&self, id: &str) -> Result<ReleaseRecord>;

    /// Whether a record exists for the given id
    async fn exists(&self, id: &str) -> Result<bool>;

    /// All known release ids, sorted
    async fn list(&self) -> Result<Vec<String>>;
}

/// File-backed record store: one pretty-printed JSON file per release.
///
/// Writes go through a temp file, fsync, and atomic rename so a crash never
/// leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at the given directory, creating it if needed
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StateError::SaveFailed {
            reason: format!("Failed to create store directory {}: {}", root.display(), e),
        })?;
        Ok(Self { root })
    }

    /// Directory this store persists into
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn put(&self, record: &ReleaseRecord) -> Result<()> {
        let serialized =
            serde_json::to_string_pretty(record).map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to serialize record: {}", e),
            })?;

        let final_path = self.record_path(&record.id);
        let temp_path = final_path.with_extension("tmp");

        {
            let mut file = fs::File::create(&temp_path).map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to create temp file: {}", e),
            })?;
            file.write_all(serialized.as_bytes())
                .map_err(|e| StateError::SaveFailed {
                    reason: format!("Failed to write record: {}", e),
                })?;
            file.sync_all().map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to sync record: {}", e),
            })?;
        }

        fs::rename(&temp_path, &final_path).map_err(|e| StateError::SaveFailed {
            reason: format!("Failed to rename temp file: {}", e),
        })?;

        log::debug!("persisted release record {}", record.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ReleaseRecord> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StateError::NotFound { id: id.to_string() }.into());
        }

        let contents = fs::read_to_string(&path).map_err(|e| StateError::LoadFailed {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;

        let record: ReleaseRecord =
            serde_json::from_str(&contents).map_err(|e| StateError::Corrupted {
                reason: format!("Failed to deserialize record '{}': {}", id, e),
            })?;

        record.validate()?;
        Ok(record)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.record_path(id).exists())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| StateError::LoadFailed {
            reason: format!("Failed to read store directory: {}", e),
        })?;

        let mut ids: Vec<String> = entries
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ReleaseTarget;
    use crate::error::ReleaseError;
    use std::collections::BTreeSet;

    fn targets() -> BTreeSet<ReleaseTarget> {
        [ReleaseTarget::AppStore].into_iter().collect()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path()).expect("store");

        let record = ReleaseRecord::new("app-100", &targets());
        store.put(&record).await.expect("put");

        let loaded = store.get("app-100").await.expect("get");
        assert_eq!(loaded, record);
        assert!(store.exists("app-100").await.expect("exists"));
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path()).expect("store");

        let err = store.get("nope").await.expect_err("missing");
        assert!(matches!(
            err,
            ReleaseError::State(StateError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn corrupted_record_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path()).expect("store");
        fs::write(dir.path().join("bad.json"), b"{ not json").expect("write");

        let err = store.get("bad").await.expect_err("corrupted");
        assert!(matches!(
            err,
            ReleaseError::State(StateError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn list_returns_sorted_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path()).expect("store");

        for id in ["b-2", "a-1", "c-3"] {
            store
                .put(&ReleaseRecord::new(id, &targets()))
                .await
                .expect("put");
        }

        let ids = store.list().await.expect("list");
        assert_eq!(ids, vec!["a-1", "b-2", "c-3"]);
    }

    #[tokio::test]
    async fn put_overwrites_previous_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path()).expect("store");

        let mut record = ReleaseRecord::new("app-200", &targets());
        store.put(&record).await.expect("put");
        record.set_phase(crate::record::ReleasePhase::Deploying);
        store.put(&record).await.expect("put again");

        let loaded = store.get("app-200").await.expect("get");
        assert_eq!(loaded.phase, crate::record::ReleasePhase::Deploying);
    }
}
