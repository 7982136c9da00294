use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Snapshot of indexed files with their hashes
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Snapshot {
    /// Root directory the collection was built from
    #[serde(default)]
    pub root: Option<PathBuf>,
    pub collection_name: String,
    pub files: BTreeMap<PathBuf, FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub hash: String,
    pub chunk_count: usize,
    #[serde(default)]
    pub incomplete_chunks: usize,
    pub indexed_at: u64,
}

/// Totals reported by `get_indexing_status`
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub root: Option<PathBuf>,
    pub collection_name: String,
    pub files: usize,
    pub chunks: usize,
    pub incomplete_chunks: usize,
}

/// Manages snapshots for incremental indexing
pub struct SnapshotManager {
    snapshot_path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl SnapshotManager {
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self {
            snapshot_path,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub async fn load(&self) -> Result<()> {
        if fs::try_exists(&self.snapshot_path).await.unwrap_or(false) {
            let data = fs::read_to_string(&self.snapshot_path)
                .await
                .with_context(|| format!("Failed to read snapshot {}", self.snapshot_path.display()))?;
            let snapshot = serde_json::from_str(&data).context("Corrupt snapshot file")?;
            *self.snapshot.write().await = snapshot;
        }
        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        let data = {
            let snapshot = self.snapshot.read().await;
            serde_json::to_string_pretty(&*snapshot)?
        };

        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(&self.snapshot_path, data).await?;
        Ok(())
    }

    pub async fn get_file_hash(&self, path: &Path) -> Option<String> {
        self.snapshot.read().await.files.get(path).map(|e| e.hash.clone())
    }

    pub async fn update_file(&self, path: PathBuf, hash: String, chunk_count: usize, incomplete_chunks: usize) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.files.insert(
            path,
            FileEntry {
                hash,
                chunk_count,
                incomplete_chunks,
                indexed_at: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default(),
            },
        );
    }

    /// Forget files that are no longer on disk; returns the removed paths.
    pub async fn retain_files(&self, present: &[PathBuf]) -> Vec<PathBuf> {
        let mut snapshot = self.snapshot.write().await;
        let removed: Vec<PathBuf> = snapshot
            .files
            .keys()
            .filter(|path| !present.contains(path))
            .cloned()
            .collect();
        for path in &removed {
            snapshot.files.remove(path);
        }
        removed
    }

    /// Point the snapshot at a collection. Switching collections discards file entries.
    pub async fn set_collection(&self, root: PathBuf, name: String) {
        let mut snapshot = self.snapshot.write().await;
        if snapshot.collection_name != name {
            snapshot.files.clear();
        }
        snapshot.root = Some(root);
        snapshot.collection_name = name;
    }

    pub async fn get_collection_name(&self) -> Option<String> {
        let snapshot = self.snapshot.read().await;
        (!snapshot.collection_name.is_empty()).then(|| snapshot.collection_name.clone())
    }

    pub async fn summary(&self) -> Option<SnapshotSummary> {
        let snapshot = self.snapshot.read().await;
        if snapshot.collection_name.is_empty() {
            return None;
        }
        Some(SnapshotSummary {
            root: snapshot.root.clone(),
            collection_name: snapshot.collection_name.clone(),
            files: snapshot.files.len(),
            chunks: snapshot.files.values().map(|f| f.chunk_count).sum(),
            incomplete_chunks: snapshot.files.values().map(|f| f.incomplete_chunks).sum(),
        })
    }

    pub async fn clear(&self) {
        *self.snapshot.write().await = Snapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/snapshot.json");

        let manager = SnapshotManager::new(path.clone());
        manager
            .set_collection(PathBuf::from("/study"), "sas_code_abc".to_string())
            .await;
        manager
            .update_file(PathBuf::from("/study/dm.sas"), "h1".to_string(), 3, 1)
            .await;
        manager.save().await.unwrap();

        let reloaded = SnapshotManager::new(path);
        reloaded.load().await.unwrap();
        assert_eq!(
            reloaded.get_file_hash(Path::new("/study/dm.sas")).await.as_deref(),
            Some("h1")
        );
        let summary = reloaded.summary().await.unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.incomplete_chunks, 1);
        assert_eq!(summary.root, Some(PathBuf::from("/study")));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().join("none.json"));
        manager.load().await.unwrap();
        assert_eq!(manager.get_collection_name().await, None);
        assert!(manager.summary().await.is_none());
    }

    #[tokio::test]
    async fn test_switching_collection_resets_files() {
        let manager = SnapshotManager::new(PathBuf::from("/unused"));
        manager.set_collection(PathBuf::from("/a"), "one".to_string()).await;
        manager.update_file(PathBuf::from("/a/x.sas"), "h".to_string(), 1, 0).await;
        manager.set_collection(PathBuf::from("/a"), "one".to_string()).await;
        assert!(manager.get_file_hash(Path::new("/a/x.sas")).await.is_some());
        manager.set_collection(PathBuf::from("/b"), "two".to_string()).await;
        assert!(manager.get_file_hash(Path::new("/a/x.sas")).await.is_none());
    }

    #[tokio::test]
    async fn test_retain_files() {
        let manager = SnapshotManager::new(PathBuf::from("/unused"));
        manager.update_file(PathBuf::from("/a/x.sas"), "h".to_string(), 1, 0).await;
        manager.update_file(PathBuf::from("/a/y.sas"), "h".to_string(), 1, 0).await;
        let removed = manager.retain_files(&[PathBuf::from("/a/x.sas")]).await;
        assert_eq!(removed, vec![PathBuf::from("/a/y.sas")]);
        assert!(manager.get_file_hash(Path::new("/a/y.sas")).await.is_none());
    }
}
