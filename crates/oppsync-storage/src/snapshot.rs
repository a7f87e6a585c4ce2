use std::path::{Path, PathBuf};

use anyhow::Context;
use oppsync_core::ExtractedOpportunity;
use tokio::fs;

use crate::write_atomic;

/// JSON array of the records extracted by the latest extraction run.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no snapshot exists.
    pub async fn load(&self) -> anyhow::Result<Option<Vec<ExtractedOpportunity>>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        let records = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(records))
    }

    pub async fn write(&self, records: &[ExtractedOpportunity]) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(records).context("serializing snapshot")?;
        write_atomic(&self.path, &bytes).await
    }

    /// Removes a stale snapshot; returns whether one existed.
    pub async fn clear(&self) -> anyhow::Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("removing {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let dir = tempdir().expect("tempdir");
        let snapshot = SnapshotFile::new(dir.path().join("opportunities_en.json"));
        assert!(snapshot.load().await.unwrap().is_none());
        assert!(!snapshot.clear().await.unwrap());
    }

    #[tokio::test]
    async fn written_snapshot_keeps_record_order() {
        let dir = tempdir().expect("tempdir");
        let snapshot = SnapshotFile::new(dir.path().join("opportunities_en.json"));
        let records = vec![
            ExtractedOpportunity::from_value(json!({"title": "first"})).unwrap(),
            ExtractedOpportunity::from_value(json!({"title": "second"})).unwrap(),
        ];
        snapshot.write(&records).await.unwrap();

        let loaded = snapshot.load().await.unwrap().unwrap();
        assert_eq!(loaded, records);
        assert!(snapshot.clear().await.unwrap());
        assert!(snapshot.load().await.unwrap().is_none());
    }
}
