//! Markdown artifact directory shared by the scrape and extract stages.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::{sha256_hex, write_atomic};

#[derive(Debug, Clone)]
pub struct StoredMarkdown {
    pub file_name: String,
    pub absolute_path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
    /// An identical file was already present and nothing was written.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarkdownStore {
    root: PathBuf,
}

impl MarkdownStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write(&self, file_name: &str, content: &str) -> anyhow::Result<StoredMarkdown> {
        let absolute_path = self.root.join(file_name);
        let content_hash = sha256_hex(content.as_bytes());

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            let existing = fs::read(&absolute_path)
                .await
                .with_context(|| format!("reading {}", absolute_path.display()))?;
            if sha256_hex(&existing) == content_hash {
                return Ok(StoredMarkdown {
                    file_name: file_name.to_string(),
                    absolute_path,
                    content_hash,
                    byte_size: content.len(),
                    deduplicated: true,
                });
            }
        }

        write_atomic(&absolute_path, content.as_bytes()).await?;
        Ok(StoredMarkdown {
            file_name: file_name.to_string(),
            absolute_path,
            content_hash,
            byte_size: content.len(),
            deduplicated: false,
        })
    }

    /// All `*.md` files, sorted by file name. A missing directory is an empty store.
    pub async fn list(&self) -> anyhow::Result<Vec<MarkdownArtifact>> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut dir = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading {}", self.root.display()))?;
        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .with_context(|| format!("stat {}", path.display()))?;
            if !metadata.is_file() {
                continue;
            }
            let modified_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(MarkdownArtifact {
                file_name: entry.file_name().to_string_lossy().to_string(),
                path,
                modified_at,
            });
        }
        out.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(out)
    }

    pub async fn read(&self, artifact: &MarkdownArtifact) -> anyhow::Result<String> {
        fs::read_to_string(&artifact.path)
            .await
            .with_context(|| format!("reading {}", artifact.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn identical_rewrites_are_deduplicated() {
        let dir = tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path().join("md"));

        let first = store.write("a.md", "# A").await.expect("first");
        let second = store.write("a.md", "# A").await.expect("second");
        let changed = store.write("a.md", "# A v2").await.expect("changed");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert!(!changed.deduplicated);
        assert_ne!(first.content_hash, changed.content_hash);
        assert_eq!(std::fs::read_to_string(first.absolute_path).unwrap(), "# A v2");
    }

    #[tokio::test]
    async fn listing_only_returns_markdown_files_in_name_order() {
        let dir = tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path());
        store.write("b.md", "b").await.unwrap();
        store.write("a.md", "a").await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let names = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.file_name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.md".to_string(), "b.md".to_string()]);
    }

    #[tokio::test]
    async fn missing_directory_lists_empty() {
        let dir = tempdir().expect("tempdir");
        let store = MarkdownStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
