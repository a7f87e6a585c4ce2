//! Append-only record of every source URL the scraper has turned into Markdown.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub source_url: String,
    pub source: String,
    pub title: String,
    pub file_name: String,
    pub content_hash: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
}

/// Serialized as a JSON object keyed by source URL.
#[derive(Debug, Clone)]
pub struct SourceManifest {
    path: PathBuf,
    entries: BTreeMap<String, ManifestEntry>,
    /// file name → source URL
    by_file: HashMap<String, String>,
}

impl SourceManifest {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::with_entries(path.into(), BTreeMap::new())
    }

    fn with_entries(path: PathBuf, entries: BTreeMap<String, ManifestEntry>) -> Self {
        let mut by_file = HashMap::with_capacity(entries.len());
        for entry in entries.values() {
            by_file
                .entry(entry.file_name.clone())
                .or_insert_with(|| entry.source_url.clone());
        }
        Self {
            path,
            entries,
            by_file,
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Self::empty(path));
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let entries = if text.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        };
        Ok(Self::with_entries(path, entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, source_url: &str) -> bool {
        self.entries.contains_key(source_url)
    }

    /// Adds the entry unless its URL is already known; existing entries are never replaced.
    pub fn insert(&mut self, entry: ManifestEntry) -> bool {
        if self.entries.contains_key(&entry.source_url) {
            return false;
        }
        self.by_file
            .entry(entry.file_name.clone())
            .or_insert_with(|| entry.source_url.clone());
        self.entries.insert(entry.source_url.clone(), entry);
        true
    }

    pub fn entry_for_file(&self, file_name: &str) -> Option<&ManifestEntry> {
        self.by_file
            .get(file_name)
            .and_then(|url| self.entries.get(url))
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.entries).context("serializing manifest")?;
        write_atomic(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(url: &str, file_name: &str) -> ManifestEntry {
        ManifestEntry {
            source_url: url.to_string(),
            source: "opportunitiescorners".to_string(),
            title: file_name.trim_end_matches(".md").to_string(),
            file_name: file_name.to_string(),
            content_hash: "00".to_string(),
            published_at: None,
            scraped_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn entries_survive_a_save_load_cycle() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("source_metadata.json");
        let mut manifest = SourceManifest::load(&path).await.expect("load missing");
        assert!(manifest.is_empty());

        assert!(manifest.insert(entry("https://x/a", "a.md")));
        manifest.save().await.expect("save");

        let reloaded = SourceManifest::load(&path).await.expect("reload");
        assert!(reloaded.contains("https://x/a"));
        assert_eq!(
            reloaded.entry_for_file("a.md").map(|e| e.source_url.as_str()),
            Some("https://x/a")
        );
    }

    #[test]
    fn known_urls_are_never_overwritten() {
        let mut manifest = SourceManifest::empty("unused.json");
        assert!(manifest.insert(entry("https://x/a", "a.md")));
        assert!(!manifest.insert(entry("https://x/a", "other.md")));
        assert_eq!(manifest.len(), 1);
        assert!(manifest.entry_for_file("other.md").is_none());
    }

    #[tokio::test]
    async fn file_lookup_covers_loaded_and_inserted_entries() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("source_metadata.json");
        let mut manifest = SourceManifest::empty(&path);
        for n in 0..50 {
            manifest.insert(entry(&format!("https://x/{n}"), &format!("{n}.md")));
        }
        manifest.save().await.expect("save");

        let mut reloaded = SourceManifest::load(&path).await.expect("reload");
        assert_eq!(
            reloaded.entry_for_file("42.md").map(|e| e.source_url.as_str()),
            Some("https://x/42")
        );
        reloaded.insert(entry("https://x/new", "new.md"));
        assert_eq!(
            reloaded.entry_for_file("new.md").map(|e| e.source_url.as_str()),
            Some("https://x/new")
        );
        assert!(reloaded.entry_for_file("missing.md").is_none());
    }
}
