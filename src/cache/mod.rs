//! Metadata cache: remote id → last known title.
//!
//! One JSON document shared by all playlists, stored in the OS data directory:
//! - Windows: %APPDATA%\playlist-sync\metadata_cache.json
//! - macOS: ~/Library/Application Support/playlist-sync/metadata_cache.json
//! - Linux: ~/.local/share/playlist-sync/metadata_cache.json
//!
//! The cache is an optimization only. Membership decisions never consult it.
//! It is read fully at startup and rewritten atomically at the end of a sync.
//! Playlist runs read a shared snapshot and hand back [`CacheUpdates`], which
//! the orchestrator merges here, so no run ever writes the file directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result, ResultExt};
use crate::fsutil::write_atomic;

/// Cache file name inside the data directory.
pub const CACHE_FILE: &str = "metadata_cache.json";

/// Display metadata remembered for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachedMetadata {
    /// Display title (already cleaned)
    #[serde(alias = "original_title")]
    pub title: String,
    /// Channel/uploader name, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
}

impl CachedMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            uploader: None,
        }
    }
}

/// New or changed entries produced by one playlist run.
pub type CacheUpdates = BTreeMap<String, CachedMetadata>;

/// In-memory view of the metadata cache file.
#[derive(Debug, Default, Clone)]
pub struct MetadataCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, CachedMetadata>,
    dirty: bool,
}

impl MetadataCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Default cache file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("playlist-sync").join(CACHE_FILE))
    }

    /// Load the cache from `path`.
    ///
    /// A missing file yields an empty cache. A corrupt file is logged and
    /// treated as empty; it will be replaced on the next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable metadata cache {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read metadata cache {:?}: {}", path, e);
                BTreeMap::new()
            }
        };

        tracing::debug!("Loaded {} cached titles from {:?}", entries.len(), path);
        Self {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&CachedMetadata> {
        self.entries.get(id)
    }

    /// Cached title for an id, if any.
    pub fn title(&self, id: &str) -> Option<&str> {
        self.entries
            .get(id)
            .map(|m| m.title.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace an entry. Returns true if the cache changed.
    pub fn insert(&mut self, id: impl Into<String>, meta: CachedMetadata) -> bool {
        let id = id.into();
        if self.entries.get(&id) == Some(&meta) {
            return false;
        }
        self.entries.insert(id, meta);
        self.dirty = true;
        true
    }

    /// Merge a run's updates. Returns the number of entries that changed.
    pub fn merge(&mut self, updates: CacheUpdates) -> usize {
        updates
            .into_iter()
            .filter(|(id, meta)| self.insert(id.clone(), meta.clone()))
            .count()
    }

    /// Drop every entry (explicit invalidation).
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the cache back if it changed. In-memory caches are a no-op.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&self.entries).with_context("serializing metadata cache")?;
        write_atomic(&path, json.as_bytes()).map_err(|e| Error::filesystem(&path, e))?;
        self.dirty = false;
        tracing::info!("Saved {} cached titles to {:?}", self.entries.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let cache = MetadataCache::load(temp.path().join(CACHE_FILE));
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_insert_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CACHE_FILE);

        let mut cache = MetadataCache::load(&path);
        assert!(cache.insert("aaaaaaaaaaa", CachedMetadata::new("Artist - Song")));
        cache.save().unwrap();

        let reloaded = MetadataCache::load(&path);
        assert_eq!(reloaded.title("aaaaaaaaaaa"), Some("Artist - Song"));
    }

    #[test]
    fn test_insert_same_value_is_not_a_change() {
        let mut cache = MetadataCache::in_memory();
        assert!(cache.insert("aaaaaaaaaaa", CachedMetadata::new("Song")));
        assert!(!cache.insert("aaaaaaaaaaa", CachedMetadata::new("Song")));
    }

    #[test]
    fn test_merge_counts_changes() {
        let mut cache = MetadataCache::in_memory();
        cache.insert("aaaaaaaaaaa", CachedMetadata::new("Old"));

        let mut updates = CacheUpdates::new();
        updates.insert("aaaaaaaaaaa".into(), CachedMetadata::new("Old"));
        updates.insert("bbbbbbbbbbb".into(), CachedMetadata::new("New"));

        assert_eq!(cache.merge(updates), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CACHE_FILE);
        fs::write(&path, "{ not json").unwrap();

        let cache = MetadataCache::load(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reads_legacy_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CACHE_FILE);
        fs::write(
            &path,
            r#"{"aaaaaaaaaaa": {"artist": "A", "track": "T", "album": "", "original_title": "A - T"}}"#,
        )
        .unwrap();

        let cache = MetadataCache::load(&path);
        assert_eq!(cache.title("aaaaaaaaaaa"), Some("A - T"));
    }

    #[test]
    fn test_clear_marks_dirty_and_empties_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CACHE_FILE);
        let mut cache = MetadataCache::load(&path);
        cache.insert("aaaaaaaaaaa", CachedMetadata::new("Song"));
        cache.save().unwrap();

        cache.clear();
        assert!(cache.is_dirty());
        cache.save().unwrap();
        assert!(MetadataCache::load(&path).is_empty());
    }
}
