//! Test utilities and fixtures for playlist-sync tests.
//!
//! Provides a scripted [`MockProvider`] and helpers for building playlist
//! folders and comparing them byte for byte.
//!
//! # Example
//!
//! ```ignore
//! use playlist_sync::test_utils::{MockProvider, remote_items};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let provider = MockProvider::new().with_listing(remote_items(&["aaaaaaaaaaa"]));
//!     // ... test logic
//! }
//! ```

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

use crate::model::RemoteItem;
use crate::naming;
use crate::provider::{DownloadedItem, FetchProvider, ProviderError, ProviderErrorKind};

/// Bytes written for every mock download.
pub const MOCK_AUDIO: &[u8] = b"mock audio payload";

/// Remote items with titles `Song <n>` in the given order.
pub fn remote_items(ids: &[&str]) -> Vec<RemoteItem> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| RemoteItem::new(*id, format!("Song {}", i), i))
        .collect()
}

/// Write a canonical media file for `id` and return its path.
pub fn write_canonical(folder: &Path, title: &str, id: &str) -> PathBuf {
    fs::create_dir_all(folder).expect("Failed to create folder");
    let path = folder.join(naming::canonical_file_name(title, id, "mp3"));
    fs::write(&path, format!("audio for {}", id)).expect("Failed to write media file");
    path
}

/// Every file under `root` (recursively) with its contents.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path()).to_path_buf();
            let bytes = fs::read(e.path()).expect("Failed to read file");
            (rel, bytes)
        })
        .collect()
}

#[derive(Debug, Default)]
struct MockState {
    list_calls: u32,
    listing_failures_left: u32,
    listing_failure_kind: Option<ProviderErrorKind>,
    download_calls: HashMap<String, u32>,
    /// id -> (kind, failures left; None = always)
    download_failures: HashMap<String, (ProviderErrorKind, Option<u32>)>,
}

/// Scripted provider.
///
/// Listing returns the configured items (or error). Downloads write
/// `<title> [<id>].webm` into the destination, the same shape yt-dlp produces.
#[derive(Debug, Default)]
pub struct MockProvider {
    listing: Vec<RemoteItem>,
    listing_error: Option<ProviderError>,
    /// Downloading this id sets the flag and fails like an interrupted tool
    interrupt: Option<(String, Arc<AtomicBool>)>,
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, items: Vec<RemoteItem>) -> Self {
        self.listing = items;
        self
    }

    /// Every listing call fails with `error`.
    pub fn with_listing_error(mut self, error: ProviderError) -> Self {
        self.listing_error = Some(error);
        self
    }

    /// The first `times` listing calls fail with `kind`.
    pub fn fail_listing_times(self, times: u32, kind: ProviderErrorKind) -> Self {
        {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.listing_failures_left = times;
            state.listing_failure_kind = Some(kind);
        }
        self
    }

    /// Every download of `id` fails with `kind`.
    pub fn fail_download(self, id: &str, kind: ProviderErrorKind) -> Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .download_failures
            .insert(id.to_string(), (kind, None));
        self
    }

    /// The first `times` downloads of `id` fail with `kind`.
    pub fn fail_download_times(self, id: &str, times: u32, kind: ProviderErrorKind) -> Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .download_failures
            .insert(id.to_string(), (kind, Some(times)));
        self
    }

    /// Downloading `id` behaves like Ctrl-C mid-download: `cancel` is set
    /// and the call fails with the tool's interrupt message.
    pub fn interrupt_download(mut self, id: &str, cancel: Arc<AtomicBool>) -> Self {
        self.interrupt = Some((id.to_string(), cancel));
        self
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().expect("mock state poisoned").list_calls
    }

    pub fn download_calls(&self, id: &str) -> u32 {
        self.state
            .lock()
            .expect("mock state poisoned")
            .download_calls
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_downloads(&self) -> u32 {
        self.state
            .lock()
            .expect("mock state poisoned")
            .download_calls
            .values()
            .sum()
    }
}

#[async_trait]
impl FetchProvider for MockProvider {
    async fn list_playlist(&self, _url: &str) -> Result<Vec<RemoteItem>, ProviderError> {
        {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.list_calls += 1;
            if state.listing_failures_left > 0 {
                state.listing_failures_left -= 1;
                let kind = state.listing_failure_kind.unwrap_or(ProviderErrorKind::Network);
                return Err(ProviderError::new(kind, "scripted listing failure"));
            }
        }

        if let Some(err) = &self.listing_error {
            return Err(err.clone());
        }
        Ok(self.listing.clone())
    }

    async fn download(&self, id: &str, dest_dir: &Path) -> Result<DownloadedItem, ProviderError> {
        {
            let mut state = self.state.lock().expect("mock state poisoned");
            *state.download_calls.entry(id.to_string()).or_insert(0) += 1;
            if let Some((target, cancel)) = &self.interrupt
                && target == id
            {
                cancel.store(true, Ordering::SeqCst);
                return Err(ProviderError::new(ProviderErrorKind::Other, "ERROR: Interrupted by user"));
            }
            if let Some((kind, left)) = state.download_failures.get_mut(id) {
                match left {
                    None => return Err(ProviderError::new(*kind, "scripted download failure")),
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        return Err(ProviderError::new(*kind, "scripted download failure"));
                    }
                    Some(_) => {}
                }
            }
        }

        let item = self.listing.iter().find(|i| i.id == id);
        let title = item.map(|i| i.title.clone()).filter(|t| !t.is_empty());
        let stem = title.clone().unwrap_or_else(|| id.to_string());

        fs::create_dir_all(dest_dir).map_err(|e| ProviderError::new(ProviderErrorKind::Other, e.to_string()))?;
        let path = dest_dir.join(format!("{} [{}].webm", stem, id));
        fs::write(&path, MOCK_AUDIO).map_err(|e| ProviderError::new(ProviderErrorKind::Other, e.to_string()))?;

        Ok(DownloadedItem {
            path,
            title,
            uploader: item.and_then(|i| i.uploader.clone()),
        })
    }
}
