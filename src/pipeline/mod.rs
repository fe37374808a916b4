//! Fetch & normalize pipeline.
//!
//! Downloads run in a small bounded pool. Their results are consumed by one
//! loop that renames each file to its canonical name, removes leftovers for
//! the id, and only then records the id in the ledger and the cache updates.
//! That loop is the only writer for the playlist folder's ledger.
//!
//! If the process dies between download and ledger append, the next scan
//! finds the file (canonical or raw provider name) and the id is adopted
//! instead of downloaded again.

use futures::stream::{self, StreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

use crate::cache::{CacheUpdates, CachedMetadata, MetadataCache};
use crate::error::{Error, Result};
use crate::events::{EventSink, SyncEvent};
use crate::fsutil::move_file;
use crate::ledger::ArchiveLedger;
use crate::model::{LocalFile, RemoteItem};
use crate::naming::{self, IdOrigin};
use crate::provider::{DownloadedItem, FetchProvider};
use crate::report::{FailedItem, FailureStage};
use crate::retry::RetryPolicy;

/// Everything the pipeline needs for one playlist.
pub struct Pipeline<'a> {
    pub playlist: &'a str,
    pub folder: &'a Path,
    pub provider: &'a dyn FetchProvider,
    pub policy: &'a RetryPolicy,
    pub cache: &'a MetadataCache,
    pub events: &'a EventSink,
    pub cancel: &'a AtomicBool,
    /// Concurrent downloads, at least 1
    pub workers: usize,
}

/// What the pipeline did.
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub fetched: Vec<String>,
    pub adopted: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub cache_updates: CacheUpdates,
    pub cancelled: bool,
}

/// A file that reached its canonical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub path: PathBuf,
    pub metadata: CachedMetadata,
    /// Duplicates and leftovers deleted for the id
    pub removed: Vec<PathBuf>,
}

impl Pipeline<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Download, normalize and record every item, in order.
    ///
    /// After cancellation no new download starts. Downloads already running
    /// are awaited; those that still complete are recorded, those stopped by
    /// the interrupt are left for the next run.
    pub async fn run(&self, items: &[RemoteItem], ledger: &mut ArchiveLedger) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        let total = items.len();

        let downloads = stream::iter(items.iter().enumerate())
            .map(|(index, item)| async move {
                if self.is_cancelled() {
                    return (item, None);
                }
                self.events.emit(SyncEvent::ItemStarted {
                    playlist: self.playlist.to_string(),
                    id: item.id.clone(),
                    index,
                    total,
                });
                let label = format!("download {}", item.id);
                let result = self
                    .policy
                    .run(&label, self.cancel, |_| self.provider.download(&item.id, self.folder))
                    .await;
                (item, Some(result))
            })
            .buffered(self.workers.max(1));
        futures::pin_mut!(downloads);

        let mut interrupted = 0usize;
        while let Some((item, result)) = downloads.next().await {
            match result {
                None => outcome.cancelled = true,
                Some(Ok(downloaded)) => self.finish_item(item, downloaded, ledger, &mut outcome),
                Some(Err(e)) if e.is_interrupted() => {
                    tracing::debug!(playlist = %self.playlist, id = %item.id, "Download stopped: {}", e);
                    interrupted += 1;
                    outcome.cancelled = true;
                }
                Some(Err(e)) => {
                    let error = Error::fetch_item_failed(&item.id, e);
                    tracing::warn!(playlist = %self.playlist, id = %item.id, "{}", error);
                    self.record_failure(&mut outcome, FailedItem::from_error(&item.id, FailureStage::Download, &error));
                }
            }
        }

        if outcome.cancelled || self.is_cancelled() {
            outcome.cancelled = true;
            tracing::warn!(
                playlist = %self.playlist,
                done = outcome.fetched.len() + outcome.failed.len(),
                interrupted,
                total,
                "Cancelled; remaining items will be fetched next run"
            );
        }
        outcome
    }

    fn finish_item(
        &self,
        item: &RemoteItem,
        downloaded: DownloadedItem,
        ledger: &mut ArchiveLedger,
        outcome: &mut PipelineOutcome,
    ) {
        let normalized = match normalize_download(self.folder, item, &downloaded, self.cache) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(playlist = %self.playlist, id = %item.id, "{}", e);
                self.record_failure(outcome, FailedItem::from_error(&item.id, FailureStage::Normalize, &e));
                return;
            }
        };

        if let Err(e) = ledger.append(&item.id) {
            tracing::error!(playlist = %self.playlist, id = %item.id, "{}", e);
            self.record_failure(outcome, FailedItem::from_error(&item.id, FailureStage::Ledger, &e));
            return;
        }

        tracing::info!(playlist = %self.playlist, id = %item.id, "Fetched {:?}", normalized.path);
        outcome.cache_updates.insert(item.id.clone(), normalized.metadata);
        outcome.fetched.push(item.id.clone());
        self.events.emit(SyncEvent::ItemFetched {
            playlist: self.playlist.to_string(),
            id: item.id.clone(),
            path: normalized.path,
        });
    }

    fn record_failure(&self, outcome: &mut PipelineOutcome, failure: FailedItem) {
        self.events.emit(SyncEvent::ItemFailed {
            playlist: self.playlist.to_string(),
            id: failure.id.clone(),
            stage: failure.stage,
            reason: failure.reason.clone(),
        });
        outcome.failed.push(failure);
    }

    /// Record files that are on disk but missing from the ledger.
    ///
    /// Raw provider names are renamed to the canonical form first.
    pub fn adopt(&self, files: &[LocalFile], ledger: &mut ArchiveLedger, outcome: &mut PipelineOutcome) {
        for file in files {
            let Some(id) = file.inferred_id.as_deref() else {
                continue;
            };

            if file.origin == Some(IdOrigin::ProviderOutput) {
                let downloaded = DownloadedItem {
                    path: file.path.clone(),
                    title: Some(file.inferred_title.clone()),
                    uploader: None,
                };
                let item = RemoteItem::new(id, file.inferred_title.clone(), 0);
                match normalize_download(self.folder, &item, &downloaded, self.cache) {
                    Ok(normalized) => {
                        outcome.cache_updates.insert(id.to_string(), normalized.metadata);
                    }
                    Err(e) => {
                        // The raw file still counts as present
                        tracing::warn!(playlist = %self.playlist, id, "Could not rename adopted file: {}", e);
                    }
                }
            }

            match ledger.append(id) {
                Ok(_) => {
                    tracing::info!(playlist = %self.playlist, id, "Adopted existing file {:?}", file.path);
                    outcome.adopted.push(id.to_string());
                }
                Err(e) => {
                    tracing::error!(playlist = %self.playlist, id, "{}", e);
                    self.record_failure(outcome, FailedItem::from_error(id, FailureStage::Ledger, &e));
                }
            }
        }
    }
}

/// Pick the display title: cache first, then the provider, then the file name.
pub fn resolve_title(
    item: &RemoteItem,
    downloaded: &DownloadedItem,
    cache: &MetadataCache,
) -> CachedMetadata {
    if let Some(cached) = cache.get(&item.id).filter(|m| !m.title.trim().is_empty()) {
        return cached.clone();
    }

    let uploader = downloaded.uploader.clone().or_else(|| item.uploader.clone());
    let provider_title = downloaded
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| Some(item.title.as_str()).filter(|t| !t.trim().is_empty()));

    let title = match provider_title {
        Some(title) => naming::display_title(title, uploader.as_deref()),
        None => title_from_path(&downloaded.path).unwrap_or_else(|| naming::UNTITLED.to_string()),
    };

    CachedMetadata { title, uploader }
}

fn title_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    match naming::parse_name(name) {
        Some(parsed) => Some(naming::clean_title(&parsed.title)),
        None => naming::split_extension(name).map(|(stem, _)| naming::clean_title(stem)),
    }
    .filter(|t| !t.is_empty())
}

/// Rename a fresh download to its canonical name and remove leftovers.
///
/// If the canonical file already exists the download is treated as a
/// duplicate and removed. Fails without touching the ledger when the file is
/// missing, empty or not audio.
pub fn normalize_download(
    folder: &Path,
    item: &RemoteItem,
    downloaded: &DownloadedItem,
    cache: &MetadataCache,
) -> Result<Normalized> {
    let source = &downloaded.path;
    let meta = fs::metadata(source)
        .map_err(|e| Error::normalize(source, format!("downloaded file is not readable: {}", e)))?;
    if !meta.is_file() {
        return Err(Error::normalize(source, "download did not produce a regular file"));
    }

    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| naming::is_audio_extension(e))
        .ok_or_else(|| Error::normalize(source, "downloaded file has no audio extension"))?
        .to_ascii_lowercase();

    let metadata = resolve_title(item, downloaded, cache);
    let target = folder.join(naming::canonical_file_name(&metadata.title, &item.id, &ext));

    let mut removed = Vec::new();
    if source != &target {
        if target.exists() {
            tracing::debug!(id = %item.id, "Canonical file already present, dropping duplicate {:?}", source);
            fs::remove_file(source).map_err(|e| Error::normalize(source, e.to_string()))?;
            removed.push(source.clone());
        } else {
            move_file(source, &target).map_err(|e| Error::normalize(source, format!("rename failed: {}", e)))?;
        }
    }

    removed.extend(remove_leftovers(folder, &item.id, &target));

    match fs::metadata(&target) {
        Ok(m) if m.is_file() && m.len() > 0 => Ok(Normalized {
            path: target,
            metadata,
            removed,
        }),
        Ok(_) => Err(Error::normalize(&target, "canonical file is empty")),
        Err(e) => Err(Error::normalize(&target, format!("canonical file missing: {}", e))),
    }
}

/// Remove partials, sidecars and other audio copies carrying `id`.
///
/// Returns the removed paths. Failures are logged; they never undo a
/// successful rename.
pub fn remove_leftovers(folder: &Path, id: &str, keep: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || entry.path() == keep {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !naming::contains_id_token(&name, id) {
            continue;
        }
        let Some((_, ext)) = naming::split_extension(&name) else {
            continue;
        };
        if !naming::is_artifact_extension(ext) && !naming::is_audio_extension(ext) {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                tracing::debug!(id, "Removed leftover {:?}", entry.path());
                removed.push(entry.path().to_path_buf());
            }
            Err(e) => tracing::warn!(id, "Failed to remove leftover {:?}: {}", entry.path(), e),
        }
    }

    removed
}
