//! Folder organizer.
//!
//! Brings files that are already on disk into line with the naming
//! convention, without touching the network:
//!
//! - one keeper per id, canonical name preferred, other audio copies of the
//!   id go to quarantine
//! - keepers under a provider or legacy name are renamed to
//!   `<title> - <id>.<ext>`
//! - partials, thumbnails and other by-products carrying a managed id are
//!   deleted
//!
//! Ids whose files failed to scan are left alone. Unmanaged files are never
//! touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::cache::{CacheUpdates, MetadataCache};
use crate::model::{LocalFile, RemoteItem};
use crate::naming::{self, IdOrigin};
use crate::pipeline::normalize_download;
use crate::provider::DownloadedItem;
use crate::quarantine::{QuarantineRecord, quarantine_files};
use crate::reconcile::origin_rank;
use crate::report::{FailedItem, FailureStage};
use crate::scanner::Inventory;

/// Work for one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizeStep {
    pub id: String,
    /// The file that stays
    pub keep: LocalFile,
    /// Other audio copies of the same id
    pub duplicates: Vec<LocalFile>,
}

impl OrganizeStep {
    pub fn needs_rename(&self) -> bool {
        self.keep.origin != Some(IdOrigin::Canonical)
    }

    pub fn is_noop(&self) -> bool {
        !self.needs_rename() && self.duplicates.is_empty()
    }

    /// Title to use when the cache knows nothing about the id.
    fn fallback_title(&self) -> String {
        match self.keep.origin {
            Some(IdOrigin::LedgerMatch) => naming::clean_title(&self.keep.inferred_title.replace(&self.id, " ")),
            _ => self.keep.inferred_title.clone(),
        }
    }
}

/// What [`apply_organize`] did.
#[derive(Debug, Default)]
pub struct OrganizeOutcome {
    /// Ids whose keeper got its canonical name, with the new path
    pub renamed: Vec<(String, PathBuf)>,
    pub duplicates: Vec<QuarantineRecord>,
    /// By-products deleted
    pub removed: Vec<PathBuf>,
    pub failed: Vec<FailedItem>,
    pub cache_updates: CacheUpdates,
}

/// Group the inventory by id and pick a keeper for each.
///
/// Every managed id gets a step, including no-op ones, so leftover cleanup
/// sees the full set of ids.
pub fn plan_organize(inventory: &Inventory) -> Vec<OrganizeStep> {
    let failed = inventory.failed_ids();

    inventory
        .local_ids()
        .difference(&failed)
        .filter_map(|id| {
            let mut files: Vec<&LocalFile> = inventory.files_for(id).collect();
            files.sort_by(|a, b| {
                origin_rank(a.origin)
                    .cmp(&origin_rank(b.origin))
                    .then_with(|| a.path.cmp(&b.path))
            });
            let (keep, rest) = files.split_first()?;
            Some(OrganizeStep {
                id: id.clone(),
                keep: (*keep).clone(),
                duplicates: rest.iter().map(|f| (*f).clone()).collect(),
            })
        })
        .collect()
}

/// Carry out the steps in `folder`.
///
/// Duplicates are quarantined before the keeper is renamed, so the rename
/// never sweeps up a copy that should have been kept.
pub fn apply_organize(folder: &Path, steps: &[OrganizeStep], cache: &MetadataCache) -> OrganizeOutcome {
    let mut outcome = OrganizeOutcome::default();

    for step in steps.iter().filter(|s| !s.is_noop()) {
        let moved = quarantine_files(folder, &step.duplicates);
        outcome.duplicates.extend(moved.moved);
        for failure in moved.failed {
            outcome
                .failed
                .push(FailedItem::from_error(&step.id, FailureStage::Organize, &failure.error));
        }

        if !step.needs_rename() {
            continue;
        }

        let title = step.fallback_title();
        let downloaded = DownloadedItem {
            path: step.keep.path.clone(),
            title: Some(title.clone()),
            uploader: None,
        };
        let item = RemoteItem::new(&step.id, title, 0);
        match normalize_download(folder, &item, &downloaded, cache) {
            Ok(normalized) => {
                tracing::info!(id = %step.id, "Renamed {:?} -> {:?}", step.keep.path, normalized.path);
                outcome.removed.extend(normalized.removed);
                outcome.cache_updates.insert(step.id.clone(), normalized.metadata);
                outcome.renamed.push((step.id.clone(), normalized.path));
            }
            Err(e) => {
                tracing::warn!(id = %step.id, "Could not rename {:?}: {}", step.keep.path, e);
                outcome
                    .failed
                    .push(FailedItem::from_error(&step.id, FailureStage::Organize, &e));
            }
        }
    }

    let ids: BTreeSet<String> = steps.iter().map(|s| s.id.clone()).collect();
    outcome.removed.extend(remove_artifacts(folder, &ids));
    outcome
}

/// By-products in `folder` that carry one of `ids`.
pub fn find_artifacts(folder: &Path, ids: &BTreeSet<String>) -> Vec<PathBuf> {
    if ids.is_empty() {
        return Vec::new();
    }

    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            naming::split_extension(&name).is_some_and(|(_, ext)| naming::is_artifact_extension(ext))
                && naming::find_known_id(&name, ids).is_some()
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn remove_artifacts(folder: &Path, ids: &BTreeSet<String>) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in find_artifacts(folder, ids) {
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Removed leftover {:?}", path);
                removed.push(path);
            }
            // Already gone with a renamed keeper's leftovers
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove leftover {:?}: {}", path, e),
        }
    }
    removed
}

/// Ids whose keeper would be renamed, for dry runs.
pub fn planned_renames(steps: &[OrganizeStep]) -> Vec<String> {
    steps
        .iter()
        .filter(|s| s.needs_rename())
        .map(|s| s.id.clone())
        .collect()
}

/// Duplicate count per id, for dry runs.
pub fn planned_duplicates(steps: &[OrganizeStep]) -> BTreeMap<String, usize> {
    steps
        .iter()
        .filter(|s| !s.duplicates.is_empty())
        .map(|s| (s.id.clone(), s.duplicates.len()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedMetadata;
    use crate::quarantine::QUARANTINE_DIR;
    use crate::scanner::scan_folder;
    use crate::test_utils::write_canonical;
    use tempfile::tempdir;

    const A: &str = "aaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbb";
    const C: &str = "ccccccccccc";

    fn known(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_prefers_canonical_keeper() {
        let dir = tempdir().unwrap();
        let canonical = write_canonical(dir.path(), "Song A", A);
        fs::write(dir.path().join(format!("Song A [{}].webm", A)), b"raw").unwrap();
        fs::write(dir.path().join(format!("Song B [{}].m4a", B)), b"raw").unwrap();

        let steps = plan_organize(&scan_folder(dir.path(), &BTreeSet::new()));

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].keep.path, canonical);
        assert_eq!(steps[0].duplicates.len(), 1);
        assert!(!steps[0].needs_rename());
        assert!(steps[1].needs_rename());
        assert!(steps[1].duplicates.is_empty());
        assert_eq!(planned_renames(&steps), vec![B.to_string()]);
        assert_eq!(planned_duplicates(&steps).get(A), Some(&1));
    }

    #[test]
    fn test_plan_skips_ids_that_failed_to_scan() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(format!("Song A [{}].webm", A)), b"raw").unwrap();
        fs::write(dir.path().join(format!("Song A - {}.mp3", A)), b"").unwrap();

        let inventory = scan_folder(dir.path(), &BTreeSet::new());
        assert!(plan_organize(&inventory).is_empty());
    }

    #[test]
    fn test_apply_renames_and_quarantines_duplicates() {
        let dir = tempdir().unwrap();
        let folder = dir.path();
        write_canonical(folder, "Song A", A);
        fs::write(folder.join(format!("Song A [{}].webm", A)), b"copy").unwrap();
        fs::write(folder.join(format!("Song B [{}].m4a", B)), b"raw b").unwrap();
        fs::write(folder.join(format!("{} live take.mp3", C)), b"legacy c").unwrap();
        fs::write(folder.join(format!("Song A [{}].jpg", A)), b"thumb").unwrap();
        fs::write(folder.join(format!("Song B [{}].webm.part", B)), b"partial").unwrap();
        fs::write(folder.join("cover.jpg"), b"user image").unwrap();

        let inventory = scan_folder(folder, &known(&[C]));
        let steps = plan_organize(&inventory);
        let mut cache = MetadataCache::in_memory();
        cache.insert(B, CachedMetadata::new("Band - Song B"));

        let outcome = apply_organize(folder, &steps, &cache);

        assert!(outcome.failed.is_empty());
        let renamed: Vec<&str> = outcome.renamed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(renamed, vec![B, C]);
        assert!(folder.join(format!("Band - Song B - {}.m4a", B)).exists());
        assert!(folder.join(format!("live take - {}.mp3", C)).exists());
        assert_eq!(outcome.cache_updates.get(C).map(|m| m.title.as_str()), Some("live take"));

        assert_eq!(outcome.duplicates.len(), 1);
        let moved = folder.join(QUARANTINE_DIR).join(format!("Song A [{}].webm", A));
        assert_eq!(fs::read(moved).unwrap(), b"copy");

        assert!(!folder.join(format!("Song A [{}].jpg", A)).exists());
        assert!(!folder.join(format!("Song B [{}].webm.part", B)).exists());
        assert!(folder.join("cover.jpg").exists());
        assert_eq!(outcome.removed.len(), 2);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let dir = tempdir().unwrap();
        let folder = dir.path();
        fs::write(folder.join(format!("Song B [{}].m4a", B)), b"raw b").unwrap();

        let cache = MetadataCache::in_memory();
        let first = apply_organize(folder, &plan_organize(&scan_folder(folder, &BTreeSet::new())), &cache);
        assert_eq!(first.renamed.len(), 1);

        let steps = plan_organize(&scan_folder(folder, &BTreeSet::new()));
        assert!(steps.iter().all(OrganizeStep::is_noop));
        let second = apply_organize(folder, &steps, &cache);
        assert!(second.renamed.is_empty());
        assert!(second.removed.is_empty());
    }

    #[test]
    fn test_rename_onto_existing_file_drops_the_copy() {
        let dir = tempdir().unwrap();
        let folder = dir.path();
        fs::write(folder.join(format!("Song B [{}].m4a", B)), b"raw b").unwrap();
        fs::write(folder.join(format!("Song B - {}.m4a", B)), b"kept").unwrap();

        // Keeper is the canonical file, the raw one is a duplicate
        let steps = plan_organize(&scan_folder(folder, &BTreeSet::new()));
        let outcome = apply_organize(folder, &steps, &MetadataCache::in_memory());

        assert!(outcome.renamed.is_empty());
        assert_eq!(outcome.duplicates.len(), 1);
        assert_eq!(fs::read(folder.join(format!("Song B - {}.m4a", B))).unwrap(), b"kept");
    }
}
