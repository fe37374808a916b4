//! Quarantine manager.
//!
//! Files whose id left the remote playlist are moved (never deleted) into
//! `<playlist folder>/quarantine/`. Name clashes get a ` (n)` suffix. There is
//! no index: the quarantine folder is just files, and the scanner never looks
//! inside it.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::fsutil::move_file;
use crate::model::LocalFile;
use crate::naming::split_extension;

/// Quarantine subfolder name.
pub const QUARANTINE_DIR: &str = "quarantine";

/// A file that was moved into quarantine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineRecord {
    pub id: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A file that could not be moved.
#[derive(Debug)]
pub struct QuarantineFailure {
    pub id: Option<String>,
    pub error: Error,
}

/// Result of quarantining a batch of files.
#[derive(Debug, Default)]
pub struct QuarantineOutcome {
    pub moved: Vec<QuarantineRecord>,
    pub failed: Vec<QuarantineFailure>,
}

impl QuarantineOutcome {
    /// Ids with at least one file moved and none left behind by a failure.
    pub fn fully_quarantined_ids(&self) -> BTreeSet<String> {
        let failed: BTreeSet<&str> = self.failed.iter().filter_map(|f| f.id.as_deref()).collect();
        self.moved
            .iter()
            .map(|r| r.id.as_str())
            .filter(|id| !failed.contains(id))
            .map(String::from)
            .collect()
    }
}

/// Path of the quarantine folder for a playlist folder.
pub fn quarantine_dir(folder: &Path) -> PathBuf {
    folder.join(QUARANTINE_DIR)
}

/// Move each file into the playlist's quarantine folder.
///
/// Failures are collected per file; one bad file does not stop the rest.
pub fn quarantine_files(folder: &Path, files: &[LocalFile]) -> QuarantineOutcome {
    let mut outcome = QuarantineOutcome::default();
    if files.is_empty() {
        return outcome;
    }

    let dir = quarantine_dir(folder);
    if let Err(e) = fs::create_dir_all(&dir) {
        tracing::error!("Cannot create quarantine folder {:?}: {}", dir, e);
        for file in files {
            outcome.failed.push(QuarantineFailure {
                id: file.inferred_id.clone(),
                error: Error::filesystem(&dir, std::io::Error::new(e.kind(), e.to_string())),
            });
        }
        return outcome;
    }

    for file in files {
        let Some(id) = file.inferred_id.clone() else {
            // Unmanaged files are never moved
            continue;
        };

        let destination = unique_destination(&dir, &file.file_name());
        match move_file(&file.path, &destination) {
            Ok(()) => {
                tracing::info!(id = %id, "Quarantined {:?} -> {:?}", file.path, destination);
                outcome.moved.push(QuarantineRecord {
                    id,
                    source: file.path.clone(),
                    destination,
                });
            }
            Err(e) => {
                tracing::warn!(id = %id, "Failed to quarantine {:?}: {}", file.path, e);
                outcome.failed.push(QuarantineFailure {
                    id: Some(id),
                    error: Error::filesystem(&file.path, e),
                });
            }
        }
    }

    outcome
}

/// First free name in `dir`: `name`, then `stem (1).ext`, `stem (2).ext`, ...
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match split_extension(file_name) {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name, None),
    };

    (1u32..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
