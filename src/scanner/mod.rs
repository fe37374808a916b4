//! Local inventory of a playlist folder.
//!
//! Only the top level of the folder is scanned. The `quarantine/` subfolder and
//! anything else nested is never inventoried, which is what makes quarantine
//! idempotent.
//!
//! Each audio file becomes a [`LocalFile`]. Its id comes from the naming
//! convention ([`naming::parse_name`]), or failing that from a known id
//! embedded in the name. Files that match neither stay in the inventory with
//! no id and are reported as unmanaged.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::model::LocalFile;
use crate::naming::{self, IdOrigin};

/// A file that could not be inventoried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub path: PathBuf,
    /// Id parsed from the name, when the name itself was readable
    pub id: Option<String>,
    pub message: String,
}

/// Snapshot of a playlist folder's media files.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub folder: PathBuf,
    pub files: Vec<LocalFile>,
    pub errors: Vec<ScanError>,
}

impl Inventory {
    /// Ids with at least one local file.
    pub fn local_ids(&self) -> BTreeSet<String> {
        self.files
            .iter()
            .filter_map(|f| f.inferred_id.clone())
            .collect()
    }

    /// Files carrying the given id.
    pub fn files_for<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a LocalFile> + 'a {
        self.files
            .iter()
            .filter(move |f| f.inferred_id.as_deref() == Some(id))
    }

    /// Files that follow no convention and matched no known id.
    pub fn unmanaged(&self) -> impl Iterator<Item = &LocalFile> {
        self.files.iter().filter(|f| f.is_unmanaged())
    }

    /// Ids whose files could not be inspected this run.
    pub fn failed_ids(&self) -> BTreeSet<String> {
        self.errors.iter().filter_map(|e| e.id.clone()).collect()
    }
}

/// Scan a playlist folder.
///
/// `known_ids` (ledger and remote ids) are used to claim files whose names do
/// not follow the convention but contain one of those ids as a token.
/// A missing folder is an empty inventory.
pub fn scan_folder(folder: &Path, known_ids: &BTreeSet<String>) -> Inventory {
    let mut inventory = Inventory {
        folder: folder.to_path_buf(),
        ..Default::default()
    };

    if !folder.exists() {
        return inventory;
    }

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| folder.to_path_buf());
                let id = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(naming::parse_id);
                tracing::warn!("Failed to read entry {:?}: {}", path, e);
                inventory.errors.push(ScanError {
                    path,
                    id,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path().to_path_buf();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some((stem, ext)) = naming::split_extension(&file_name) else {
            continue;
        };
        if !naming::is_audio_extension(ext) {
            continue;
        }

        let (inferred_id, inferred_title, origin) = match naming::parse_name(&file_name) {
            Some(parsed) => (Some(parsed.id), parsed.title, Some(parsed.origin)),
            None => match naming::find_known_id(&file_name, known_ids) {
                Some(id) => (Some(id), stem.to_string(), Some(IdOrigin::LedgerMatch)),
                None => (None, stem.to_string(), None),
            },
        };

        match entry.metadata() {
            Ok(meta) if meta.len() == 0 => {
                inventory.errors.push(ScanError {
                    path,
                    id: inferred_id,
                    message: "file is empty".to_string(),
                });
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                inventory.errors.push(ScanError {
                    path,
                    id: inferred_id,
                    message: e.to_string(),
                });
                continue;
            }
        }

        inventory.files.push(LocalFile {
            path,
            inferred_id,
            inferred_title,
            origin,
        });
    }

    inventory
}
