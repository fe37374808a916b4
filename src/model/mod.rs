//! Core data types shared by the sync stages.
//!
//! - [`RemoteItem`]: one entry of the remote playlist, fresh every run
//! - [`LocalFile`]: one media file found in a playlist folder
//!
//! Neither is persisted. Only ids reach disk, through the ledger and the
//! metadata cache.

use std::path::PathBuf;

use crate::naming::IdOrigin;

/// An item in the remote playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Stable remote id
    pub id: String,
    /// Title as reported by the provider
    pub title: String,
    /// Zero-based position in the remote playlist
    pub position: usize,
    /// Channel/uploader name, when the provider reports one
    pub uploader: Option<String>,
}

impl RemoteItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, position: usize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            position,
            uploader: None,
        }
    }
}

/// A media file found in a playlist folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Id recovered from the file name, `None` for unmanaged files
    pub inferred_id: Option<String>,
    /// Title part of the name (or the stem for unmanaged files)
    pub inferred_title: String,
    /// How the id was recovered
    pub origin: Option<IdOrigin>,
}

impl LocalFile {
    /// File name as a lossy string.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// True if the file does not follow the naming convention and matched no known id.
    pub fn is_unmanaged(&self) -> bool {
        self.inferred_id.is_none()
    }
}
