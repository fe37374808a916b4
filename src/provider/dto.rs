//! yt-dlp JSON output shapes.

use serde::Deserialize;
use std::collections::HashSet;

use crate::model::RemoteItem;

/// `--flat-playlist --dump-single-json` output.
#[derive(Debug, Deserialize)]
pub struct PlaylistDto {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Unavailable entries are emitted as `null`
    #[serde(default)]
    pub entries: Vec<Option<EntryDto>>,
}

/// One flat playlist entry.
#[derive(Debug, Deserialize)]
pub struct EntryDto {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

/// The JSON object printed after the final move of a download.
#[derive(Debug, Deserialize)]
pub struct MovedFileDto {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
}

impl PlaylistDto {
    /// Convert to remote items in playlist order.
    ///
    /// Entries without an id are dropped and repeated ids keep their first
    /// position. Positions are renumbered over the kept entries.
    pub fn into_items(self) -> Vec<RemoteItem> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for entry in self.entries.into_iter().flatten() {
            let Some(id) = entry.id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            let position = items.len();
            items.push(RemoteItem {
                id,
                title: entry.title.unwrap_or_default(),
                position,
                uploader: entry.uploader.or(entry.channel),
            });
        }

        items
    }
}
