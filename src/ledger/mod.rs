//! Per-playlist archive ledger (`downloaded.txt`).
//!
//! One id per line, append-only during a run. Legacy `<extractor> <id>` lines
//! (the format yt-dlp writes for `--download-archive`) are read as `<id>`.
//!
//! Appends write one complete line and fsync, so an interrupted process leaves
//! at worst a truncated final line, which fails id validation and is skipped
//! on the next load. Pruning rewrites the file through a temp file + rename.

use std::collections::{BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil::write_atomic;
use crate::naming::is_valid_id;

/// Ledger file name inside a playlist folder.
pub const LEDGER_FILE: &str = "downloaded.txt";

/// The set of ids believed to be materialized in one playlist folder.
#[derive(Debug)]
pub struct ArchiveLedger {
    path: PathBuf,
    /// Ids in file order
    ids: Vec<String>,
    index: HashSet<String>,
    /// The file ends without a newline (interrupted append)
    needs_newline: bool,
}

impl ArchiveLedger {
    /// Open the ledger for a playlist folder. A missing file is an empty ledger.
    pub fn open(folder: &Path) -> Result<Self> {
        Self::load(folder.join(LEDGER_FILE))
    }

    /// Load a ledger from an explicit path.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::filesystem(&path, e)),
        };

        let mut ids = Vec::new();
        let mut index = HashSet::new();
        for line in contents.lines() {
            if let Some(id) = parse_line(line)
                && index.insert(id.clone())
            {
                ids.push(id);
            }
        }

        Ok(Self {
            needs_newline: !contents.is_empty() && !contents.ends_with('\n'),
            path,
            ids,
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in file order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Ids as an ordered set.
    pub fn id_set(&self) -> BTreeSet<String> {
        self.ids.iter().cloned().collect()
    }

    /// Append an id. Returns `false` if it was already recorded.
    pub fn append(&mut self, id: &str) -> Result<bool> {
        if !is_valid_id(id) {
            return Err(Error::Ledger(format!("refusing to record malformed id {:?}", id)));
        }
        if self.index.contains(id) {
            return Ok(false);
        }

        let mut line = String::new();
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(id);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::filesystem(&self.path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| Error::filesystem(&self.path, e))?;

        self.needs_newline = false;
        self.index.insert(id.to_string());
        self.ids.push(id.to_string());
        Ok(true)
    }

    /// Remove the given ids and rewrite the file atomically.
    ///
    /// Returns the ids actually removed, in file order.
    pub fn prune(&mut self, remove: &BTreeSet<String>) -> Result<Vec<String>> {
        let removed: Vec<String> = self
            .ids
            .iter()
            .filter(|id| remove.contains(*id))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Ok(removed);
        }

        let kept: Vec<String> = self
            .ids
            .iter()
            .filter(|id| !remove.contains(*id))
            .cloned()
            .collect();

        let mut contents = kept.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        write_atomic(&self.path, contents.as_bytes()).map_err(|e| Error::filesystem(&self.path, e))?;

        for id in &removed {
            self.index.remove(id);
        }
        self.ids = kept;
        self.needs_newline = false;
        Ok(removed)
    }
}

/// Parse one ledger line: `<id>` or `<extractor> <id>`.
fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let candidate = line.split_whitespace().last()?;
    is_valid_id(candidate).then(|| candidate.to_string())
}
