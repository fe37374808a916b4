//! Run reporter: per-playlist results, the overall summary and the
//! `failed_downloads.txt` report.
//!
//! The report is tab separated with `#` comment lines so it can be read by
//! people and fed back into a re-run:
//!
//! ```text
//! # playlist-sync failures for Mix
//! # generated 2026-01-02 10:11:12
//! download	dQw4w9WgXcQ	https://www.youtube.com/watch?v=dQw4w9WgXcQ	Video unavailable
//! scan	/music/Mix/broken.mp3	-	/music/Mix/broken.mp3: file is empty
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil::write_atomic;
use crate::naming;
use crate::reconcile::Skipped;

/// Failure report file name inside a playlist folder.
pub const FAILURE_REPORT_FILE: &str = "failed_downloads.txt";

/// Where in the per-item flow a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    Scan,
    Download,
    Normalize,
    Ledger,
    Quarantine,
    Organize,
}

impl FailureStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Download => "download",
            Self::Normalize => "normalize",
            Self::Ledger => "ledger",
            Self::Quarantine => "quarantine",
            Self::Organize => "organize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(Self::Scan),
            "download" => Some(Self::Download),
            "normalize" => Some(Self::Normalize),
            "ledger" => Some(Self::Ledger),
            "quarantine" => Some(Self::Quarantine),
            "organize" => Some(Self::Organize),
            _ => None,
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub id: String,
    pub stage: FailureStage,
    pub reason: String,
}

impl FailedItem {
    pub fn new(id: impl Into<String>, stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage,
            reason: reason.into(),
        }
    }

    /// Build from an engine error, flattening newlines so the report stays one
    /// line per item.
    pub fn from_error(id: impl Into<String>, stage: FailureStage, error: &Error) -> Self {
        Self::new(id, stage, error.to_string().replace(['\n', '\t'], " "))
    }

    /// Watch URL, when the id is a remote id and not a file path.
    pub fn url(&self) -> Option<String> {
        naming::is_valid_id(&self.id).then(|| item_url(&self.id))
    }
}

/// Outcome of one playlist run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistResult {
    pub playlist: String,
    pub folder: PathBuf,
    /// Items in the remote listing
    pub remote_count: usize,
    pub fetched: Vec<String>,
    /// Unledgered local files recorded in the ledger
    pub adopted: Vec<String>,
    pub quarantined: Vec<String>,
    pub failed: Vec<FailedItem>,
    /// Set when the playlist was left untouched
    pub aborted: Option<String>,
    pub already_present: usize,
    pub stale_pruned: Vec<String>,
    /// Ids whose file got its canonical name from the organizer
    pub renamed: Vec<String>,
    /// Extra audio copies moved to quarantine
    pub duplicates: usize,
    /// Partials and other by-products deleted
    pub cleaned: usize,
    pub unmanaged: Vec<PathBuf>,
    pub skipped: Vec<Skipped>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl PlaylistResult {
    pub fn new(playlist: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            playlist: playlist.into(),
            folder: folder.into(),
            ..Default::default()
        }
    }

    /// A run that changed nothing because the fetch failed or came back empty.
    pub fn aborted(playlist: impl Into<String>, folder: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            aborted: Some(reason.into()),
            ..Self::new(playlist, folder)
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Completed with no per-item failures.
    pub fn is_clean(&self) -> bool {
        !self.is_aborted() && !self.cancelled && self.failed.is_empty()
    }
}

impl fmt::Display for PlaylistResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.aborted {
            write!(f, "{}: aborted, {}", self.playlist, reason)?;
            if !self.failed.is_empty() {
                write!(f, ", {} failed", self.failed.len())?;
            }
            return Ok(());
        }

        let verb = if self.dry_run { "would fetch" } else { "fetched" };
        write!(
            f,
            "{}: {} {}, {} already present, {} quarantined, {} failed",
            self.playlist,
            verb,
            self.fetched.len(),
            self.already_present,
            self.quarantined.len(),
            self.failed.len()
        )?;
        if !self.stale_pruned.is_empty() {
            write!(f, ", {} stale ledger entries pruned", self.stale_pruned.len())?;
        }
        if !self.renamed.is_empty() {
            write!(f, ", {} renamed", self.renamed.len())?;
        }
        if self.duplicates > 0 {
            write!(f, ", {} duplicates quarantined", self.duplicates)?;
        }
        if self.cleaned > 0 {
            write!(f, ", {} leftovers removed", self.cleaned)?;
        }
        if !self.unmanaged.is_empty() {
            write!(f, ", {} unmanaged", self.unmanaged.len())?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        Ok(())
    }
}

/// Totals over every playlist in a sync.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub results: Vec<PlaylistResult>,
}

impl SyncSummary {
    pub fn fetched(&self) -> usize {
        self.results.iter().map(|r| r.fetched.len()).sum()
    }

    pub fn quarantined(&self) -> usize {
        self.results.iter().map(|r| r.quarantined.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().map(|r| r.failed.len()).sum()
    }

    pub fn already_present(&self) -> usize {
        self.results.iter().map(|r| r.already_present).sum()
    }

    pub fn aborted(&self) -> impl Iterator<Item = &PlaylistResult> {
        self.results.iter().filter(|r| r.is_aborted())
    }

    /// True if every playlist completed without aborts or failures.
    pub fn is_clean(&self) -> bool {
        self.results.iter().all(PlaylistResult::is_clean)
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let aborted = self.aborted().count();
        write!(
            f,
            "{} playlist(s): {} fetched, {} already present, {} quarantined, {} failed",
            self.results.len(),
            self.fetched(),
            self.already_present(),
            self.quarantined(),
            self.failed()
        )?;
        if aborted > 0 {
            write!(f, ", {} aborted", aborted)?;
        }
        Ok(())
    }
}

/// Watch URL used in failure reports.
pub fn item_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

/// Write (or clear) the failure report for a finished playlist run.
///
/// Dry runs leave the folder alone, and so do aborted runs unless they
/// recorded failures. A completed run without failures removes any previous
/// report. Returns the path written, if any.
pub fn write_failure_report(result: &PlaylistResult) -> Result<Option<PathBuf>> {
    if result.dry_run || (result.is_aborted() && result.failed.is_empty()) {
        return Ok(None);
    }

    let path = result.folder.join(FAILURE_REPORT_FILE);
    if result.failed.is_empty() {
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed old failure report {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::filesystem(&path, e)),
        }
        return Ok(None);
    }

    let mut contents = format!(
        "# playlist-sync failures for {}\n# generated {}\n",
        result.playlist,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    for item in &result.failed {
        contents.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            item.stage,
            item.id,
            item.url().as_deref().unwrap_or("-"),
            item.reason
        ));
    }

    write_atomic(&path, contents.as_bytes()).map_err(|e| Error::filesystem(&path, e))?;
    tracing::info!(playlist = %result.playlist, "Wrote {} failure(s) to {:?}", result.failed.len(), path);
    Ok(Some(path))
}

/// Read a playlist folder's failure report. A missing report is an empty list.
pub fn read_failure_report(folder: &Path) -> Result<Vec<FailedItem>> {
    let path = folder.join(FAILURE_REPORT_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::filesystem(&path, e)),
    };

    Ok(contents
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\t');
            let stage = FailureStage::parse(parts.next()?)?;
            let id = parts.next()?;
            let _url = parts.next()?;
            let reason = parts.next().unwrap_or_default();
            Some(FailedItem::new(id, stage, reason))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn result_with_failures(folder: &Path) -> PlaylistResult {
        PlaylistResult {
            fetched: vec!["aaaaaaaaaaa".into()],
            failed: vec![
                FailedItem::new("bbbbbbbbbbb", FailureStage::Download, "Unavailable: Video unavailable"),
                FailedItem::new("ccccccccccc", FailureStage::Normalize, "target is a directory"),
            ],
            ..PlaylistResult::new("Mix", folder)
        }
    }

    #[test]
    fn test_write_and_read_report() {
        let dir = tempdir().unwrap();
        let result = result_with_failures(dir.path());

        let path = write_failure_report(&result).unwrap().unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# playlist-sync failures for Mix"));
        assert!(contents.contains("https://www.youtube.com/watch?v=bbbbbbbbbbb"));

        let items = read_failure_report(dir.path()).unwrap();
        assert_eq!(items, result.failed);
    }

    #[test]
    fn test_report_is_overwritten_and_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(FAILURE_REPORT_FILE);

        write_failure_report(&result_with_failures(dir.path())).unwrap();
        assert!(path.exists());

        let clean = PlaylistResult::new("Mix", dir.path());
        assert_eq!(write_failure_report(&clean).unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_aborted_run_leaves_report_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(FAILURE_REPORT_FILE);
        fs::write(&path, "previous").unwrap();

        let aborted = PlaylistResult::aborted("Mix", dir.path(), "empty");
        assert_eq!(write_failure_report(&aborted).unwrap(), None);
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous");
    }

    #[test]
    fn test_summaries_distinguish_abort_from_failures() {
        let dir = tempdir().unwrap();
        let aborted = PlaylistResult::aborted("Empty", dir.path(), "remote playlist returned no items");
        let failed = result_with_failures(dir.path());

        assert_eq!(aborted.to_string(), "Empty: aborted, remote playlist returned no items");
        assert_eq!(
            failed.to_string(),
            "Mix: fetched 1, 0 already present, 0 quarantined, 2 failed"
        );

        let summary = SyncSummary {
            results: vec![aborted, failed],
        };
        assert_eq!(summary.fetched(), 1);
        assert_eq!(summary.failed(), 2);
        assert!(!summary.is_clean());
        assert!(summary.to_string().ends_with("1 aborted"));
    }

    #[test]
    fn test_scan_failures_are_reported_on_aborted_runs() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.mp3");
        let result = PlaylistResult {
            failed: vec![FailedItem::new(
                broken.display().to_string(),
                FailureStage::Scan,
                format!("{}: file is empty", broken.display()),
            )],
            ..PlaylistResult::aborted("Mix", dir.path(), "empty")
        };

        assert_eq!(result.to_string(), "Mix: aborted, empty, 1 failed");
        assert_eq!(result.failed[0].url(), None);

        write_failure_report(&result).unwrap().unwrap();
        let contents = fs::read_to_string(dir.path().join(FAILURE_REPORT_FILE)).unwrap();
        assert!(contents.contains("scan\t"));
        assert!(contents.contains("\t-\t"));
        assert_eq!(read_failure_report(dir.path()).unwrap(), result.failed);
    }

    #[test]
    fn test_from_error_flattens_newlines() {
        let item = FailedItem::from_error(
            "aaaaaaaaaaa",
            FailureStage::Normalize,
            &Error::normalize("/x", "line one\nline two"),
        );
        assert!(!item.reason.contains('\n'));
    }
}
