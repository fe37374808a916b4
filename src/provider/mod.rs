//! Fetch provider seam.
//!
//! The engine never talks to the extraction tool directly. It goes through
//! [`FetchProvider`], which lists a playlist and downloads one item into a
//! folder. [`ytdlp::YtDlpProvider`] is the production implementation; tests use
//! the scripted provider in `test_utils`.

pub mod dto;
pub mod ytdlp;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::model::RemoteItem;

pub use ytdlp::YtDlpProvider;

/// Result of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedItem {
    /// Where the provider left the media file
    pub path: PathBuf,
    /// Title reported during the download, if any
    pub title: Option<String>,
    /// Uploader/channel reported during the download, if any
    pub uploader: Option<String>,
}

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    Network,
    RateLimited,
    Timeout,
    /// Playlist or item does not exist or is private
    NotFound,
    /// Item exists but cannot be fetched (removed, blocked, age-gated)
    Unavailable,
    InvalidUrl,
    /// The extraction tool could not be started
    ToolMissing,
    /// Provider output could not be understood
    Parse,
    /// Stopped because the run was cancelled
    Interrupted,
    Other,
}

impl ProviderErrorKind {
    pub const fn title(self) -> &'static str {
        match self {
            Self::Network => "Network error",
            Self::RateLimited => "Rate limited",
            Self::Timeout => "Timed out",
            Self::NotFound => "Not found",
            Self::Unavailable => "Unavailable",
            Self::InvalidUrl => "Invalid URL",
            Self::ToolMissing => "Tool missing",
            Self::Parse => "Unreadable output",
            Self::Interrupted => "Interrupted",
            Self::Other => "Provider error",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Error returned by a [`FetchProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// Attempts made before this error was returned
    pub attempts: u32,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 1,
        }
    }

    /// Classify a failure from the tool's stderr.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = last_error_line(stderr);
        Self::new(classify(stderr), message)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// The same failure, reclassified as caused by cancellation.
    pub fn interrupted(mut self) -> Self {
        self.kind = ProviderErrorKind::Interrupted;
        self
    }

    pub fn is_interrupted(&self) -> bool {
        self.kind == ProviderErrorKind::Interrupted
    }

    /// Network trouble, rate limiting, timeouts and unclassified failures are
    /// worth retrying. Missing or private content is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Network
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::Timeout
                | ProviderErrorKind::Other
        )
    }
}

/// Classify tool output into an error kind.
pub fn classify(stderr: &str) -> ProviderErrorKind {
    let lower = stderr.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["interrupted by user", "keyboardinterrupt"]) {
        ProviderErrorKind::Interrupted
    } else if has(&["http error 429", "too many requests", "rate-limit", "rate limit"]) {
        ProviderErrorKind::RateLimited
    } else if has(&["timed out", "timeout"]) {
        ProviderErrorKind::Timeout
    } else if has(&["unsupported url", "is not a valid url", "invalid url"]) {
        ProviderErrorKind::InvalidUrl
    } else if has(&[
        "private video",
        "private playlist",
        "playlist does not exist",
        "does not exist",
        "http error 404",
        "not found",
    ]) {
        ProviderErrorKind::NotFound
    } else if has(&[
        "video unavailable",
        "is not available",
        "has been removed",
        "copyright",
        "sign in to confirm your age",
        "members-only",
        "blocked it in your country",
    ]) {
        ProviderErrorKind::Unavailable
    } else if has(&[
        "unable to download",
        "connection",
        "network",
        "name resolution",
        "getaddrinfo",
        "reset by peer",
        "ssl",
        "http error 5",
    ]) {
        ProviderErrorKind::Network
    } else {
        ProviderErrorKind::Other
    }
}

/// The most informative line of tool stderr: the last `ERROR:` line, else the
/// last non-empty line.
fn last_error_line(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| "no output".to_string())
}

/// Access to the remote collection and its media.
///
/// Implement this trait to substitute a mock provider in tests.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// List a playlist in remote order.
    async fn list_playlist(&self, url: &str) -> Result<Vec<RemoteItem>, ProviderError>;

    /// Download one item into `dest_dir`.
    async fn download(&self, id: &str, dest_dir: &Path) -> Result<DownloadedItem, ProviderError>;
}
