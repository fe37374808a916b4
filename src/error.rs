//! Application-wide error types.
//!
//! Library modules return [`Error`] (or a module-specific error such as
//! [`ProviderError`](crate::provider::ProviderError)), while the CLI uses
//! `anyhow` for convenient propagation.
//!
//! The four sync failure classes map directly onto variants:
//!
//! - [`Error::FetchFailed`]: the whole playlist listing could not be obtained
//! - [`Error::FetchItemFailed`]: one item's download failed after retries
//! - [`Error::NormalizeFailed`]: post-download rename/cleanup failed
//! - [`Error::Filesystem`]: scan or quarantine I/O failed
//!
//! # Example
//!
//! ```ignore
//! use playlist_sync::error::{Error, Result, ResultExt};
//!
//! fn load(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path).with_context("reading ledger")
//! }
//! ```

use std::path::PathBuf;

use crate::provider::ProviderError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Whole-playlist listing failed after retries
    #[error("Playlist fetch failed: {0}")]
    FetchFailed(String),

    /// A single item could not be downloaded
    #[error("Download failed for {id}: {source}")]
    FetchItemFailed {
        id: String,
        #[source]
        source: ProviderError,
    },

    /// Rename or cleanup after download failed; the file stays where it is
    #[error("Normalize failed for {path}: {message}")]
    NormalizeFailed { path: PathBuf, message: String },

    /// Scan or quarantine failure on a specific path
    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ledger contents or update rejected
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Metadata cache could not be parsed or written
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a playlist fetch error.
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::FetchFailed(message.into())
    }

    /// Create a per-item download error.
    pub fn fetch_item_failed(id: impl Into<String>, source: ProviderError) -> Self {
        Self::FetchItemFailed {
            id: id.into(),
            source,
        }
    }

    /// Create a normalize error.
    pub fn normalize(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::NormalizeFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, serde_json::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Cache(e.to_string()).context(ctx))
    }
}
