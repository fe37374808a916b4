//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\playlist-sync\config.toml
//! - macOS: ~/Library/Application Support/playlist-sync/config.toml
//! - Linux: ~/.config/playlist-sync/config.toml
//!
//! The file is human-readable and editable. The sync engine only reads it;
//! the `add`, `remove` and `set-path` commands write it back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::naming::sanitize_filename;
use crate::retry::RetryPolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where playlist folders live
    pub library: LibraryConfig,

    /// Extraction tool settings
    pub provider: ProviderConfig,

    /// Backoff for listing and downloads
    pub retry: RetryConfig,

    /// Concurrency knobs
    pub sync: SyncConfig,

    /// Configured playlists, in sync order
    pub playlists: Vec<PlaylistConfig>,
}

/// Library location settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Base download directory (default: the OS music folder)
    pub download_path: Option<PathBuf>,
}

/// A playlist to keep in sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// Display name
    pub name: String,

    /// Playlist URL
    pub url: String,

    /// Remote playlist id, derived from the URL when added
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,

    /// Folder name under the download path (default: sanitized name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl PlaylistConfig {
    /// Build a playlist entry from user input.
    pub fn new(name: impl Into<String>, url: &str) -> Self {
        let url = normalize_url(url);
        Self {
            name: name.into(),
            playlist_id: extract_playlist_id(&url),
            url,
            folder: None,
        }
    }

    /// Stored id, or the one derived from the URL.
    pub fn id(&self) -> Option<String> {
        self.playlist_id
            .clone()
            .or_else(|| extract_playlist_id(&self.url))
    }

    /// Folder name under the download path.
    pub fn folder_name(&self) -> String {
        let name = self.folder.as_deref().unwrap_or(&self.name);
        sanitize_folder_name(name)
    }

    /// Absolute playlist folder for a base directory.
    pub fn resolved_folder(&self, base: &Path) -> PathBuf {
        base.join(self.folder_name())
    }
}

/// Extraction tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// yt-dlp executable name or path
    pub binary: String,

    /// Netscape cookie file for age-gated or private content
    pub cookies_file: Option<PathBuf>,

    /// yt-dlp format selector
    pub audio_format: String,

    /// Extra arguments appended to every yt-dlp call
    pub extra_args: Vec<String>,

    /// Listing timeout in seconds
    pub list_timeout_secs: u64,

    /// Per-item download timeout in seconds
    pub download_timeout_secs: u64,

    /// Run yt-dlp verbosely and append its output to `yt-dlp-debug.log` in
    /// the playlist folder
    pub debug: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            cookies_file: config_dir().map(|d| d.join("cookies.txt")),
            audio_format: "bestaudio[ext=webm]/bestaudio[ext=m4a]/bestaudio".to_string(),
            extra_args: Vec::new(),
            list_timeout_secs: 300,
            download_timeout_secs: 900,
            debug: false,
        }
    }
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation, including the first
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Cap on any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            ..RetryPolicy::default()
        }
    }
}

/// Concurrency settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Playlists reconciled at the same time
    pub max_parallel_playlists: usize,

    /// Concurrent downloads within one playlist
    pub download_workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel_playlists: 1,
            download_workers: 1,
        }
    }
}

impl Config {
    /// Base directory for playlist folders.
    pub fn download_path(&self) -> PathBuf {
        self.library
            .download_path
            .clone()
            .or_else(|| dirs::audio_dir().map(|d| d.join("playlist-sync")))
            .or_else(|| dirs::home_dir().map(|d| d.join("Music").join("playlist-sync")))
            .unwrap_or_else(|| PathBuf::from("playlist-sync"))
    }

    /// Add a playlist. The URL is normalized and playlists are unique by id
    /// (or by URL when no id can be derived).
    pub fn add_playlist(
        &mut self,
        url: &str,
        name: Option<&str>,
        folder: Option<&str>,
    ) -> Result<&PlaylistConfig, ConfigError> {
        let url = normalize_url(url);
        if !is_probably_url(&url) {
            return Err(ConfigError::InvalidUrl(url));
        }

        let id = extract_playlist_id(&url);
        let display = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .or_else(|| id.clone())
            .unwrap_or_else(|| format!("Playlist {}", self.playlists.len() + 1));

        if let Some(existing) = self.playlists.iter().find(|p| match (&id, p.id()) {
            (Some(new), Some(old)) => *new == old,
            _ => normalize_url(&p.url) == url,
        }) {
            return Err(ConfigError::DuplicatePlaylist(existing.name.clone()));
        }
        if self.playlists.iter().any(|p| p.name.eq_ignore_ascii_case(&display)) {
            return Err(ConfigError::DuplicatePlaylist(display));
        }

        let mut playlist = PlaylistConfig::new(display, &url);
        playlist.folder = folder.map(str::trim).filter(|f| !f.is_empty()).map(String::from);
        self.playlists.push(playlist);
        Ok(&self.playlists[self.playlists.len() - 1])
    }

    /// Remove a playlist by name (case-insensitive). Files are left alone.
    pub fn remove_playlist(&mut self, name: &str) -> Option<PlaylistConfig> {
        let index = self
            .playlists
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.playlists.remove(index))
    }

    /// Playlists matching `names`, or all of them when `names` is empty.
    pub fn select_playlists(&self, names: &[String]) -> Result<Vec<PlaylistConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.playlists.clone());
        }
        names
            .iter()
            .map(|name| {
                self.playlists
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownPlaylist(name.clone()))
            })
            .collect()
    }

    /// Drop playlists that repeat an earlier id or folder. Returns how many
    /// were dropped.
    pub fn dedupe_playlists(&mut self) -> usize {
        let before = self.playlists.len();
        let mut ids = HashSet::new();
        let mut folders = HashSet::new();
        self.playlists.retain(|p| {
            let key = p.id().unwrap_or_else(|| normalize_url(&p.url));
            let keep = ids.insert(key) && folders.insert(p.folder_name().to_lowercase());
            if !keep {
                tracing::warn!("Ignoring duplicate playlist {:?} ({})", p.name, p.url);
            }
            keep
        });
        before - self.playlists.len()
    }
}

// ============================================================================
// URL helpers
// ============================================================================

/// Prepend `https://` to bare YouTube hosts and trim whitespace.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return url.to_string();
    }

    const BARE_HOSTS: &[&str] = &["www.", "youtube.com", "m.youtube.com", "music.youtube.com", "youtu.be"];
    if BARE_HOSTS.iter().any(|h| lower.starts_with(h)) {
        format!("https://{}", url)
    } else {
        url.to_string()
    }
}

/// Loose check for an http(s) URL with a dotted host.
pub fn is_probably_url(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    let Some(rest) = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
    else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    host.contains('.') && !host.starts_with('.') && !host.ends_with('.') && !host.contains(' ')
}

/// The `list=` query parameter of a playlist URL.
pub fn extract_playlist_id(url: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("list="))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
}

/// Folder-safe version of a playlist name.
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned = sanitize_filename(name);
    if cleaned.is_empty() {
        "playlist".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("playlist-sync"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from `path`
///
/// Returns default config if the file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    let mut config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                return Config::default();
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            return Config::default();
        }
    };

    config.dedupe_playlists();
    config
}

/// Save configuration to `path`
///
/// Creates the parent directory if it doesn't exist.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Not a playlist URL: {0}")]
    InvalidUrl(String),

    #[error("Playlist already configured: {0}")]
    DuplicatePlaylist(String),

    #[error("No playlist named {0:?}")]
    UnknownPlaylist(String),
}

// ============================================================================
// Tests
// ============================================================================
