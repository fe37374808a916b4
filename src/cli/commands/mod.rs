//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `sync`: reconcile playlists and render progress
//! - `playlists`: list, add and remove playlists, set the download path
//! - `tools`: tool checks, failure reports and cache maintenance

mod playlists;
mod sync;
mod tools;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::sync::{SyncMode, SyncOptions};

pub use playlists::{cmd_add, cmd_list, cmd_remove, cmd_set_path};
pub use sync::cmd_sync;
pub use tools::{cmd_cache, cmd_check_tools, cmd_failures};

/// Keep local folders in step with remote playlists
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: the OS config directory)
    #[arg(long, global = true, env = "PLAYLIST_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Sync all playlists (or the named ones)
    Sync {
        /// Playlist name to sync; repeat for several
        #[arg(short, long = "playlist")]
        playlists: Vec<String>,
        /// Dry run - show what would be done without touching any files
        #[arg(long)]
        dry_run: bool,
        /// What to run (default: complete)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Only organize files already on disk (same as --mode organize)
        #[arg(long, conflicts_with = "mode")]
        no_download: bool,
        /// Verbose yt-dlp output, appended to yt-dlp-debug.log in each playlist folder
        #[arg(long)]
        debug: bool,
    },
    /// Show configured playlists
    List,
    /// Add a playlist
    Add {
        /// Playlist URL
        url: String,
        /// Display name (default: the playlist id)
        #[arg(short, long)]
        name: Option<String>,
        /// Folder name under the download path (default: the name)
        #[arg(short, long)]
        folder: Option<String>,
    },
    /// Remove a playlist from the config (files are kept)
    Remove {
        /// Playlist name
        name: String,
    },
    /// Set the base download directory
    SetPath {
        /// Directory that holds one folder per playlist
        path: PathBuf,
    },
    /// Show the failure reports from the last sync
    Failures {
        /// Playlist name; repeat for several
        #[arg(short, long = "playlist")]
        playlists: Vec<String>,
    },
    /// Inspect or clear the metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Check that yt-dlp and ffmpeg are installed
    CheckTools,
}

/// Sync modes accepted on the command line
#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ModeArg {
    /// Download, quarantine removed items and organize the folder
    Complete,
    /// Download new items only
    Download,
    /// Organize files already on disk without contacting the provider
    Organize,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Complete => SyncMode::Complete,
            ModeArg::Download => SyncMode::DownloadOnly,
            ModeArg::Organize => SyncMode::OrganizeOnly,
        }
    }
}

/// Metadata cache actions
#[derive(Subcommand, Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheAction {
    /// Show where the cache lives and how many titles it holds
    Stats,
    /// Forget every cached title
    Clear,
}

/// Run the specified CLI command.
///
/// Returns `Ok(true)` if a command was run, `Ok(false)` if no command was
/// specified (meaning usage should be shown).
pub fn run_command(cli: &Cli) -> anyhow::Result<bool> {
    let config_path = resolve_config_path(cli)?;

    match &cli.command {
        Some(Commands::Sync {
            playlists,
            dry_run,
            mode,
            no_download,
            debug,
        }) => {
            let options = SyncOptions {
                mode: sync_mode(*mode, *no_download),
                dry_run: *dry_run,
            };
            let rt = Runtime::new()?;
            cmd_sync(&rt, &config_path, playlists, options, *debug)?;
            Ok(true)
        }
        Some(Commands::List) => {
            cmd_list(&config_path)?;
            Ok(true)
        }
        Some(Commands::Add { url, name, folder }) => {
            cmd_add(&config_path, url, name.as_deref(), folder.as_deref())?;
            Ok(true)
        }
        Some(Commands::Remove { name }) => {
            cmd_remove(&config_path, name)?;
            Ok(true)
        }
        Some(Commands::SetPath { path }) => {
            cmd_set_path(&config_path, path)?;
            Ok(true)
        }
        Some(Commands::Failures { playlists }) => {
            cmd_failures(&config_path, playlists)?;
            Ok(true)
        }
        Some(Commands::Cache { action }) => {
            cmd_cache(*action)?;
            Ok(true)
        }
        Some(Commands::CheckTools) => {
            cmd_check_tools(&config_path)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn sync_mode(mode: Option<ModeArg>, no_download: bool) -> SyncMode {
    match (mode, no_download) {
        (Some(mode), _) => mode.into(),
        (None, true) => SyncMode::OrganizeOnly,
        (None, false) => SyncMode::Complete,
    }
}

/// The `--config` override or the default location.
fn resolve_config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::config_path().context("Could not determine config directory; pass --config"),
    }
}

pub(crate) fn load_config(path: &std::path::Path) -> Config {
    config::load_from(path)
}

pub(crate) fn print_ytdlp_install_instructions() {
    eprintln!("Error: yt-dlp not found.");
    eprintln!("Install it (ffmpeg is recommended too):");
    eprintln!("  Windows: winget install yt-dlp.yt-dlp Gyan.FFmpeg");
    eprintln!("  macOS:   brew install yt-dlp ffmpeg");
    eprintln!("  Linux:   pipx install yt-dlp && apt install ffmpeg");
    eprintln!("Or point provider.binary in the config file at an existing executable.");
}
