//! Command-line interface for playlist-sync.
//!
//! This module provides commands for syncing playlists, managing the
//! playlist list and inspecting failures, the metadata cache and tools.

mod commands;

pub use commands::{Cli, Commands, run_command};
