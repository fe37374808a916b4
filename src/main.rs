//! Playlist Sync - keep local audio folders in step with remote playlists.
//!
//! Each configured playlist maps to a folder. A sync lists the playlist,
//! downloads what is missing, quarantines files whose items left the
//! playlist and records every completed item in the folder's archive ledger.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod fsutil;
pub mod ledger;
pub mod model;
pub mod naming;
pub mod organize;
pub mod pipeline;
pub mod provider;
pub mod quarantine;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod scanner;
pub mod sync;
#[cfg(test)]
pub mod test_utils;

use clap::{CommandFactory, Parser};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging (stderr, so progress lines on stdout stay readable)
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "playlist_sync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if cli::run_command(&args)? {
        return Ok(());
    }

    // No command specified
    cli::Cli::command().print_help()?;
    println!();
    Ok(())
}
