//! Playlist management commands.

use std::path::{Path, PathBuf};

use crate::config;
use crate::ledger::ArchiveLedger;
use crate::report::read_failure_report;

use super::load_config;

/// Show configured playlists
pub fn cmd_list(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path);
    let base = config.download_path();

    println!("Download path: {}", base.display());
    if config.playlists.is_empty() {
        println!("No playlists configured. Add one with: playlist-sync add <URL>");
        return Ok(());
    }

    println!();
    for playlist in &config.playlists {
        let folder = playlist.resolved_folder(&base);
        let tracked = ArchiveLedger::open(&folder).map(|l| l.len()).unwrap_or(0);
        let failures = read_failure_report(&folder).map(|f| f.len()).unwrap_or(0);

        println!("{}", playlist.name);
        println!("  URL:     {}", playlist.url);
        println!("  ID:      {}", playlist.id().as_deref().unwrap_or("(unknown)"));
        println!("  Folder:  {}", folder.display());
        print!("  Tracked: {}", tracked);
        if failures > 0 {
            print!(" ({} failed last run)", failures);
        }
        println!();
    }
    Ok(())
}

/// Add a playlist to the config
pub fn cmd_add(config_path: &Path, url: &str, name: Option<&str>, folder: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path);
    let added = config.add_playlist(url, name, folder)?.clone();
    config::save_to(&config, config_path)?;

    println!("✓ Added {}", added.name);
    println!("  URL:    {}", added.url);
    if let Some(id) = &added.playlist_id {
        println!("  ID:     {}", id);
    }
    println!("  Folder: {}", added.resolved_folder(&config.download_path()).display());
    Ok(())
}

/// Remove a playlist from the config
pub fn cmd_remove(config_path: &Path, name: &str) -> anyhow::Result<()> {
    let mut config = load_config(config_path);
    let Some(removed) = config.remove_playlist(name) else {
        anyhow::bail!("No playlist named {:?}", name);
    };
    config::save_to(&config, config_path)?;

    println!("✓ Removed {}", removed.name);
    println!(
        "  Files in {} were left in place.",
        removed.resolved_folder(&config.download_path()).display()
    );
    Ok(())
}

/// Set the base download directory
pub fn cmd_set_path(config_path: &Path, path: &Path) -> anyhow::Result<()> {
    let absolute: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    if absolute.exists() && !absolute.is_dir() {
        anyhow::bail!("{} is not a directory", absolute.display());
    }

    let mut config = load_config(config_path);
    config.library.download_path = Some(absolute.clone());
    config::save_to(&config, config_path)?;

    println!("✓ Download path set to {}", absolute.display());
    Ok(())
}
