//! Tool checks, failure reports and cache maintenance.

use std::path::Path;

use crate::cache::MetadataCache;
use crate::provider::ytdlp::{ffmpeg_version, ytdlp_version};
use crate::report::{FAILURE_REPORT_FILE, read_failure_report};

use super::{CacheAction, load_config, print_ytdlp_install_instructions};

/// Check that the extraction tools are reachable
pub fn cmd_check_tools(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path);
    println!("Checking tools...\n");

    match ytdlp_version(&config.provider.binary) {
        Some(version) => println!("✓ yt-dlp: {}", version),
        None => {
            println!("✗ yt-dlp: NOT FOUND ({})", config.provider.binary);
            print_ytdlp_install_instructions();
        }
    }

    match ffmpeg_version() {
        Some(version) => println!("✓ ffmpeg: {}", version),
        None => println!("✗ ffmpeg: NOT FOUND (metadata embedding and some formats need it)"),
    }

    println!();
    match &config.provider.cookies_file {
        Some(path) if path.is_file() => println!("✓ Cookie file: {}", path.display()),
        Some(path) => println!("- Cookie file: {} (not present, private playlists may fail)", path.display()),
        None => println!("- Cookie file: not configured"),
    }

    Ok(())
}

/// Print failure reports
pub fn cmd_failures(config_path: &Path, names: &[String]) -> anyhow::Result<()> {
    let config = load_config(config_path);
    let base = config.download_path();
    let playlists = config.select_playlists(names)?;

    let mut total = 0;
    for playlist in &playlists {
        let folder = playlist.resolved_folder(&base);
        let failures = read_failure_report(&folder)?;
        if failures.is_empty() {
            continue;
        }
        total += failures.len();

        println!("{} ({})", playlist.name, folder.join(FAILURE_REPORT_FILE).display());
        for item in failures {
            match item.url() {
                Some(url) => println!("  ✗ [{}] {}  {}", item.stage, item.id, url),
                None => println!("  ✗ [{}] {}", item.stage, item.id),
            }
            println!("      {}", item.reason);
        }
        println!();
    }

    if total == 0 {
        println!("No failures recorded.");
    } else {
        println!("{} failed item(s). Run `playlist-sync sync` again to retry them.", total);
    }
    Ok(())
}

/// Inspect or clear the metadata cache
pub fn cmd_cache(action: CacheAction) -> anyhow::Result<()> {
    let Some(path) = MetadataCache::default_path() else {
        anyhow::bail!("Could not determine data directory for the metadata cache");
    };
    let mut cache = MetadataCache::load(&path);

    match action {
        CacheAction::Stats => {
            println!("Metadata cache: {}", path.display());
            println!("  Entries: {}", cache.len());
        }
        CacheAction::Clear => {
            let count = cache.len();
            cache.clear();
            cache.save()?;
            println!("✓ Cleared {} cached title(s)", count);
        }
    }
    Ok(())
}
