//! Sync command: reconcile playlists and print progress.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cache::MetadataCache;
use crate::events::{EventSink, SyncEvent};
use crate::provider::YtDlpProvider;
use crate::provider::ytdlp::{DEBUG_LOG_FILE, ytdlp_version};
use crate::sync::{SyncMode, SyncOptions, sync_all};

use super::{load_config, print_ytdlp_install_instructions};

/// Sync the selected playlists (all when `names` is empty)
pub fn cmd_sync(
    rt: &Runtime,
    config_path: &Path,
    names: &[String],
    options: SyncOptions,
    debug: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path);
    config.provider.debug |= debug;
    let playlists = config.select_playlists(names)?;
    if playlists.is_empty() {
        println!("No playlists configured. Add one with: playlist-sync add <URL>");
        return Ok(());
    }

    if options.mode != SyncMode::OrganizeOnly {
        let Some(version) = ytdlp_version(&config.provider.binary) else {
            print_ytdlp_install_instructions();
            anyhow::bail!("{} is required to sync", config.provider.binary);
        };
        tracing::info!(version = %version, "Using yt-dlp");
    }

    let provider = YtDlpProvider::new(&config.provider);
    let mut cache = match MetadataCache::default_path() {
        Some(path) => MetadataCache::load(path),
        None => {
            tracing::warn!("No data directory; titles will not be cached between runs");
            MetadataCache::in_memory()
        }
    };

    if options.dry_run {
        println!("DRY RUN - no files will be changed\n");
    }
    if config.provider.debug {
        println!("Debug mode: yt-dlp output goes to {} in each playlist folder\n", DEBUG_LOG_FILE);
    }
    println!(
        "Syncing {} playlist(s) into {}\n",
        playlists.len(),
        config.download_path().display()
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let summary = rt.block_on(async {
        let signal = {
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nCancelling: stopping running downloads, finished items are kept...");
                    cancel.store(true, Ordering::SeqCst);
                }
            })
        };

        let (events, rx) = EventSink::channel();
        let printer = tokio::spawn(print_events(rx));

        let summary = sync_all(&config, &playlists, &provider, &mut cache, &events, &cancel, options).await;

        // Closing the sender lets the printer drain and finish
        drop(events);
        let _ = printer.await;
        signal.abort();
        summary
    });

    println!("\n{}", summary);
    for result in &summary.results {
        println!("  {}", result);
    }

    if cancel.load(Ordering::SeqCst) {
        println!("\nSync cancelled. Run it again to pick up where it stopped.");
        return Ok(());
    }
    if !summary.is_clean() {
        anyhow::bail!("Sync finished with problems; see `playlist-sync failures`");
    }
    Ok(())
}

async fn print_events(mut rx: UnboundedReceiver<SyncEvent>) {
    while let Some(event) = rx.recv().await {
        if let Some(line) = render_event(&event) {
            println!("{}", line);
        }
    }
}

/// One progress line per event; `None` for events that stay silent.
fn render_event(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::PlaylistStarted { playlist } => Some(format!("{}: fetching listing...", playlist)),
        SyncEvent::RemoteListed { playlist, count } => Some(format!("{}: {} item(s) in playlist", playlist, count)),
        SyncEvent::Planned {
            playlist,
            to_fetch,
            to_quarantine,
            stale,
            already_present,
        } => Some(format!(
            "{}: {} to fetch, {} to quarantine, {} stale, {} already present",
            playlist, to_fetch, to_quarantine, stale, already_present
        )),
        SyncEvent::ItemStarted {
            playlist,
            id,
            index,
            total,
        } => Some(format!("{}: [{}/{}] {}", playlist, index, total, id)),
        SyncEvent::ItemFetched { playlist, path, .. } => Some(format!(
            "  ✓ {}: {}",
            playlist,
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        )),
        SyncEvent::ItemFailed {
            playlist,
            id,
            stage,
            reason,
        } => Some(format!("  ✗ {}: {} ({}) {}", playlist, id, stage, reason)),
        SyncEvent::ItemQuarantined {
            playlist,
            id,
            destination,
        } => Some(format!("  → {}: {} moved to {}", playlist, id, destination.display())),
        SyncEvent::ItemRenamed { playlist, path, .. } => Some(format!(
            "  ✎ {}: renamed to {}",
            playlist,
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        )),
        SyncEvent::PlaylistFinished(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FailureStage, PlaylistResult};
    use std::path::PathBuf;

    #[test]
    fn test_render_fetched_shows_file_name() {
        let line = render_event(&SyncEvent::ItemFetched {
            playlist: "Mix".into(),
            id: "aaaaaaaaaaa".into(),
            path: PathBuf::from("/music/Mix/Song [aaaaaaaaaaa].mp3"),
        })
        .unwrap();
        assert_eq!(line, "  ✓ Mix: Song [aaaaaaaaaaa].mp3");
    }

    #[test]
    fn test_render_failure_includes_stage() {
        let line = render_event(&SyncEvent::ItemFailed {
            playlist: "Mix".into(),
            id: "aaaaaaaaaaa".into(),
            stage: FailureStage::Download,
            reason: "boom".into(),
        })
        .unwrap();
        assert!(line.contains("✗"));
        assert!(line.contains(FailureStage::Download.as_str()));
        assert!(line.ends_with("boom"));
    }

    #[test]
    fn test_render_renamed_shows_new_name() {
        let line = render_event(&SyncEvent::ItemRenamed {
            playlist: "Mix".into(),
            id: "aaaaaaaaaaa".into(),
            path: PathBuf::from("/music/Mix/Song - aaaaaaaaaaa.mp3"),
        })
        .unwrap();
        assert_eq!(line, "  ✎ Mix: renamed to Song - aaaaaaaaaaa.mp3");
    }

    #[test]
    fn test_finished_is_silent() {
        let result = PlaylistResult::new("Mix", "/music/Mix");
        assert!(render_event(&SyncEvent::PlaylistFinished(Box::new(result))).is_none());
    }

    #[test]
    fn test_sync_without_playlists_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        cmd_sync(&rt, &dir.path().join("config.toml"), &[], SyncOptions::default(), false).unwrap();
    }

    #[test]
    fn test_sync_unknown_playlist_fails() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        let names = ["nope".to_string()];
        assert!(cmd_sync(&rt, &dir.path().join("config.toml"), &names, SyncOptions::default(), false).is_err());
    }
}
