//! Sync orchestrator.
//!
//! [`sync_playlist`] runs one playlist end to end from a single snapshot:
//!
//! 1. fetch the remote listing (with retry)
//! 2. open the ledger and scan the folder; unreadable files become failures
//! 3. reconcile; an empty listing aborts here with nothing touched
//! 4. prune stale ledger entries
//! 5. quarantine files that left the playlist
//! 6. adopt unledgered files, then download and normalize new items
//! 7. organize the folder from a fresh scan
//! 8. write the failure report
//!
//! [`SyncMode::DownloadOnly`] skips steps 5 and 7. [`SyncMode::OrganizeOnly`]
//! never contacts the provider and runs step 7 against the ledger alone.
//!
//! [`sync_all`] runs several playlists with bounded parallelism, then merges
//! every run's cache updates into the shared metadata cache and saves it once.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{CacheUpdates, CachedMetadata, MetadataCache};
use crate::config::{Config, PlaylistConfig};
use crate::error::Error;
use crate::events::{EventSink, SyncEvent};
use crate::fetcher::fetch_remote;
use crate::ledger::ArchiveLedger;
use crate::model::RemoteItem;
use crate::naming;
use crate::organize::{apply_organize, find_artifacts, plan_organize, planned_duplicates, planned_renames};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::provider::FetchProvider;
use crate::quarantine::quarantine_files;
use crate::reconcile::{Decision, Plan, reconcile};
use crate::report::{FailedItem, FailureStage, PlaylistResult, SyncSummary, write_failure_report};
use crate::retry::RetryPolicy;
use crate::scanner::{Inventory, scan_folder};

/// Which parts of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Download, quarantine and organize
    #[default]
    Complete,
    /// Download new items only; nothing is moved or renamed
    DownloadOnly,
    /// Tidy the folder without contacting the provider
    OrganizeOnly,
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub dry_run: bool,
}

/// Shared, read-only state for playlist runs.
pub struct RunContext<'a> {
    pub provider: &'a dyn FetchProvider,
    pub policy: &'a RetryPolicy,
    /// Snapshot taken before any run starts
    pub cache: &'a MetadataCache,
    pub events: &'a EventSink,
    pub cancel: &'a AtomicBool,
    pub download_workers: usize,
    pub mode: SyncMode,
    pub dry_run: bool,
}

impl RunContext<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Record a failure on the result and tell subscribers.
    fn fail(&self, playlist: &str, result: &mut PlaylistResult, item: FailedItem) {
        self.events.emit(SyncEvent::ItemFailed {
            playlist: playlist.to_string(),
            id: item.id.clone(),
            stage: item.stage,
            reason: item.reason.clone(),
        });
        result.failed.push(item);
    }
}

/// Result of one playlist run plus the cache entries it learned.
#[derive(Debug)]
pub struct PlaylistRun {
    pub result: PlaylistResult,
    pub cache_updates: CacheUpdates,
}

/// Reconcile one playlist folder against its remote listing.
pub async fn sync_playlist(ctx: &RunContext<'_>, playlist: &PlaylistConfig, folder: &Path) -> PlaylistRun {
    let name = playlist.name.as_str();
    ctx.events.emit(SyncEvent::PlaylistStarted {
        playlist: name.to_string(),
    });
    tracing::info!(playlist = %name, folder = ?folder, mode = ?ctx.mode, "Syncing playlist");

    let run = match ctx.mode {
        SyncMode::OrganizeOnly => organize_playlist(ctx, name, folder).await,
        SyncMode::Complete | SyncMode::DownloadOnly => run_playlist(ctx, playlist, folder).await,
    };

    if let Some(reason) = &run.result.aborted {
        tracing::warn!(playlist = %name, "Aborted: {}", reason);
    } else {
        tracing::info!("{}", run.result);
    }
    match write_failure_report(&run.result) {
        Ok(Some(path)) => tracing::debug!(playlist = %name, "Failure report at {:?}", path),
        Ok(None) => {}
        Err(e) => tracing::error!(playlist = %name, "Could not write failure report: {}", e),
    }

    ctx.events
        .emit(SyncEvent::PlaylistFinished(Box::new(run.result.clone())));
    run
}

fn aborted_run(ctx: &RunContext<'_>, name: &str, folder: &Path, reason: String, failed: Vec<FailedItem>) -> PlaylistRun {
    PlaylistRun {
        result: PlaylistResult {
            dry_run: ctx.dry_run,
            failed,
            ..PlaylistResult::aborted(name, folder, reason)
        },
        cache_updates: CacheUpdates::new(),
    }
}

async fn run_playlist(ctx: &RunContext<'_>, playlist: &PlaylistConfig, folder: &Path) -> PlaylistRun {
    let name = playlist.name.as_str();
    let mut cache_updates = CacheUpdates::new();

    let remote = match fetch_remote(ctx.provider, &playlist.url, ctx.policy, ctx.cancel).await {
        Ok(items) => items,
        Err(_) if ctx.is_cancelled() => return cancelled_run(ctx, name, folder),
        Err(e) => return aborted_run(ctx, name, folder, e.to_string(), Vec::new()),
    };
    ctx.events.emit(SyncEvent::RemoteListed {
        playlist: name.to_string(),
        count: remote.len(),
    });
    learn_titles(&remote, ctx.cache, &mut cache_updates);

    let mut ledger = match ArchiveLedger::open(folder) {
        Ok(ledger) => ledger,
        Err(e) => return aborted_run(ctx, name, folder, e.to_string(), Vec::new()),
    };

    let inventory = match scan(folder, &ledger, &remote).await {
        Ok(inventory) => inventory,
        Err(e) => return aborted_run(ctx, name, folder, e.to_string(), Vec::new()),
    };
    let mut result = PlaylistResult::new(name, folder);
    record_scan_failures(ctx, name, &inventory, &mut result);

    let mut plan = match reconcile(&remote, &inventory, &ledger.id_set()) {
        Decision::Abort(reason) => return aborted_run(ctx, name, folder, reason, result.failed),
        Decision::Proceed(plan) => plan,
    };
    if ctx.mode == SyncMode::DownloadOnly {
        plan.to_quarantine.clear();
    }
    ctx.events.emit(SyncEvent::Planned {
        playlist: name.to_string(),
        to_fetch: plan.to_fetch.len(),
        to_quarantine: plan.quarantine_ids().len(),
        stale: plan.stale_ledger.len(),
        already_present: plan.already_present,
    });
    for path in &plan.unmanaged {
        tracing::info!(playlist = %name, "Leaving unmanaged file {:?}", path);
    }

    result.remote_count = remote.len();
    result.already_present = plan.already_present;
    result.unmanaged = plan.unmanaged.clone();
    result.skipped = plan.skipped.clone();
    result.dry_run = ctx.dry_run;

    if ctx.dry_run {
        describe_plan(&plan, &mut result);
        if ctx.mode == SyncMode::Complete {
            describe_organize(&inventory, &mut result);
        }
        return PlaylistRun {
            result,
            cache_updates: CacheUpdates::new(),
        };
    }

    execute_plan(ctx, name, folder, plan, &mut ledger, &mut result, &mut cache_updates).await;

    if ctx.mode == SyncMode::Complete && !result.cancelled {
        match scan(folder, &ledger, &remote).await {
            Ok(inventory) => organize(ctx, name, folder, &inventory, &mut result, &mut cache_updates),
            Err(e) => tracing::error!(playlist = %name, "Skipping organize, rescan failed: {}", e),
        }
    }
    PlaylistRun { result, cache_updates }
}

/// Organize a folder using only the ledger, without listing the playlist.
async fn organize_playlist(ctx: &RunContext<'_>, name: &str, folder: &Path) -> PlaylistRun {
    let ledger = match ArchiveLedger::open(folder) {
        Ok(ledger) => ledger,
        Err(e) => return aborted_run(ctx, name, folder, e.to_string(), Vec::new()),
    };
    let inventory = match scan(folder, &ledger, &[]).await {
        Ok(inventory) => inventory,
        Err(e) => return aborted_run(ctx, name, folder, e.to_string(), Vec::new()),
    };

    let mut result = PlaylistResult {
        dry_run: ctx.dry_run,
        unmanaged: inventory.unmanaged().map(|f| f.path.clone()).collect(),
        ..PlaylistResult::new(name, folder)
    };
    record_scan_failures(ctx, name, &inventory, &mut result);
    result.already_present = inventory.local_ids().difference(&inventory.failed_ids()).count();

    let mut cache_updates = CacheUpdates::new();
    if ctx.dry_run {
        describe_organize(&inventory, &mut result);
    } else {
        organize(ctx, name, folder, &inventory, &mut result, &mut cache_updates);
    }
    PlaylistRun { result, cache_updates }
}

fn cancelled_run(ctx: &RunContext<'_>, name: &str, folder: &Path) -> PlaylistRun {
    PlaylistRun {
        result: PlaylistResult {
            cancelled: true,
            dry_run: ctx.dry_run,
            ..PlaylistResult::new(name, folder)
        },
        cache_updates: CacheUpdates::new(),
    }
}

/// Scan on the blocking pool. Known ids are the ledger's plus the remote's.
async fn scan(folder: &Path, ledger: &ArchiveLedger, remote: &[RemoteItem]) -> Result<Inventory, Error> {
    let mut known: BTreeSet<String> = ledger.id_set();
    known.extend(remote.iter().map(|i| i.id.clone()));
    let folder = folder.to_path_buf();

    let scan_dir = folder.clone();
    tokio::task::spawn_blocking(move || scan_folder(&scan_dir, &known))
        .await
        .map_err(|e| Error::filesystem(folder, std::io::Error::other(e.to_string())))
}

/// Every file the scanner could not inspect is a failure of this run.
fn record_scan_failures(ctx: &RunContext<'_>, name: &str, inventory: &Inventory, result: &mut PlaylistResult) {
    for error in &inventory.errors {
        tracing::warn!(playlist = %name, "Could not inspect {:?}: {}", error.path, error.message);
        let id = error
            .id
            .clone()
            .unwrap_or_else(|| error.path.display().to_string());
        let reason = format!("{}: {}", error.path.display(), error.message).replace(['\n', '\t'], " ");
        ctx.fail(name, result, FailedItem::new(id, FailureStage::Scan, reason));
    }
}

/// Remember listing titles for ids the cache does not know yet.
fn learn_titles(remote: &[RemoteItem], cache: &MetadataCache, updates: &mut CacheUpdates) {
    for item in remote {
        if item.title.trim().is_empty() || cache.get(&item.id).is_some() {
            continue;
        }
        updates.insert(
            item.id.clone(),
            CachedMetadata {
                title: naming::display_title(&item.title, item.uploader.as_deref()),
                uploader: item.uploader.clone(),
            },
        );
    }
}

fn describe_plan(plan: &Plan, result: &mut PlaylistResult) {
    result.fetched = plan.to_fetch.iter().map(|i| i.id.clone()).collect();
    result.quarantined = plan.quarantine_ids().into_iter().collect();
    result.stale_pruned = plan.stale_ledger.iter().cloned().collect();
    result.adopted = plan
        .to_adopt
        .iter()
        .filter_map(|f| f.inferred_id.clone())
        .collect();
}

fn describe_organize(inventory: &Inventory, result: &mut PlaylistResult) {
    let steps = plan_organize(inventory);
    let ids: BTreeSet<String> = steps.iter().map(|s| s.id.clone()).collect();
    result.renamed = planned_renames(&steps);
    result.duplicates = planned_duplicates(&steps).values().sum();
    result.cleaned = find_artifacts(&inventory.folder, &ids).len();
}

fn organize(
    ctx: &RunContext<'_>,
    name: &str,
    folder: &Path,
    inventory: &Inventory,
    result: &mut PlaylistResult,
    cache_updates: &mut CacheUpdates,
) {
    let steps = plan_organize(inventory);
    let outcome = apply_organize(folder, &steps, ctx.cache);

    for (id, path) in &outcome.renamed {
        ctx.events.emit(SyncEvent::ItemRenamed {
            playlist: name.to_string(),
            id: id.clone(),
            path: path.clone(),
        });
        result.renamed.push(id.clone());
    }
    for record in &outcome.duplicates {
        ctx.events.emit(SyncEvent::ItemQuarantined {
            playlist: name.to_string(),
            id: record.id.clone(),
            destination: record.destination.clone(),
        });
    }
    result.duplicates += outcome.duplicates.len();
    result.cleaned += outcome.removed.len();
    for item in outcome.failed {
        ctx.fail(name, result, item);
    }
    cache_updates.extend(outcome.cache_updates);
}

async fn execute_plan(
    ctx: &RunContext<'_>,
    name: &str,
    folder: &Path,
    plan: Plan,
    ledger: &mut ArchiveLedger,
    result: &mut PlaylistResult,
    cache_updates: &mut CacheUpdates,
) {
    match ledger.prune(&plan.stale_ledger) {
        Ok(removed) => {
            for id in &removed {
                tracing::info!(playlist = %name, id = %id, "Pruned stale ledger entry");
            }
            result.stale_pruned = removed;
        }
        Err(e) => {
            tracing::error!(playlist = %name, "Could not prune stale ledger entries: {}", e);
            for id in &plan.stale_ledger {
                ctx.fail(name, result, FailedItem::from_error(id, FailureStage::Ledger, &e));
            }
        }
    }

    if ctx.is_cancelled() {
        result.cancelled = true;
        return;
    }

    quarantine(ctx, name, folder, &plan, ledger, result);

    let pipeline = Pipeline {
        playlist: name,
        folder,
        provider: ctx.provider,
        policy: ctx.policy,
        cache: ctx.cache,
        events: ctx.events,
        cancel: ctx.cancel,
        workers: ctx.download_workers,
    };

    let mut outcome = PipelineOutcome::default();
    pipeline.adopt(&plan.to_adopt, ledger, &mut outcome);
    let fetched = pipeline.run(&plan.to_fetch, ledger).await;

    outcome.fetched = fetched.fetched;
    outcome.failed.extend(fetched.failed);
    outcome.cache_updates.extend(fetched.cache_updates);
    outcome.cancelled = fetched.cancelled;

    result.fetched = outcome.fetched;
    result.adopted = outcome.adopted;
    result.failed.extend(outcome.failed);
    result.cancelled = outcome.cancelled;
    cache_updates.extend(outcome.cache_updates);
}

fn quarantine(
    ctx: &RunContext<'_>,
    name: &str,
    folder: &Path,
    plan: &Plan,
    ledger: &mut ArchiveLedger,
    result: &mut PlaylistResult,
) {
    let outcome = quarantine_files(folder, &plan.to_quarantine);

    let mut ids = BTreeSet::new();
    for record in &outcome.moved {
        ctx.events.emit(SyncEvent::ItemQuarantined {
            playlist: name.to_string(),
            id: record.id.clone(),
            destination: record.destination.clone(),
        });
        ids.insert(record.id.clone());
    }
    result.quarantined = ids.into_iter().collect();

    for failure in &outcome.failed {
        let id = failure.id.clone().unwrap_or_default();
        ctx.fail(name, result, FailedItem::from_error(&id, FailureStage::Quarantine, &failure.error));
    }

    // Keep "ledgered iff a local file exists" true after the move
    let gone = outcome.fully_quarantined_ids();
    match ledger.prune(&gone) {
        Ok(removed) if !removed.is_empty() => {
            tracing::info!(playlist = %name, "Removed {} quarantined id(s) from the ledger", removed.len());
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(playlist = %name, "Could not prune quarantined ids: {}", e);
            for id in &gone {
                ctx.fail(name, result, FailedItem::from_error(id, FailureStage::Ledger, &e));
            }
        }
    }
}

/// Sync the selected playlists and persist cache updates.
pub async fn sync_all(
    config: &Config,
    playlists: &[PlaylistConfig],
    provider: &dyn FetchProvider,
    cache: &mut MetadataCache,
    events: &EventSink,
    cancel: &AtomicBool,
    options: SyncOptions,
) -> SyncSummary {
    let base: PathBuf = config.download_path();
    let policy = config.retry.policy();
    let parallel = config.sync.max_parallel_playlists.max(1);

    let runs: Vec<PlaylistRun> = {
        let ctx = RunContext {
            provider,
            policy: &policy,
            cache: &*cache,
            events,
            cancel,
            download_workers: config.sync.download_workers.max(1),
            mode: options.mode,
            dry_run: options.dry_run,
        };
        let ctx = &ctx;
        let base = &base;

        stream::iter(playlists)
            .map(|playlist| async move {
                let folder = playlist.resolved_folder(base);
                if ctx.is_cancelled() {
                    return cancelled_run(ctx, &playlist.name, &folder);
                }
                sync_playlist(ctx, playlist, &folder).await
            })
            .buffered(parallel)
            .collect()
            .await
    };

    let mut summary = SyncSummary::default();
    for run in runs {
        if !options.dry_run {
            cache.merge(run.cache_updates);
        }
        summary.results.push(run.result);
    }

    if let Err(e) = cache.save() {
        tracing::error!("Failed to save metadata cache: {}", e);
    }

    tracing::info!("{}", summary);
    summary
}
