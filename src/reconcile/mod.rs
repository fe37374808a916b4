//! Reconciler: the safety gate and the set algebra.
//!
//! Pure function of one remote listing, one folder scan and the ledger. It
//! performs no I/O; the sync orchestrator executes the resulting [`Plan`].
//!
//! ```text
//! remote = 0 items                      -> Abort
//! stale        = ledger - local
//! to_fetch     = remote - (local ∪ (ledger - stale))
//! to_quarantine = files with id in local - remote
//! ```
//!
//! Ids whose files failed to scan are left out of every set for this run.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::model::{LocalFile, RemoteItem};
use crate::naming::IdOrigin;
use crate::scanner::Inventory;

/// Reason given when the remote listing is empty.
pub const EMPTY_REMOTE_REASON: &str = "remote playlist returned no items; refusing to touch local files";

/// An id left out of this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub id: String,
    pub reason: String,
}

/// What one playlist run should do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Remote items to download, in remote order
    pub to_fetch: Vec<RemoteItem>,
    /// Files whose id is no longer remote
    pub to_quarantine: Vec<LocalFile>,
    /// Ledger ids with no local file; pruned before anything else
    pub stale_ledger: BTreeSet<String>,
    /// Remote ids present on disk but missing from the ledger, one file each
    pub to_adopt: Vec<LocalFile>,
    /// Remote ids already on disk
    pub already_present: usize,
    /// Files that follow no convention; reported, never moved
    pub unmanaged: Vec<PathBuf>,
    /// Ids excluded because their files could not be inspected
    pub skipped: Vec<Skipped>,
}

impl Plan {
    /// Ids in the fetch set.
    pub fn fetch_ids(&self) -> BTreeSet<String> {
        self.to_fetch.iter().map(|i| i.id.clone()).collect()
    }

    /// Ids in the quarantine set.
    pub fn quarantine_ids(&self) -> BTreeSet<String> {
        self.to_quarantine
            .iter()
            .filter_map(|f| f.inferred_id.clone())
            .collect()
    }

    /// True if executing the plan would change nothing on disk.
    pub fn is_noop(&self) -> bool {
        self.to_fetch.is_empty()
            && self.to_quarantine.is_empty()
            && self.stale_ledger.is_empty()
            && self.to_adopt.is_empty()
    }
}

/// Outcome of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Leave the playlist completely untouched
    Abort(String),
    Proceed(Plan),
}

/// Compute the plan for one playlist.
pub fn reconcile(remote: &[RemoteItem], inventory: &Inventory, ledger_ids: &BTreeSet<String>) -> Decision {
    if remote.is_empty() {
        return Decision::Abort(EMPTY_REMOTE_REASON.to_string());
    }

    let failed = inventory.failed_ids();
    let remote_ids: BTreeSet<&str> = remote.iter().map(|i| i.id.as_str()).collect();
    let local_ids: BTreeSet<String> = inventory.local_ids().difference(&failed).cloned().collect();

    let stale_ledger: BTreeSet<String> = ledger_ids
        .iter()
        .filter(|id| !local_ids.contains(*id) && !failed.contains(*id))
        .cloned()
        .collect();

    let mut to_fetch: Vec<RemoteItem> = Vec::new();
    let mut seen = BTreeSet::new();
    for item in remote {
        if !seen.insert(item.id.as_str()) {
            continue;
        }
        let ledgered = ledger_ids.contains(&item.id) && !stale_ledger.contains(&item.id);
        if local_ids.contains(&item.id) || ledgered || failed.contains(&item.id) {
            continue;
        }
        to_fetch.push(item.clone());
    }
    to_fetch.sort_by(by_position_then_id);

    let to_quarantine: Vec<LocalFile> = inventory
        .files
        .iter()
        .filter(|f| match f.inferred_id.as_deref() {
            Some(id) => !remote_ids.contains(id) && local_ids.contains(id),
            None => false,
        })
        .cloned()
        .collect();

    let mut adopt_by_id: BTreeMap<&str, &LocalFile> = BTreeMap::new();
    for file in &inventory.files {
        let Some(id) = file.inferred_id.as_deref() else {
            continue;
        };
        if !remote_ids.contains(id) || ledger_ids.contains(id) || !local_ids.contains(id) {
            continue;
        }
        adopt_by_id
            .entry(id)
            .and_modify(|current| {
                if origin_rank(file.origin) < origin_rank(current.origin) {
                    *current = file;
                }
            })
            .or_insert(file);
    }

    let already_present = remote_ids.iter().filter(|id| local_ids.contains(**id)).count();

    Decision::Proceed(Plan {
        to_fetch,
        to_quarantine,
        stale_ledger,
        to_adopt: adopt_by_id.into_values().cloned().collect(),
        already_present,
        unmanaged: inventory.unmanaged().map(|f| f.path.clone()).collect(),
        skipped: skipped(inventory, &failed),
    })
}

/// One entry per failed id, with the first error seen for it.
fn skipped(inventory: &Inventory, failed: &BTreeSet<String>) -> Vec<Skipped> {
    failed
        .iter()
        .filter_map(|id| {
            let error = inventory.errors.iter().find(|e| e.id.as_ref() == Some(id))?;
            Some(Skipped {
                id: id.clone(),
                reason: format!("{}: {}", error.path.display(), error.message),
            })
        })
        .collect()
}

fn by_position_then_id(a: &RemoteItem, b: &RemoteItem) -> Ordering {
    a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id))
}

/// Preferred file when an id has several: canonical first.
pub(crate) fn origin_rank(origin: Option<IdOrigin>) -> u8 {
    match origin {
        Some(IdOrigin::Canonical) => 0,
        Some(IdOrigin::ProviderOutput) => 1,
        Some(IdOrigin::LedgerMatch) => 2,
        None => 3,
    }
}
