//! Remote playlist fetcher.
//!
//! Wraps [`FetchProvider::list_playlist`] with URL validation, the shared
//! retry policy and listing cleanup. A successful but empty listing is
//! returned as-is; refusing to act on it is the reconciler's job.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;

use crate::config::{is_probably_url, normalize_url};
use crate::error::{Error, Result};
use crate::model::RemoteItem;
use crate::provider::FetchProvider;
use crate::retry::RetryPolicy;

/// Fetch the ordered remote listing for a playlist URL.
pub async fn fetch_remote(
    provider: &dyn FetchProvider,
    url: &str,
    policy: &RetryPolicy,
    cancel: &AtomicBool,
) -> Result<Vec<RemoteItem>> {
    let url = normalize_url(url);
    if !is_probably_url(&url) {
        return Err(Error::fetch_failed(format!("not a playlist URL: {:?}", url)));
    }

    let items = policy
        .run("list_playlist", cancel, |_| provider.list_playlist(&url))
        .await
        .map_err(|e| Error::fetch_failed(format!("{} (after {} attempt(s))", e, e.attempts)))?;

    let items = dedupe_listing(items);
    tracing::debug!(url = %url, count = items.len(), "Fetched remote listing");
    Ok(items)
}

/// Drop blank and repeated ids, keep first positions, renumber.
pub fn dedupe_listing(items: Vec<RemoteItem>) -> Vec<RemoteItem> {
    let mut sorted = items;
    sorted.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));

    let mut seen = HashSet::new();
    sorted
        .into_iter()
        .filter(|item| !item.id.trim().is_empty() && seen.insert(item.id.clone()))
        .enumerate()
        .map(|(position, item)| RemoteItem { position, ..item })
        .collect()
}
