//! Progress events emitted while syncing.
//!
//! The engine never prints. Front ends subscribe with an unbounded channel and
//! render events however they like; a run without a subscriber just drops them.

use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::report::{FailureStage, PlaylistResult};

/// One progress notification.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    PlaylistStarted {
        playlist: String,
    },
    /// Remote listing obtained
    RemoteListed {
        playlist: String,
        count: usize,
    },
    /// Reconciliation finished and the plan is about to run
    Planned {
        playlist: String,
        to_fetch: usize,
        to_quarantine: usize,
        stale: usize,
        already_present: usize,
    },
    ItemStarted {
        playlist: String,
        id: String,
        index: usize,
        total: usize,
    },
    ItemFetched {
        playlist: String,
        id: String,
        path: PathBuf,
    },
    ItemFailed {
        playlist: String,
        id: String,
        stage: FailureStage,
        reason: String,
    },
    ItemQuarantined {
        playlist: String,
        id: String,
        destination: PathBuf,
    },
    /// An existing file got its canonical name
    ItemRenamed {
        playlist: String,
        id: String,
        path: PathBuf,
    },
    PlaylistFinished(Box<PlaylistResult>),
}

/// Optional event subscriber.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl EventSink {
    /// A sink that discards everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a sink and the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more
            let _ = tx.send(event);
        }
    }
}
