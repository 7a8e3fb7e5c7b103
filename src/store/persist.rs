use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::Inner;
use crate::feed::Feed;

/// Errors that can occur while saving or loading the feed snapshot.
///
/// These are logged and reported through the optional persist callback but
/// never crash the process; losing one snapshot write is preferable to
/// taking the aggregator down.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot access feed snapshot file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot serialize feed snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("cannot deserialize feed snapshot: {0}")]
    Deserialize(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct Snapshot {
    feeds: HashMap<String, Feed>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    feeds: &'a HashMap<String, Feed>,
}

impl Inner {
    /// Loads the feed snapshot from the configured path, replacing the feed
    /// map. A missing or empty file means no prior state and is not an
    /// error; a file that exists but cannot be parsed is, and the caller
    /// must then leave it alone for the rest of the run.
    pub(crate) fn load(&self) -> Result<(), PersistError> {
        let Some(path) = &self.db_path else {
            tracing::info!("no persistence configured");
            return Ok(());
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "no feed snapshot yet");
            return Ok(());
        }
        let data = std::fs::read(path)?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let snapshot: Snapshot =
            serde_json::from_slice(&data).map_err(PersistError::Deserialize)?;
        tracing::info!(
            path = %path.display(),
            n_feeds = snapshot.feeds.len(),
            "loaded feed snapshot"
        );
        *self.feeds() = snapshot.feeds;
        Ok(())
    }

    /// Serializes the feed map to the configured path. Without a configured
    /// path this is a no-op.
    pub(crate) fn save(&self) -> Result<(), PersistError> {
        let Some(path) = &self.db_path else {
            return Ok(());
        };
        let data = {
            let feeds = self.feeds();
            serde_json::to_vec(&SnapshotRef { feeds: &feeds }).map_err(PersistError::Serialize)?
        };
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Tries to save the snapshot, logging the outcome and invoking the
    /// persist callback with it.
    pub(crate) fn persist(&self, reason: &str) {
        let result = self.save();
        match &result {
            Ok(()) => tracing::info!(reason, "persisted feed snapshot"),
            Err(err) => {
                tracing::error!(reason, error = %err, "cannot persist feed snapshot")
            }
        }
        if let Some(callback) = &self.persist_callback {
            callback(result);
        }
    }
}

/// Periodically saves the feed snapshot until shutdown, with a final save on
/// the way out.
///
/// Receiving a postpone signal re-arms the timer without saving, so bursts
/// of store activity push the next write back instead of triggering
/// redundant ones. Only spawned when a snapshot path is configured, the
/// interval is non-zero, and the initial load succeeded.
pub(crate) async fn auto_persist(inner: Arc<Inner>, mut postpone_rx: mpsc::Receiver<()>) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    tracing::info!(interval = ?inner.persist_interval, "auto-persist enabled");
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                tracing::info!("stopping auto-persist");
                inner.persist("close");
                return;
            }
            _ = tokio::time::sleep(inner.persist_interval) => {
                inner.persist("interval");
            }
            Some(()) = postpone_rx.recv() => {
                tracing::debug!("auto-persist postponed, resetting timer");
            }
        }
    }
}
