use std::sync::Arc;

use futures::stream::{self, StreamExt};

use super::Inner;
use crate::fetch::{FetchOutcome, FetchRequest};

/// How many feeds are fetched at the same time during one refresh cycle.
/// The original design fanned out without a cap; a bound keeps a large feed
/// set from opening hundreds of simultaneous connections.
const MAX_CONCURRENT_FETCHES: usize = 8;

impl Inner {
    /// Fetches every feed concurrently and merges the results.
    ///
    /// The fetches happen outside the feed-map lock; only collecting the
    /// requests and merging the outcomes take it. Each feed is an isolated
    /// unit of work: one feed failing to fetch or parse records an error on
    /// that feed alone and never blocks or corrupts the others.
    pub(crate) async fn refresh(&self) {
        let requests: Vec<(String, FetchRequest)> = {
            let feeds = self.feeds();
            feeds
                .values()
                .map(|feed| {
                    (
                        feed.uid(),
                        FetchRequest {
                            url: feed.url.clone(),
                            feed_name: feed.name.clone(),
                            params: feed.params.clone(),
                        },
                    )
                })
                .collect()
        };
        tracing::info!(n_feeds = requests.len(), "refreshing all feeds");

        let results: Vec<(String, FetchOutcome)> = stream::iter(requests)
            .map(|(uid, req)| {
                let fetcher = self.fetcher.clone();
                async move {
                    let outcome = fetcher.fetch(req).await;
                    (uid, outcome)
                }
            })
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

        {
            let mut feeds = self.feeds();
            for (uid, outcome) in results {
                // The feed may have been reconciled away while its fetch was
                // in flight; its result is then simply dropped.
                if let Some(feed) = feeds.get_mut(&uid) {
                    feed.refresh(outcome);
                }
            }
        }
        tracing::info!("refresh completed");

        if let Some(callback) = &self.refresh_callback {
            callback();
        }
    }
}

/// Periodically refreshes all feeds until shutdown. Only spawned when the
/// refresh interval is non-zero; the startup refresh happens during store
/// construction regardless.
pub(crate) async fn auto_refresh(inner: Arc<Inner>) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();
    tracing::info!(interval = ?inner.refresh_interval, "auto-refresh enabled");
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                tracing::info!("stopping auto-refresh");
                return;
            }
            _ = tokio::time::sleep(inner.refresh_interval) => {
                tracing::info!("auto-refresh interval reached");
                inner.refresh().await;
                inner.postpone_persist();
            }
        }
    }
}
