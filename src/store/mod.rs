//! The concurrent feed store.
//!
//! [`Store`] owns the set of feeds behind a single lock, drives fan-out
//! refresh across all of them, synthesizes the virtual "all" feed, and
//! manages debounced background persistence to a JSON snapshot file.
//!
//! All operations serialize on the feed-map lock; the per-feed network
//! fetches themselves run outside it, in parallel. Two long-lived background
//! tasks (auto-refresh and auto-persist) are started on construction and
//! stopped by [`Store::close`], which also takes a final snapshot.

mod persist;
mod refresh;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use persist::PersistError;

use crate::feed::{self, Feed, FeedKind, FeedParams, FeedSummary, ItemSummary, ParamsError};
use crate::fetch::{Fetcher, HttpFetcher};

/// UID of the virtual feed aggregating the items of every real feed.
pub const ALL_FEED_UID: &str = "all";

const ALL_FEED_NAME: &str = "All";

/// Item cap for the virtual "all" feed. It bounds the work of building the
/// aggregate view over very large feed sets; real feeds are already bounded
/// individually.
const ALL_FEED_MAX_ITEMS: usize = 2048;

/// Capacity of the persist-postpone channel. Signals beyond this are
/// dropped, which is fine: one pending signal already resets the timer.
const POSTPONE_CAPACITY: usize = 5;

/// A feed as described by the externally supplied desired feed list.
#[derive(Debug, Clone, Deserialize)]
pub struct InputFeed {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: FeedKind,
    /// Type-specific parameters, validated against `kind` when the list is
    /// loaded.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Called after every persistence attempt with its outcome.
pub type PersistCallback = Box<dyn Fn(Result<(), PersistError>) + Send + Sync>;

/// Called after every completed refresh cycle.
pub type RefreshCallback = Box<dyn Fn() + Send + Sync>;

/// Configuration for creating a [`Store`].
#[derive(Default)]
pub struct StoreParams {
    /// The desired feed list the store reconciles itself against on
    /// construction. See [`Store::load_feeds`].
    pub feeds: Vec<InputFeed>,

    /// Path of the JSON snapshot the store is loaded from and persisted to.
    /// If `None`, the store is kept only in memory.
    pub db_path: Option<PathBuf>,

    /// Interval at which the snapshot is written. Zero disables
    /// auto-persistence.
    pub persist_interval: Duration,

    /// Interval at which feeds are refreshed. Zero disables auto-refresh;
    /// the startup refresh still happens.
    pub refresh_interval: Duration,

    /// Fetcher used to fetch feeds. Defaults to [`HttpFetcher`].
    pub fetcher: Option<Arc<dyn Fetcher>>,

    /// Optional callback invoked after each refresh cycle completes.
    pub refresh_callback: Option<RefreshCallback>,

    /// Optional callback invoked after each persistence attempt.
    pub persist_callback: Option<PersistCallback>,
}

pub(crate) struct Inner {
    feeds: Mutex<HashMap<String, Feed>>,
    fetcher: Arc<dyn Fetcher>,
    db_path: Option<PathBuf>,
    persist_interval: Duration,
    refresh_interval: Duration,
    postpone_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    refresh_callback: Option<RefreshCallback>,
    persist_callback: Option<PersistCallback>,
}

impl Inner {
    /// The single lock serializing every access to the feed map. Lock
    /// poisoning is ignored: the map is always left consistent by the
    /// mutating operations.
    fn feeds(&self) -> MutexGuard<'_, HashMap<String, Feed>> {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks the auto-persist loop to push the next write back. Best-effort:
    /// if the signal cannot be sent (loop not running, channel full),
    /// nothing happens.
    fn postpone_persist(&self) {
        if self.postpone_tx.try_send(()).is_err() {
            tracing::debug!("cannot postpone auto-persist; it may not be running");
        }
    }
}

/// An in-memory feed store, optionally backed by a JSON snapshot file.
pub struct Store {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Store {
    /// Creates a store: loads the snapshot if one is configured, reconciles
    /// against the desired feed list, performs the startup refresh, and
    /// starts the background loops.
    ///
    /// If a configured snapshot exists but cannot be parsed, auto-persist
    /// stays disabled for this run so the file is never overwritten with a
    /// fresh, empty state; everything else proceeds normally.
    ///
    /// Fails only on an invalid desired feed list. Must be called within a
    /// tokio runtime.
    pub async fn new(params: StoreParams) -> Result<Self, ParamsError> {
        let (postpone_tx, postpone_rx) = mpsc::channel(POSTPONE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            feeds: Mutex::new(HashMap::new()),
            fetcher: params
                .fetcher
                .unwrap_or_else(|| Arc::new(HttpFetcher::new())),
            db_path: params.db_path,
            persist_interval: params.persist_interval,
            refresh_interval: params.refresh_interval,
            postpone_tx,
            shutdown_tx,
            refresh_callback: params.refresh_callback,
            persist_callback: params.persist_callback,
        });

        let persist_enabled = match inner.load() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "cannot load feed snapshot; auto-persist disabled");
                false
            }
        };

        let store = Store {
            inner: inner.clone(),
            tasks: Mutex::new(Vec::new()),
        };
        store.load_feeds(params.feeds)?;
        inner.refresh().await;

        let mut tasks = store.task_handles();
        if inner.refresh_interval > Duration::ZERO {
            tasks.push(tokio::spawn(refresh::auto_refresh(inner.clone())));
        }
        if persist_enabled && inner.db_path.is_some() && inner.persist_interval > Duration::ZERO {
            tasks.push(tokio::spawn(persist::auto_persist(inner.clone(), postpone_rx)));
        }
        drop(tasks);

        Ok(store)
    }

    fn task_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reconciles the store against the desired feed list: a desired feed
    /// whose URL-derived UID already exists is kept with its name, kind and
    /// params overwritten; new ones are created empty; existing feeds absent
    /// from the list are dropped. An empty list clears the store.
    pub fn load_feeds(&self, desired: Vec<InputFeed>) -> Result<(), ParamsError> {
        // Validate everything up front so a bad entry leaves the store
        // untouched.
        let desired: Vec<(InputFeed, FeedParams)> = desired
            .into_iter()
            .map(|input| {
                let params = FeedParams::parse(input.kind, input.params.clone())?;
                Ok((input, params))
            })
            .collect::<Result<_, ParamsError>>()?;

        tracing::info!(n_feeds = desired.len(), "loading feeds");
        let mut feeds = self.inner.feeds();
        let mut new_feeds = HashMap::new();
        for (input, params) in desired {
            match feeds.remove(&feed::uid(&input.url)) {
                Some(mut existing) => {
                    existing.name = input.name;
                    existing.params = params;
                    new_feeds.insert(existing.uid(), existing);
                }
                None => {
                    let new_feed = Feed::new(input.name, input.url, params);
                    new_feeds.insert(new_feed.uid(), new_feed);
                }
            }
        }
        *feeds = new_feeds;
        drop(feeds);

        self.inner.postpone_persist();
        Ok(())
    }

    /// Fetches and merges every feed concurrently, returning once all of
    /// them finished.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
        self.inner.postpone_persist();
    }

    /// Returns summaries (without items) of all feeds, including the
    /// virtual "all" feed, sorted by name.
    pub fn summary(&self) -> Vec<FeedSummary> {
        let mut summaries = {
            let feeds = self.inner.feeds();
            let mut summaries: Vec<FeedSummary> = feeds
                .values()
                .map(|feed| feed.summary(false, None))
                .collect();
            summaries.push(all_feed_summary(&feeds, false));
            summaries
        };
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        self.inner.postpone_persist();
        summaries
    }

    /// Returns the summary of the feed with the given UID, items included.
    /// The virtual [`ALL_FEED_UID`] feed is synthesized on the fly.
    pub fn feed_summary(&self, uid: &str) -> Option<FeedSummary> {
        let summary = {
            let feeds = self.inner.feeds();
            if uid == ALL_FEED_UID {
                Some(all_feed_summary(&feeds, true))
            } else {
                feeds.get(uid).map(|feed| feed.summary(true, None))
            }
        };
        self.inner.postpone_persist();
        summary
    }

    /// Returns the summary of one item, content included.
    pub fn feed_item(&self, fuid: &str, iuid: &str) -> Option<ItemSummary> {
        let summary = {
            let feeds = self.inner.feeds();
            feeds.get(fuid).and_then(|feed| {
                feed.items
                    .get(iuid)
                    .map(|item| item.summary(&feed.uid(), &feed.name, true))
            })
        };
        self.inner.postpone_persist();
        summary
    }

    /// Marks feeds or items as read. Three behaviors:
    ///
    /// - `fuid == "all"`: marks every item in every feed with
    ///   `timestamp <= before`;
    /// - `iuid` non-empty: marks exactly that item;
    /// - otherwise: marks every item in feed `fuid` with
    ///   `timestamp <= before`.
    ///
    /// Returns whether a target was found.
    pub fn mark_read(&self, fuid: &str, iuid: &str, before: i64) -> bool {
        let found = {
            let mut feeds = self.inner.feeds();
            if fuid == ALL_FEED_UID {
                for feed in feeds.values_mut() {
                    feed.mark_all_read(before);
                }
                true
            } else {
                match feeds.get_mut(fuid) {
                    Some(feed) if !iuid.is_empty() => match feed.items.get_mut(iuid) {
                        Some(item) => {
                            item.mark_read();
                            true
                        }
                        None => false,
                    },
                    Some(feed) => {
                        feed.mark_all_read(before);
                        true
                    }
                    None => false,
                }
            }
        };
        self.inner.postpone_persist();
        found
    }

    /// Writes the snapshot to the configured path immediately.
    pub fn save(&self) -> Result<(), PersistError> {
        self.inner.save()
    }

    /// Stops the background loops and waits for them; the auto-persist loop
    /// takes a final snapshot on its way out. In-flight fetches are awaited,
    /// not cancelled.
    pub async fn close(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.task_handles());
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Builds the summary of the virtual feed containing every item of the
/// given feeds. The aggregate is built fresh on every call and never stored;
/// an origin map keeps items attributed to the feed they came from.
fn all_feed_summary(feeds: &HashMap<String, Feed>, with_items: bool) -> FeedSummary {
    let mut all = Feed::synthetic(ALL_FEED_NAME, Utc::now().timestamp());
    let mut origins = HashMap::new();
    for feed in feeds.values() {
        let feed_uid = feed.uid();
        for (item_uid, item) in &feed.items {
            all.items.insert(item_uid.clone(), item.clone());
            origins.insert(item_uid.clone(), (feed_uid.clone(), feed.name.clone()));
        }
    }
    all.prune(Some(ALL_FEED_MAX_ITEMS), 0);
    all.summary(with_items, Some(&origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RawItem;

    fn feed_with_items(name: &str, url: &str, n: usize, ts: i64) -> Feed {
        let mut feed = Feed::new(name, url, FeedParams::Xml(Default::default()));
        let items: Vec<RawItem> = (0..n)
            .map(|i| RawItem {
                url: format!("{url}/item/{i}"),
                title: format!("Item {i}"),
                authors: String::new(),
                content: String::new(),
                position: i,
            })
            .collect();
        feed.refresh(Ok::<_, &str>((items, ts)));
        feed
    }

    #[test]
    fn all_feed_merges_and_attributes_items() {
        let a = feed_with_items("A", "https://a.example.com", 2, 1000);
        let b = feed_with_items("B", "https://b.example.com", 3, 2000);
        let feeds = HashMap::from([(a.uid(), a.clone()), (b.uid(), b.clone())]);

        let summary = all_feed_summary(&feeds, true);
        assert_eq!(summary.uid, ALL_FEED_UID);
        assert_eq!(summary.name, ALL_FEED_NAME);
        assert_eq!(summary.item_count, 5);

        let items = summary.items.unwrap();
        // Items from B are newer, so they come first.
        assert_eq!(items[0].feed_name, "B");
        assert_eq!(items[0].feed_uid, b.uid());
        assert_eq!(items[4].feed_name, "A");
        assert_eq!(items[4].feed_uid, a.uid());
    }

    #[test]
    fn all_feed_prunes_to_its_fixed_cap() {
        let mut feeds = HashMap::new();
        // 30 feeds x 100 items, each feed under its own cap but the
        // aggregate far over the all-feed cap.
        for i in 0..30 {
            let feed = feed_with_items(&format!("F{i}"), &format!("https://f{i}.example.com"), 100, 1000 + i);
            feeds.insert(feed.uid(), feed);
        }
        let summary = all_feed_summary(&feeds, false);
        assert_eq!(summary.item_count, ALL_FEED_MAX_ITEMS);
    }

    #[test]
    fn all_feed_of_empty_store_is_empty() {
        let summary = all_feed_summary(&HashMap::new(), true);
        assert_eq!(summary.item_count, 0);
        assert_eq!(summary.items, Some(vec![]));
    }
}
