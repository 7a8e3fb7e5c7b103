use std::collections::HashMap;
use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::item::{uid, Item, ItemSummary, RawItem};
use super::params::{FeedKind, FeedParams, ParamsError};

/// Lower bound of the adaptive eviction window. Tunable; changing it only
/// affects how many items survive a prune, not the snapshot format.
pub const PRUNE_MIN_ITEMS: usize = 100;

/// Upper bound of the adaptive eviction window.
pub const PRUNE_MAX_ITEMS: usize = 200;

/// A feed in the application: one content source, real (fetched from a URL)
/// or virtual (synthesized, e.g. "all").
///
/// The item map is populated only through [`Feed::refresh`]; eviction removes
/// items in bulk by sort order via [`Feed::prune`].
#[derive(Debug, Clone)]
pub struct Feed {
    /// Name of the feed as defined by the user.
    pub name: String,
    /// URL from which the feed is fetched. If empty, the feed is assumed to
    /// be a virtual feed managed by the application.
    pub url: String,
    /// Items in the feed, keyed by item UID.
    pub items: HashMap<String, Item>,
    /// Type-specific parameters, validated at construction time.
    pub params: FeedParams,
    /// Time when the feed was last successfully refreshed, in unix seconds.
    pub last_refreshed_at: i64,
    /// The last error that occurred when refreshing the feed, or empty.
    pub last_refresh_error: String,
}

impl Feed {
    /// Creates an empty feed fetched from `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>, params: FeedParams) -> Self {
        Feed {
            name: name.into(),
            url: url.into(),
            items: HashMap::new(),
            params,
            last_refreshed_at: 0,
            last_refresh_error: String::new(),
        }
    }

    /// Creates an empty virtual feed, identified by its lowercased name.
    pub(crate) fn synthetic(name: impl Into<String>, last_refreshed_at: i64) -> Self {
        Feed {
            name: name.into(),
            url: String::new(),
            items: HashMap::new(),
            params: FeedParams::Xml(Default::default()),
            last_refreshed_at,
            last_refresh_error: String::new(),
        }
    }

    /// Returns the unique identifier of the feed: the hash of its URL, or
    /// its lowercased name for virtual feeds without a URL.
    pub fn uid(&self) -> String {
        if self.url.is_empty() {
            return self.name.to_lowercase();
        }
        uid(&self.url)
    }

    /// Returns the kind of the feed, as carried by its parameters.
    pub fn kind(&self) -> FeedKind {
        self.params.kind()
    }

    /// Updates the feed with the outcome of a fetch: raw items and a fetch
    /// timestamp, or a fetch error. The feed is then pruned to its maximum
    /// number of items.
    ///
    /// A failed fetch, or a fetch yielding no items, only records an error
    /// and leaves the items untouched.
    pub fn refresh(&mut self, outcome: Result<(Vec<RawItem>, i64), impl fmt::Display>) {
        let (raw_items, ts) = match outcome {
            Err(err) => {
                let err = err.to_string();
                tracing::warn!(feed = %self.name, error = %err, "feed refresh failed");
                self.last_refresh_error = err;
                return;
            }
            Ok((raw_items, ts)) => (raw_items, ts),
        };
        tracing::info!(
            feed = %self.name,
            n_items = self.items.len(),
            n_raw_items = raw_items.len(),
            "refreshing feed"
        );

        if raw_items.is_empty() {
            self.last_refresh_error = "no items found in the last refresh".to_string();
            return;
        }

        let feed_uid = self.uid();
        for (pos, raw_item) in raw_items.iter().enumerate() {
            let Some(item_uid) = raw_item.uid() else {
                tracing::info!(feed = %self.name, item_pos = pos, "skipping invalid item in feed");
                continue;
            };
            self.items
                .entry(item_uid)
                .or_insert_with(|| Item::new(feed_uid.clone(), ts))
                .refresh(raw_item);
        }
        self.last_refreshed_at = ts;
        self.last_refresh_error.clear();

        self.prune(None, raw_items.len());
        tracing::info!(feed = %self.name, n_items = self.items.len(), "feed refreshed");
    }

    /// Removes the lowest-ranked items (as determined by
    /// [`Feed::sorted_items`]) until at most the allowed number remains.
    ///
    /// The cap is, in order of precedence: the explicit `limit` argument;
    /// the feed's positive `max_items` param; when `observed_raw_items` is
    /// greater than zero, twice that count clamped to
    /// [`PRUNE_MIN_ITEMS`]..=[`PRUNE_MAX_ITEMS`]. With no limit, no declared
    /// cap and no observed count, nothing is evicted.
    pub fn prune(&mut self, limit: Option<usize>, observed_raw_items: usize) {
        let cap = match limit.or_else(|| self.params.max_items()) {
            Some(n) => n,
            None if observed_raw_items > 0 => {
                (observed_raw_items * 2).clamp(PRUNE_MIN_ITEMS, PRUNE_MAX_ITEMS)
            }
            None => return,
        };
        if self.items.len() <= cap {
            return;
        }

        let mut remaining = self.sorted_items();
        remaining.truncate(cap);
        self.items = remaining
            .into_iter()
            .map(|item| (item.uid(), item))
            .collect();
    }

    /// Returns copies of the items in the feed, sorted by timestamp
    /// descending, then position ascending, then URL ascending. Every level
    /// breaks ties deterministically, so this is a strict total order.
    pub fn sorted_items(&self) -> Vec<Item> {
        let mut sorted: Vec<Item> = self.items.values().cloned().collect();
        sorted.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.position.cmp(&b.position))
                .then_with(|| a.url.cmp(&b.url))
        });
        sorted
    }

    /// Marks every item whose timestamp is less than or equal to `before` as
    /// read.
    pub fn mark_all_read(&mut self, before: i64) {
        for item in self.items.values_mut() {
            if item.timestamp <= before {
                item.mark_read();
            }
        }
    }

    /// Returns a summary of the feed, with its items included only when
    /// `with_items` is true.
    ///
    /// `origins` should usually be `None`; it is only used when building
    /// virtual feeds holding items from other feeds, mapping item UIDs to
    /// the `(uid, name)` of their originating feed so summaries still
    /// attribute items correctly.
    pub fn summary(
        &self,
        with_items: bool,
        origins: Option<&HashMap<String, (String, String)>>,
    ) -> FeedSummary {
        let feed_uid = self.uid();
        let items = self.sorted_items();
        let read_count = items.iter().filter(|item| item.read).count();

        let item_summaries = with_items.then(|| {
            items
                .iter()
                .map(|item| {
                    let origin = origins.and_then(|origins| origins.get(&item.uid()));
                    match origin {
                        Some((fuid, fname)) => item.summary(fuid, fname, false),
                        None => item.summary(&feed_uid, &self.name, false),
                    }
                })
                .collect()
        });

        FeedSummary {
            uid: feed_uid,
            url: self.url.clone(),
            name: self.name.clone(),
            items: item_summaries,
            last_updated: self.last_refreshed_at,
            last_error: self.last_refresh_error.clone(),
            item_count: items.len(),
            read_count,
        }
    }
}

/// The external representation of a feed (e.g., for presenting to users).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSummary {
    pub uid: String,
    pub url: String,
    pub name: String,
    /// Items in the feed; only populated when explicitly requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ItemSummary>>,
    pub last_updated: i64,
    pub last_error: String,
    pub item_count: usize,
    pub read_count: usize,
}

// The snapshot keeps the feed kind and its parameters in separate fields
// ("type" and "params"), so serialization is written out by hand and
// deserialization goes through FeedWire, which re-validates the parameters
// against the declared kind.
impl Serialize for Feed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Feed", 7)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", &self.kind())?;
        state.serialize_field("url", &self.url)?;
        state.serialize_field("items", &self.items)?;
        state.serialize_field("params", &self.params)?;
        state.serialize_field("updated_at", &self.last_refreshed_at)?;
        state.serialize_field("error", &self.last_refresh_error)?;
        state.end()
    }
}

/// The persisted shape of a [`Feed`], with parameters still untyped.
#[derive(Deserialize)]
struct FeedWire {
    name: String,
    #[serde(rename = "type")]
    kind: FeedKind,
    #[serde(default)]
    url: String,
    #[serde(default)]
    items: HashMap<String, Item>,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    updated_at: i64,
    #[serde(default)]
    error: String,
}

impl TryFrom<FeedWire> for Feed {
    type Error = ParamsError;

    fn try_from(wire: FeedWire) -> Result<Self, ParamsError> {
        Ok(Feed {
            params: FeedParams::parse(wire.kind, wire.params)?,
            name: wire.name,
            url: wire.url,
            items: wire.items,
            last_refreshed_at: wire.updated_at,
            last_refresh_error: wire.error,
        })
    }
}

impl<'de> Deserialize<'de> for Feed {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = FeedWire::deserialize(deserializer)?;
        Feed::try_from(wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::super::params::XmlParams;
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(url: &str, position: usize) -> RawItem {
        RawItem {
            url: url.to_string(),
            title: format!("Item {position}"),
            authors: String::new(),
            content: String::new(),
            position,
        }
    }

    fn raw_items(prefix: &str, n: usize) -> Vec<RawItem> {
        (0..n)
            .map(|i| raw(&format!("https://example.com/{prefix}/{i}"), i))
            .collect()
    }

    fn xml_feed() -> Feed {
        Feed::new(
            "Example",
            "https://example.com/feed.xml",
            FeedParams::Xml(Default::default()),
        )
    }

    #[test]
    fn uid_prefers_url_and_falls_back_to_name() {
        let feed = xml_feed();
        assert_eq!(feed.uid(), uid("https://example.com/feed.xml"));

        let synthetic = Feed::synthetic("All", 0);
        assert_eq!(synthetic.uid(), "all");
    }

    #[test]
    fn refresh_merges_new_and_existing_items() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((
            vec![raw("https://example.com/a", 0), raw("https://example.com/b", 1)],
            1000,
        )));
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.last_refreshed_at, 1000);
        assert_eq!(feed.last_refresh_error, "");

        // The same URLs again, later and with a changed title: content
        // updates, the first-seen timestamp does not.
        let mut changed = raw("https://example.com/a", 0);
        changed.title = "Updated".to_string();
        feed.refresh(Ok::<_, &str>((vec![changed], 2000)));

        let item = &feed.items[&uid("https://example.com/a")];
        assert_eq!(item.title, "Updated");
        assert_eq!(item.timestamp, 1000);
        assert_eq!(feed.last_refreshed_at, 2000);
    }

    #[test]
    fn refresh_keys_items_by_their_uid() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("p", 5), 1000)));
        for (key, item) in &feed.items {
            assert_eq!(key, &item.uid());
            assert_eq!(item.feed_uid, feed.uid());
        }
    }

    #[test]
    fn refresh_skips_invalid_items() {
        let mut feed = xml_feed();
        let no_title = RawItem {
            url: "https://example.com/x".to_string(),
            ..RawItem::default()
        };
        feed.refresh(Ok::<_, &str>((
            vec![raw("https://example.com/a", 0), no_title],
            1000,
        )));
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.last_refresh_error, "");
    }

    #[test]
    fn refresh_error_keeps_items_untouched() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("p", 3), 1000)));

        feed.refresh(Err::<(Vec<RawItem>, i64), _>("cannot make request: boom"));
        assert_eq!(feed.items.len(), 3);
        assert_eq!(feed.last_refreshed_at, 1000);
        assert_eq!(feed.last_refresh_error, "cannot make request: boom");

        // A successful refresh clears the recorded error.
        feed.refresh(Ok::<_, &str>((raw_items("p", 3), 2000)));
        assert_eq!(feed.last_refresh_error, "");
    }

    #[test]
    fn refresh_with_no_items_records_error() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("p", 3), 1000)));
        feed.refresh(Ok::<_, &str>((vec![], 2000)));
        assert_eq!(feed.items.len(), 3);
        assert_eq!(feed.last_refresh_error, "no items found in the last refresh");
    }

    #[test]
    fn sorted_items_is_a_strict_total_order() {
        let mut feed = xml_feed();
        feed.items = [
            ("https://example.com/old", 5, 0),
            ("https://example.com/new-b", 10, 1),
            ("https://example.com/new-a", 10, 1),
            ("https://example.com/new-first", 10, 0),
        ]
        .into_iter()
        .map(|(url, ts, pos)| {
            let mut item = Item::new(feed.uid(), ts);
            item.refresh(&raw(url, pos));
            (item.uid(), item)
        })
        .collect();

        let sorted = feed.sorted_items();
        let urls: Vec<&str> = sorted.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                // Newest timestamp first; equal timestamps by position; equal
                // positions lexicographically by URL.
                "https://example.com/new-first",
                "https://example.com/new-a",
                "https://example.com/new-b",
                "https://example.com/old",
            ]
        );
    }

    #[test]
    fn prune_respects_declared_max_items() {
        let mut feed = Feed::new(
            "Example",
            "https://example.com/feed.xml",
            FeedParams::Xml(XmlParams { max_items: Some(2) }),
        );
        feed.refresh(Ok::<_, &str>((raw_items("p", 10), 1000)));
        assert_eq!(feed.items.len(), 2);
    }

    #[test]
    fn prune_adaptive_cap_follows_observed_count() {
        // 150 fresh items: adaptive cap = clamp(300, 100, 200) = 200, all
        // 150 kept. A later scrape of the same document with 10 more items:
        // 160 distinct, still all kept. A third scrape bringing the total
        // to 250 distinct: pruned down to 200, dropping the 50
        // lowest-ranked.
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("a", 150), 1000)));
        assert_eq!(feed.items.len(), 150);

        let mut second = raw_items("a", 150);
        second.extend(raw_items("b", 10));
        feed.refresh(Ok::<_, &str>((second.clone(), 2000)));
        assert_eq!(feed.items.len(), 160);

        second.extend(raw_items("c", 90));
        feed.refresh(Ok::<_, &str>((second, 3000)));
        assert_eq!(feed.items.len(), 200);

        // The newest batch ranks highest and must have survived in full;
        // the 50 evicted items all come from the oldest batch.
        for item in raw_items("c", 90).iter().chain(raw_items("b", 10).iter()) {
            assert!(feed.items.contains_key(&uid(&item.url)));
        }
        let oldest_kept = raw_items("a", 150)
            .iter()
            .filter(|i| feed.items.contains_key(&uid(&i.url)))
            .count();
        assert_eq!(oldest_kept, 100);
    }

    #[test]
    fn prune_removes_lowest_ranked_items() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("old", 50), 1000)));
        feed.refresh(Ok::<_, &str>((raw_items("new", 60), 2000)));

        feed.prune(Some(60), 0);
        assert_eq!(feed.items.len(), 60);
        // Everything from the newer batch outranks the older one.
        for item in raw_items("new", 60) {
            assert!(feed.items.contains_key(&uid(&item.url)));
        }
    }

    #[test]
    fn bare_prune_does_nothing() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("p", 150), 1000)));
        feed.prune(None, 0);
        assert_eq!(feed.items.len(), 150);
    }

    #[test]
    fn mark_all_read_honors_before() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("a", 2), 1000)));
        feed.refresh(Ok::<_, &str>((raw_items("b", 2), 2000)));

        feed.mark_all_read(1500);
        let read: Vec<bool> = feed.sorted_items().iter().map(|i| i.read).collect();
        assert_eq!(read, vec![false, false, true, true]);

        feed.mark_all_read(2000);
        assert!(feed.sorted_items().iter().all(|i| i.read));
    }

    #[test]
    fn summary_counts_and_items() {
        let mut feed = xml_feed();
        feed.refresh(Ok::<_, &str>((raw_items("p", 3), 1000)));
        feed.mark_all_read(999); // nothing read yet
        if let Some(item) = feed.items.values_mut().next() {
            item.mark_read();
        }

        let summary = feed.summary(false, None);
        assert_eq!(summary.uid, feed.uid());
        assert_eq!(summary.item_count, 3);
        assert_eq!(summary.read_count, 1);
        assert_eq!(summary.items, None);

        let with_items = feed.summary(true, None);
        let items = with_items.items.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].feed_name, "Example");
        assert!(items[0].content.is_none(), "feed summaries omit content");
    }

    #[test]
    fn summary_attributes_items_through_origins() {
        let mut feed = Feed::synthetic("All", 1000);
        let mut item = Item::new("other-feed-uid".to_string(), 1000);
        item.refresh(&raw("https://example.com/a", 0));
        let item_uid = item.uid();
        feed.items.insert(item_uid.clone(), item);

        let origins = HashMap::from([(
            item_uid,
            ("other-feed-uid".to_string(), "Other".to_string()),
        )]);
        let summary = feed.summary(true, Some(&origins));
        let items = summary.items.unwrap();
        assert_eq!(items[0].feed_uid, "other-feed-uid");
        assert_eq!(items[0].feed_name, "Other");
    }

    #[test]
    fn feed_json_round_trip() {
        let mut feed = Feed::new(
            "Example",
            "https://example.com/feed.xml",
            FeedParams::Xml(XmlParams { max_items: Some(50) }),
        );
        feed.refresh(Ok::<_, &str>((raw_items("p", 3), 1000)));
        feed.refresh(Err::<(Vec<RawItem>, i64), _>("boom"));

        let json = serde_json::to_value(&feed).unwrap();
        assert_eq!(json["type"], "xml");
        assert_eq!(json["updated_at"], 1000);
        assert_eq!(json["error"], "boom");
        assert_eq!(json["params"]["max_items"], 50);

        let restored: Feed = serde_json::from_value(json).unwrap();
        assert_eq!(restored.uid(), feed.uid());
        assert_eq!(restored.items.len(), 3);
        assert_eq!(restored.params, feed.params);
        assert_eq!(restored.last_refresh_error, "boom");
    }

    #[test]
    fn feed_json_with_invalid_params_fails_to_load() {
        let json = serde_json::json!({
            "name": "Scraped",
            "type": "html",
            "url": "https://example.com",
            "items": {},
            "params": {"container_tag": "", "base_url": "", "allowed_prefixes": []},
            "updated_at": 0,
            "error": "",
        });
        let err = serde_json::from_value::<Feed>(json).unwrap_err();
        assert!(err.to_string().contains("cannot validate"));
    }
}
