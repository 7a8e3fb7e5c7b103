use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Returns a stable unique identifier for the given input string.
///
/// UIDs are hex-encoded SHA-256 digests, so they are deterministic and
/// collision-free in practice. Both item and feed identities are derived
/// through this function.
pub fn uid(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// An item as it comes from a parser, before identity and merge are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    /// URL of the item.
    pub url: String,
    /// Short title or description of the item.
    pub title: String,
    /// Short summary of the authors of the item (usually comma-separated).
    pub authors: String,
    /// Full content of the item, usually a sanitized HTML fragment.
    pub content: String,
    /// Position of the item in the feed document when it was first seen.
    /// Assuming two items were first seen at the same time, a lower position
    /// typically means a newer item (that's how blogs are usually laid out).
    pub position: usize,
}

impl RawItem {
    /// Returns true if the item has a URL and a title, thus being considered
    /// minimally valid.
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty() && !self.title.is_empty()
    }

    /// Returns the unique identifier of the item, or `None` if the item is
    /// not valid. Invalid items have no identity and never reach the model.
    pub fn uid(&self) -> Option<String> {
        if !self.is_valid() {
            return None;
        }
        Some(uid(&self.url))
    }
}

/// An item as tracked by a [`Feed`](super::Feed), with fields that survive
/// across refresh cycles.
///
/// `timestamp` and `read` are set once and preserved on every later refresh;
/// the content fields are overwritten from the latest [`RawItem`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    /// URL of the item.
    pub url: String,
    /// Short title or description of the item.
    pub title: String,
    /// Short summary of the authors of the item (usually comma-separated).
    pub authors: String,
    /// Full content of the item, usually a sanitized HTML fragment.
    pub content: String,
    /// Position of the item in the feed document when it was first seen. It
    /// anchors tie-break ordering to first-seen document order even as
    /// documents are re-scraped.
    pub position: usize,

    /// UID of the feed this item belongs to. Populated by the feed itself.
    pub feed_uid: String,
    /// Time when the item was first seen, in unix seconds. Populated by the
    /// feed itself.
    pub timestamp: i64,
    /// True if the item was marked as read by the user.
    pub read: bool,
}

impl Item {
    /// Creates an empty item owned by the feed with the given UID, first seen
    /// at the given timestamp. The content fields are filled in by the first
    /// call to [`Item::refresh`].
    pub(crate) fn new(feed_uid: String, timestamp: i64) -> Self {
        Item {
            feed_uid,
            timestamp,
            ..Item::default()
        }
    }

    /// Returns the unique identifier of the item.
    pub fn uid(&self) -> String {
        uid(&self.url)
    }

    /// Updates the changeable fields of the item from the new raw item `r`.
    ///
    /// The position is only taken from `r` when the item has no URL yet,
    /// meaning it is being initialized; it is never altered afterward.
    /// Returns true if any field changed.
    pub fn refresh(&mut self, r: &RawItem) -> bool {
        let mut changed = false;
        if self.url.is_empty() && self.position != r.position {
            self.position = r.position;
        }
        if self.url != r.url {
            self.url = r.url.clone();
            changed = true;
        }
        if self.title != r.title {
            self.title = r.title.clone();
            changed = true;
        }
        if self.authors != r.authors {
            self.authors = r.authors.clone();
            changed = true;
        }
        if self.content != r.content {
            self.content = r.content.clone();
            changed = true;
        }
        changed
    }

    /// Marks the item as read.
    pub fn mark_read(&mut self) {
        self.read = true;
    }

    /// Returns a summary of the item, attributed to the feed identified by
    /// `feed_uid`/`feed_name`. Content is only included when explicitly
    /// requested (e.g., a single-item fetch).
    pub(crate) fn summary(
        &self,
        feed_uid: &str,
        feed_name: &str,
        include_content: bool,
    ) -> ItemSummary {
        ItemSummary {
            uid: self.uid(),
            feed_uid: feed_uid.to_string(),
            feed_name: feed_name.to_string(),
            url: self.url.clone(),
            title: self.title.clone(),
            timestamp: self.timestamp,
            authors: self.authors.clone(),
            read: self.read,
            content: if include_content {
                Some(self.content.clone())
            } else {
                None
            },
        }
    }
}

/// The external representation of an item (e.g., for presenting to users).
///
/// `url`, `title` and `authors` come directly from the feed and are not
/// sanitized; do not embed them in a page without proper measures. `content`
/// is a sanitized HTML fragment and may safely be embedded directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub uid: String,
    pub feed_uid: String,
    pub feed_name: String,
    pub url: String,
    pub title: String,
    pub timestamp: i64,
    pub authors: String,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}
