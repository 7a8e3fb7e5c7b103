//! The feed/item data model.
//!
//! This module owns merge-on-refresh semantics, stable item identity, sort
//! order, and eviction:
//!
//! - [`RawItem`] - an unvalidated item fresh from a parser
//! - [`Item`] - a normalized, deduplicated entry keyed by content URL hash
//! - [`Feed`] - one content source plus its item map and refresh status
//! - [`FeedParams`] - validated, per-kind feed configuration
//!
//! [`FeedSummary`] and [`ItemSummary`] are owned, read-only projections for
//! external consumption; they are computed on demand and never persisted.

#[allow(clippy::module_inception)]
mod feed;
mod item;
mod params;

pub use feed::{Feed, FeedSummary, PRUNE_MAX_ITEMS, PRUNE_MIN_ITEMS};
pub use item::{uid, Item, ItemSummary, RawItem};
pub use params::{FeedKind, FeedParams, HtmlParams, ImageParams, ParamsError, XmlParams};
