//! rill is a personal feed aggregator library.
//!
//! It periodically pulls content from heterogeneous sources (RSS/Atom XML,
//! scraped HTML pages, single-image endpoints), normalizes everything into a
//! uniform item model, deduplicates and merges updates across refresh cycles,
//! bounds memory via per-feed eviction, and exposes a read/unread view over
//! the aggregate.
//!
//! The crate is organized into three modules:
//!
//! - [`feed`] - The feed/item data model and its merge-and-prune lifecycle
//! - [`fetch`] - The fetch -> parse -> sanitize pipeline turning remote bytes
//!   into trusted items
//! - [`store`] - The concurrent store owning the feed set, fan-out refresh,
//!   debounced persistence, and the virtual "all" feed
//!
//! A web or UI layer is expected to sit on top of [`store::Store`], consuming
//! it only through its summary/mark-read interface.

pub mod feed;
pub mod fetch;
pub mod store;
