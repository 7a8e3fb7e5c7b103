//! The fetch -> parse -> sanitize pipeline.
//!
//! This module turns arbitrary remote bytes into trusted items:
//!
//! - A sanitizer that rewrites untrusted HTML fragments into a safe subset
//!   (every parser runs its output through it)
//! - Format parsers for the three feed kinds: RSS/Atom XML, generic HTML
//!   scraping, and single-image endpoints
//! - [`HttpFetcher`] - issues the network request for one feed and
//!   dispatches the bytes to the parser selected by the feed's parameters
//!
//! The [`Fetcher`] trait is the seam the store consumes; tests substitute
//! their own implementation to avoid the network.

mod html;
mod image;
mod sanitize;
mod url;
mod xml;

use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::feed::{FeedParams, RawItem};

/// How long a single feed fetch may take, connection included. The original
/// design inherited the HTTP client default (none); a hung server should not
/// stall a whole refresh cycle, so a limit is set deliberately.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by parsers when turning fetched bytes into raw items.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document could not be decoded as either RSS or Atom.
    #[error("cannot parse XML as RSS or Atom: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),
    /// The configured legacy encoding label is unknown.
    #[error("cannot find encoding: {0}")]
    UnknownEncoding(String),
}

/// Errors that can occur while fetching and parsing one feed.
///
/// These are recorded on the owning feed as its last refresh error and never
/// propagate further; one feed's failure must not affect the others.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, timeout).
    #[error("cannot make request: {0}")]
    Request(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("unexpected HTTP status: {0}")]
    HttpStatus(u16),
    /// The response body could not be read in full.
    #[error("cannot read response body: {0}")]
    Body(#[source] reqwest::Error),
    /// The body was read but could not be parsed as the feed's kind.
    #[error("cannot parse feed: {0}")]
    Parse(#[from] ParseError),
}

/// The parameters needed to fetch and parse one feed.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// URL to fetch.
    pub url: String,
    /// Name of the feed, for logging.
    pub feed_name: String,
    /// Validated feed parameters; their variant selects the parser.
    pub params: FeedParams,
}

/// Raw items plus the unix timestamp of the fetch, or the error that
/// occurred.
pub type FetchOutcome = Result<(Vec<RawItem>, i64), FetchError>;

/// Fetches feeds on behalf of the store.
///
/// The store only depends on this trait, so tests (or alternative
/// transports) can plug in their own implementation.
pub trait Fetcher: Send + Sync {
    /// Fetches and parses the feed identified by the request, returning raw
    /// items stamped with the fetch time.
    fn fetch(&self, req: FetchRequest) -> BoxFuture<'static, FetchOutcome>;
}

/// The default [`Fetcher`]: an HTTP GET with a shared connection pool,
/// followed by parser dispatch on the request's parameter variant.
///
/// There is no retry at this layer; a failed fetch is retried naturally by
/// the next scheduled refresh.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Uses a caller-configured client (custom proxy, user agent, timeout).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, req: FetchRequest) -> BoxFuture<'static, FetchOutcome> {
        let client = self.client.clone();
        async move {
            tracing::info!(feed = %req.feed_name, url = %req.url, "fetching feed");
            let res = client.get(&req.url).send().await?;
            if !res.status().is_success() {
                return Err(FetchError::HttpStatus(res.status().as_u16()));
            }
            let data = res.bytes().await.map_err(FetchError::Body)?;

            tracing::info!(
                feed = %req.feed_name,
                kind = %req.params.kind(),
                n_bytes = data.len(),
                "parsing feed"
            );
            let items = parse_bytes(&data, &req.params)?;

            tracing::info!(feed = %req.feed_name, n_items = items.len(), "feed fetched and parsed");
            Ok((items, Utc::now().timestamp()))
        }
        .boxed()
    }
}

/// Parses fetched bytes with the parser owning the given parameter variant.
pub fn parse_bytes(data: &[u8], params: &FeedParams) -> Result<Vec<RawItem>, ParseError> {
    match params {
        FeedParams::Xml(p) => xml::parse_xml(data, p),
        FeedParams::Html(p) => html::parse_html(data, p),
        FeedParams::Image(p) => image::parse_image(data, p),
    }
}
