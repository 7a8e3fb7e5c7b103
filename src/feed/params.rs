use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of a feed, which selects the parser used for its fetched bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// An RSS 2.0 or Atom document.
    Xml,
    /// An arbitrary HTML page scraped for links.
    Html,
    /// A single-image endpoint.
    Img,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Xml => write!(f, "xml"),
            FeedKind::Html => write!(f, "html"),
            FeedKind::Img => write!(f, "img"),
        }
    }
}

/// Errors raised when turning untyped feed parameters into a [`FeedParams`]
/// variant.
#[derive(Debug, Error)]
pub enum ParamsError {
    /// The parameters could not be deserialized into the shape required by
    /// the feed kind.
    #[error("cannot parse {kind} feed params: {source}")]
    Parse {
        kind: FeedKind,
        source: serde_json::Error,
    },
    /// The parameters deserialized fine but failed validation.
    #[error("cannot validate {kind} feed params: {reason}")]
    Validate { kind: FeedKind, reason: String },
}

/// Parameters for XML (RSS/Atom) feeds. The parser itself needs none; only
/// the generic eviction cap can be tuned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XmlParams {
    /// Hard cap on the number of items kept in the feed. When unset, the
    /// adaptive eviction window applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

/// Parameters for the generic HTML scraper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlParams {
    /// Optional legacy encoding label (e.g. "iso-8859-1") applied to the
    /// fetched bytes before parsing. Must be known to encoding_rs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Tag of the elements containing the anchors to extract.
    pub container_tag: String,
    /// Attributes a container element must carry, matched exactly.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub container_attrs: HashMap<String, String>,
    /// Index into an anchor's extracted parts used as the item title.
    #[serde(default)]
    pub title_pos: usize,
    /// Base URL against which relative links are resolved.
    pub base_url: String,
    /// Resolved item URLs must start with one of these prefixes.
    pub allowed_prefixes: Vec<String>,
    /// Hard cap on the number of items kept in the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

/// Parameters for single-image feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParams {
    /// MIME type of the image, used to build the embedded data URL.
    pub mime_type: String,
    /// URL the produced item points at (the image content hash is appended
    /// as a fragment).
    pub url: String,
    /// Base title of the produced item (the fetch time is appended).
    pub title: String,
    /// Hard cap on the number of items kept in the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

/// Validated, type-specific feed configuration.
///
/// The variant is keyed by [`FeedKind`] at construction time via
/// [`FeedParams::parse`], so an unknown kind or invalid parameters are a
/// construction-time error rather than a runtime surprise when fetching.
///
/// Serialization emits only the inner parameter object; the owning
/// [`Feed`](super::Feed) persists the kind separately in its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FeedParams {
    Xml(XmlParams),
    Html(HtmlParams),
    Image(ImageParams),
}

impl FeedParams {
    /// Deserializes and validates untyped parameters for a feed of the given
    /// kind. A `null` value is accepted for XML feeds, which need no
    /// parameters.
    pub fn parse(kind: FeedKind, value: serde_json::Value) -> Result<Self, ParamsError> {
        let params = match kind {
            FeedKind::Xml if value.is_null() => FeedParams::Xml(XmlParams::default()),
            FeedKind::Xml => FeedParams::Xml(
                serde_json::from_value(value).map_err(|source| ParamsError::Parse { kind, source })?,
            ),
            FeedKind::Html => FeedParams::Html(
                serde_json::from_value(value).map_err(|source| ParamsError::Parse { kind, source })?,
            ),
            FeedKind::Img => FeedParams::Image(
                serde_json::from_value(value).map_err(|source| ParamsError::Parse { kind, source })?,
            ),
        };
        params.validate()?;
        Ok(params)
    }

    /// Returns the feed kind this variant belongs to.
    pub fn kind(&self) -> FeedKind {
        match self {
            FeedParams::Xml(_) => FeedKind::Xml,
            FeedParams::Html(_) => FeedKind::Html,
            FeedParams::Image(_) => FeedKind::Img,
        }
    }

    /// Returns the declared per-feed eviction cap, if any.
    pub fn max_items(&self) -> Option<usize> {
        match self {
            FeedParams::Xml(p) => p.max_items,
            FeedParams::Html(p) => p.max_items,
            FeedParams::Image(p) => p.max_items,
        }
    }

    fn validate(&self) -> Result<(), ParamsError> {
        let fail = |reason: &str| {
            Err(ParamsError::Validate {
                kind: self.kind(),
                reason: reason.to_string(),
            })
        };

        if let Some(0) = self.max_items() {
            return fail("max_items must be positive");
        }

        match self {
            FeedParams::Xml(_) => {}
            FeedParams::Html(p) => {
                if p.container_tag.is_empty() {
                    return fail("container tag cannot be empty");
                }
                if p.base_url.is_empty() {
                    return fail("base URL cannot be empty");
                }
                if p.allowed_prefixes.is_empty() {
                    return fail("allowed prefixes cannot be empty");
                }
                if let Some(label) = &p.encoding {
                    if encoding_rs::Encoding::for_label(label.as_bytes()).is_none() {
                        return fail(&format!("cannot find encoding: {label}"));
                    }
                }
            }
            FeedParams::Image(p) => {
                if p.mime_type.is_empty() {
                    return fail("mime_type cannot be empty");
                }
                if p.url.is_empty() {
                    return fail("url cannot be empty");
                }
                if p.title.is_empty() {
                    return fail("title cannot be empty");
                }
            }
        }
        Ok(())
    }
}
