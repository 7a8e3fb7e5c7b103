use url::Url;

use super::sanitize::sanitize_silent;
use super::url::{absolute_url, resolve_url};
use super::ParseError;
use crate::feed::{RawItem, XmlParams};

/// Parses an RSS 2.0 or Atom document into raw items.
///
/// Decoding is delegated to feed-rs, which detects the syndication flavor
/// and tolerates declared character-set headers. Item links are resolved
/// against the feed-level link when relative; absolute links pass through
/// unchanged. Entry content is the first non-empty of content/summary,
/// sanitized with the resolved item URL as base.
pub(crate) fn parse_xml(data: &[u8], _params: &XmlParams) -> Result<Vec<RawItem>, ParseError> {
    let parsed = feed_rs::parser::parse(data).map_err(ParseError::Xml)?;

    // The feed-level link serves as the base for relative entry links; it
    // must itself be absolute to be usable.
    let base = parsed
        .links
        .iter()
        .find_map(|link| absolute_url(&link.href));

    let items = parsed
        .entries
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            // Entries may carry multiple links; prefer the most logical one
            // (rel="self" or no rel at all), else fall back to the first.
            let href = entry
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), Some("self") | None))
                .or_else(|| entry.links.first())
                .map(|l| l.href.as_str())
                .unwrap_or_default();
            let resolved = resolve_url(href, base.as_ref(), None);
            let item_base = resolved.as_deref().and_then(|u| Url::parse(u).ok());

            let authors = entry
                .authors
                .iter()
                .map(|person| person.name.trim())
                .filter(|name| !name.is_empty())
                .collect::<Vec<_>>()
                .join(", ");

            let content = entry
                .content
                .as_ref()
                .and_then(|c| c.body.as_deref())
                .filter(|body| !body.is_empty())
                .or_else(|| entry.summary.as_ref().map(|s| s.content.as_str()))
                .unwrap_or_default();

            RawItem {
                url: resolved.unwrap_or_default(),
                title: entry
                    .title
                    .as_ref()
                    .map(|t| t.content.trim().to_string())
                    .unwrap_or_default(),
                authors,
                content: sanitize_silent(content, item_base.as_ref()),
                position,
            }
        })
        .collect();

    Ok(items)
}
