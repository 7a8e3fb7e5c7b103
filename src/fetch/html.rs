use std::collections::HashMap;

use scraper::node::Node;
use scraper::Html;
use url::Url;

use super::sanitize::{escape_attr, sanitize_plain_text, sanitize_silent, DEFAULT_ALLOWED_TAGS};
use super::url::resolve_url;
use super::ParseError;
use crate::feed::{HtmlParams, RawItem};

type NodeRef<'a> = ego_tree::NodeRef<'a, Node>;

/// Title used when an anchor yields no usable text parts.
const UNKNOWN_TITLE: &str = "Unknown title";

/// A candidate feed item extracted from an HTML page.
///
/// `parts` are relevant fragments from inside the anchors resolving to
/// `url`: trimmed text and serialized `<img>` tags, in visit order. They are
/// interpreted later to determine the item title and content.
struct CandidateItem {
    url: String,
    parts: Vec<String>,
    position: usize,
}

/// Parses an arbitrary HTML page and extracts feed items according to the
/// given scraper configuration.
///
/// Every element matching `container_tag` with exactly the attributes in
/// `container_attrs` is searched depth-first for anchors. An anchor's href
/// is resolved against `base_url` and dropped unless its prefix is allowed;
/// anchors resolving to the same URL are merged, which captures the common
/// "thumbnail and title are separate links to the same article" markup.
pub(crate) fn parse_html(data: &[u8], params: &HtmlParams) -> Result<Vec<RawItem>, ParseError> {
    let text = match &params.encoding {
        Some(label) => {
            let encoding = encoding_rs::Encoding::for_label(label.as_bytes())
                .ok_or_else(|| ParseError::UnknownEncoding(label.clone()))?;
            encoding.decode(data).0.into_owned()
        }
        None => String::from_utf8_lossy(data).into_owned(),
    };

    let doc = Html::parse_document(&text);
    let base = Url::parse(&params.base_url).ok();

    let mut containers = Vec::new();
    find_containers(doc.tree.root(), params, &mut containers);

    let mut candidates: Vec<CandidateItem> = Vec::new();
    let mut by_url: HashMap<String, usize> = HashMap::new();
    for container in containers {
        collect_anchors(container, params, base.as_ref(), &mut candidates, &mut by_url);
    }

    let items = candidates
        .into_iter()
        .map(|ci| {
            let title = ci
                .parts
                .get(params.title_pos)
                .or_else(|| ci.parts.first())
                .cloned()
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
            // Title and URL come from arbitrary page content; reduce both to
            // escaped plain text before they enter the model.
            RawItem {
                title: sanitize_plain_text(&title),
                content: sanitize_silent(&ci.parts.join("<br/>"), None),
                url: sanitize_plain_text(&ci.url),
                authors: String::new(),
                position: ci.position,
            }
        })
        .collect();

    Ok(items)
}

/// Collects every element matching the configured container tag and
/// attributes. Matched containers are not descended into, so a container
/// nested in another is only counted once.
fn find_containers<'a>(node: NodeRef<'a>, params: &HtmlParams, out: &mut Vec<NodeRef<'a>>) {
    if let Node::Element(el) = node.value() {
        if el.name() == params.container_tag && matches_attrs(node, &params.container_attrs) {
            out.push(node);
            return;
        }
    }
    for child in node.children() {
        find_containers(child, params, out);
    }
}

/// Returns true if the node is an element carrying all of the given
/// attributes with exactly the given values.
fn matches_attrs(node: NodeRef<'_>, attrs: &HashMap<String, String>) -> bool {
    let Node::Element(el) = node.value() else {
        return false;
    };
    attrs
        .iter()
        .all(|(name, value)| el.attr(name) == Some(value.as_str()))
}

/// Depth-first walk over a container, turning every anchor with a resolvable,
/// allowed href into a candidate item. Candidates for an already-seen URL are
/// merged into the existing one, keeping its first-seen position.
fn collect_anchors(
    node: NodeRef<'_>,
    params: &HtmlParams,
    base: Option<&Url>,
    candidates: &mut Vec<CandidateItem>,
    by_url: &mut HashMap<String, usize>,
) {
    if let Node::Element(el) = node.value() {
        if el.name() == "a" {
            let resolved = el
                .attr("href")
                .and_then(|href| resolve_url(href, base, Some(&params.allowed_prefixes)));
            if let Some(url) = resolved {
                let mut parts = Vec::new();
                extract_parts(node, base, &mut parts);
                match by_url.get(&url) {
                    Some(&idx) => candidates[idx].parts.extend(parts),
                    None => {
                        by_url.insert(url.clone(), candidates.len());
                        candidates.push(CandidateItem {
                            url,
                            parts,
                            position: candidates.len(),
                        });
                    }
                }
            }
        }
    }
    for child in node.children() {
        collect_anchors(child, params, base, candidates, by_url);
    }
}

/// Extracts the usable parts of an anchor subtree: trimmed text of text nodes
/// whose parent tag the sanitizer allows (which skips useless content such as
/// style or script bodies), and a serialized `<img>` for any descendant image
/// with a resolvable source. Image sources are resolved against the base but
/// not prefix-filtered.
fn extract_parts(node: NodeRef<'_>, base: Option<&Url>, parts: &mut Vec<String>) {
    match node.value() {
        Node::Element(el) if el.name() == "img" => {
            let src = el.attr("src").or_else(|| el.attr("data-src"));
            if let Some(src) = src.and_then(|src| resolve_url(src, base, None)) {
                parts.push(format!(r#"<img src="{}"/>"#, escape_attr(&src)));
            }
        }
        Node::Text(text) => {
            let parent_tag_allowed = node.parent().is_some_and(|parent| {
                matches!(parent.value(), Node::Element(el) if DEFAULT_ALLOWED_TAGS.contains(&el.name()))
            });
            if parent_tag_allowed {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
        }
        _ => {}
    }
    for child in node.children() {
        extract_parts(child, base, parts);
    }
}
