use scraper::node::Node;
use scraper::Html;
use url::Url;

type NodeRef<'a> = ego_tree::NodeRef<'a, Node>;

/// Tags kept by the default sanitizer configuration.
pub(crate) const DEFAULT_ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "blockquote", "br", "code", "del", "div", "em", "figure",
    "figcaption", "h1", "h2", "h3", "h4", "h5", "h6", "i", "img", "ins", "li", "ol", "p", "pre",
    "s", "span", "strike", "strong", "u", "ul",
];

/// Attributes kept per tag by the default sanitizer configuration.
const DEFAULT_ALLOWED_ATTRS: &[(&str, &[&str])] = &[
    ("a", &["href", "title"]),
    ("abbr", &["title"]),
    ("acronym", &["title"]),
    ("img", &["alt", "src"]),
];

// Void elements in the allowed tag set, serialized without a closing tag.
const VOID_TAGS: &[&str] = &["br", "img"];

/// Sanitizes the input HTML with the default allow-lists, resolving relative
/// `href`/`src` URLs against `base_url` when given. This is the convenience
/// wrapper used by all parsers.
pub(crate) fn sanitize_silent(input: &str, base_url: Option<&Url>) -> String {
    sanitize_html(input, DEFAULT_ALLOWED_TAGS, DEFAULT_ALLOWED_ATTRS, base_url)
}

/// Reduces the input to escaped plain text: no tag survives, only text
/// sitting directly under the implicit body. Used for scraped fields that
/// must never carry markup, such as item titles.
pub(crate) fn sanitize_plain_text(input: &str) -> String {
    sanitize_html(input, &[], &[], None)
}

/// Rewrites an untrusted HTML fragment into a safe subset by structural copy:
/// an element is kept only if its tag is in `allowed_tags`, and kept elements
/// carry only the attributes listed for their tag in `allowed_attrs`.
///
/// Text nodes are kept only when their direct parent is an allowed tag or the
/// implicit document body, so text inside a disallowed or unknown tag - and
/// everything below that tag, including nested scripts - is discarded
/// entirely. This is the primary XSS defense.
///
/// `href` and `src` values are resolved against `base_url` when relative;
/// an unresolvable or invalid URL drops the attribute, not the element.
pub(crate) fn sanitize_html(
    input: &str,
    allowed_tags: &[&str],
    allowed_attrs: &[(&str, &[&str])],
    base_url: Option<&Url>,
) -> String {
    let doc = Html::parse_document(input);
    let mut out = String::with_capacity(input.len());
    sanitize_node(
        doc.tree.root(),
        &mut out,
        allowed_tags,
        allowed_attrs,
        base_url,
    );
    out.trim().to_string()
}

fn sanitize_node(
    node: NodeRef<'_>,
    out: &mut String,
    allowed_tags: &[&str],
    allowed_attrs: &[(&str, &[&str])],
    base_url: Option<&Url>,
) {
    match node.value() {
        Node::Document | Node::Fragment => {
            for child in node.children() {
                sanitize_node(child, out, allowed_tags, allowed_attrs, base_url);
            }
        }
        Node::Element(el) => {
            let tag = el.name();
            if allowed_tags.contains(&tag) {
                out.push('<');
                out.push_str(tag);
                for (name, value) in el.attrs() {
                    if !attr_allowed(allowed_attrs, tag, name) {
                        continue;
                    }
                    let value = if name == "href" || name == "src" {
                        match resolve_attr_url(value, base_url) {
                            Some(resolved) => resolved,
                            None => continue,
                        }
                    } else {
                        value.to_string()
                    };
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(&value));
                    out.push('"');
                }
                if VOID_TAGS.contains(&tag) {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in node.children() {
                    sanitize_node(child, out, allowed_tags, allowed_attrs, base_url);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            } else if tag == "html" || tag == "body" {
                // Structural elements introduced by the document parse:
                // descend without emitting anything.
                for child in node.children() {
                    sanitize_node(child, out, allowed_tags, allowed_attrs, base_url);
                }
            }
            // Any other element is dropped along with its whole subtree.
        }
        Node::Text(text) => {
            if text_parent_allowed(&node, allowed_tags) {
                out.push_str(&escape_text(&text));
            }
        }
        _ => {}
    }
}

fn text_parent_allowed(node: &NodeRef<'_>, allowed_tags: &[&str]) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.value() {
        Node::Element(el) => allowed_tags.contains(&el.name()) || el.name() == "body",
        _ => false,
    }
}

fn attr_allowed(allowed_attrs: &[(&str, &[&str])], tag: &str, attr: &str) -> bool {
    allowed_attrs
        .iter()
        .find(|(t, _)| *t == tag)
        .is_some_and(|(_, attrs)| attrs.contains(&attr))
}

/// Resolves an href/src attribute value for embedding. Absolute URLs pass
/// through unchanged; relative ones are joined to the base when present and
/// kept as-is when there is none. `None` means the attribute must be dropped.
fn resolve_attr_url(value: &str, base_url: Option<&Url>) -> Option<String> {
    match Url::parse(value) {
        Ok(_) => Some(value.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base_url {
            Some(base) => base.join(value).ok().map(|u| u.to_string()),
            None => Some(value.to_string()),
        },
        Err(_) => None,
    }
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub(crate) fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
