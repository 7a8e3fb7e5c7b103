use url::Url;

/// Parses `input` and returns it only if it is a valid absolute URL.
pub(crate) fn absolute_url(input: &str) -> Option<Url> {
    Url::parse(input).ok()
}

/// Resolves `u` against `base` and returns the resolved URL as a string.
///
/// If `u` is absolute it passes through unchanged; if it is relative it is
/// joined to `base`, and `None` is returned when there is no base to join
/// against or the join fails. When `allowed_prefixes` is given, the resolved
/// URL is returned only if it starts with one of the prefixes.
pub(crate) fn resolve_url(
    u: &str,
    base: Option<&Url>,
    allowed_prefixes: Option<&[String]>,
) -> Option<String> {
    if u.is_empty() {
        return None;
    }

    let resolved = match Url::parse(u) {
        Ok(parsed) => parsed.to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(u).ok()?.to_string(),
        Err(_) => return None,
    };

    match allowed_prefixes {
        None => Some(resolved),
        Some(prefixes) if prefixes.iter().any(|p| resolved.starts_with(p.as_str())) => {
            Some(resolved)
        }
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_pass_through() {
        let base = absolute_url("https://example.com/section/");
        assert_eq!(
            resolve_url("https://other.org/a", base.as_ref(), None),
            Some("https://other.org/a".to_string())
        );
    }

    #[test]
    fn relative_urls_resolve_against_base() {
        let base = absolute_url("https://example.com/section/");
        assert_eq!(
            resolve_url("post/1", base.as_ref(), None),
            Some("https://example.com/section/post/1".to_string())
        );
        assert_eq!(
            resolve_url("/post/1", base.as_ref(), None),
            Some("https://example.com/post/1".to_string())
        );
    }

    #[test]
    fn relative_url_without_base_is_dropped() {
        assert_eq!(resolve_url("post/1", None, None), None);
    }

    #[test]
    fn empty_url_is_dropped() {
        let base = absolute_url("https://example.com/");
        assert_eq!(resolve_url("", base.as_ref(), None), None);
    }

    #[test]
    fn prefix_filter_applies_after_resolution() {
        let base = absolute_url("https://example.com/");
        let allowed = vec!["https://example.com/post/".to_string()];
        assert_eq!(
            resolve_url("/post/1", base.as_ref(), Some(&allowed)),
            Some("https://example.com/post/1".to_string())
        );
        assert_eq!(
            resolve_url("/about", base.as_ref(), Some(&allowed)),
            None
        );
        assert_eq!(
            resolve_url("https://evil.example.org/post/1", base.as_ref(), Some(&allowed)),
            None
        );
    }

    #[test]
    fn absolute_url_rejects_relative_input() {
        assert!(absolute_url("/relative/path").is_none());
        assert!(absolute_url("https://example.com/x").is_some());
    }
}
