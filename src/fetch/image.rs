use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use sha2::{Digest, Sha256};

use super::sanitize::{escape_attr, sanitize_silent};
use super::ParseError;
use crate::feed::{ImageParams, RawItem};

/// Turns a fetched image into a single raw item. This is meant for images
/// hosted at a fixed URL that get updated in place.
///
/// The item URL is the configured URL with the SHA-256 digest of the raw
/// bytes appended as a fragment, so item identity changes exactly when the
/// image content changes. The title carries the fetch time, so it visibly
/// changes on every fetch. The content embeds the bytes as a base64 data
/// URL, making the item self-contained.
pub(crate) fn parse_image(data: &[u8], params: &ImageParams) -> Result<Vec<RawItem>, ParseError> {
    let date = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let title = format!("{} - {}", params.title, date);

    let src = format!("data:{};base64,{}", params.mime_type, STANDARD.encode(data));
    // No base URL needed: the content is a single img with a data URL.
    let content = sanitize_silent(&format!(r#"<img src="{}"/>"#, escape_attr(&src)), None);

    let hash = format!("{:x}", Sha256::digest(data));
    Ok(vec![RawItem {
        url: format!("{}#{}", params.url, hash),
        title,
        authors: String::new(),
        content,
        position: 0,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> ImageParams {
        ImageParams {
            mime_type: "image/png".to_string(),
            url: "https://example.com/cam.png".to_string(),
            title: "Cam".to_string(),
            max_items: None,
        }
    }

    #[test]
    fn produces_exactly_one_item() {
        let items = parse_image(b"pretend-png-bytes", &params()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].position, 0);
        assert!(items[0].title.starts_with("Cam - "));
        assert!(items[0].title.ends_with(" UTC"));
    }

    #[test]
    fn identity_changes_exactly_when_bytes_change() {
        let a1 = parse_image(b"image-a", &params()).unwrap();
        let a2 = parse_image(b"image-a", &params()).unwrap();
        let b = parse_image(b"image-b", &params()).unwrap();

        assert_eq!(a1[0].url, a2[0].url);
        assert_ne!(a1[0].url, b[0].url);
        assert!(a1[0].url.starts_with("https://example.com/cam.png#"));
    }

    #[test]
    fn content_embeds_the_bytes_as_a_data_url() {
        let items = parse_image(b"pretend-png-bytes", &params()).unwrap();
        let encoded = STANDARD.encode(b"pretend-png-bytes");
        assert_eq!(
            items[0].content,
            format!(r#"<img src="data:image/png;base64,{encoded}"/>"#)
        );
    }
}
