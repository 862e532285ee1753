//! Classifies a response body as one of the known syndication formats.

use crate::domain::FeedType;
use crate::fetcher::{mime_of, HttpResponse};

/// Content types that say nothing about the payload beyond "some XML/JSON/text".
const GENERIC_TYPES: &[&str] = &[
    "text/xml",
    "application/xml",
    "text/plain",
    "application/json",
    "application/octet-stream",
    "text/html",
];

const SNIFF_WINDOW: usize = 2048;

pub fn detect_response(response: &HttpResponse) -> FeedType {
    detect(response.content_type.as_deref(), &response.body)
}

/// Trusts a dedicated feed MIME type; otherwise sniffs the first body bytes
/// when the header is absent or generic.
pub fn detect(content_type: Option<&str>, body: &[u8]) -> FeedType {
    let declared = content_type.map(FeedType::from_mime).unwrap_or(FeedType::None);
    if declared.is_feed() {
        return declared;
    }

    match content_type.map(mime_of) {
        None => sniff(body),
        Some(mime) if GENERIC_TYPES.contains(&mime.as_str()) => sniff(body),
        Some(_) => FeedType::None,
    }
}

pub fn sniff(body: &[u8]) -> FeedType {
    let window = &body[..body.len().min(SNIFF_WINDOW)];
    let text = String::from_utf8_lossy(window);
    let text = text.trim_start_matches('\u{feff}').trim_start();

    if text.starts_with('<') {
        return root_element(text)
            .map(|name| match name.to_lowercase().as_str() {
                "rss" => FeedType::Rss,
                "feed" => FeedType::Atom,
                "rdf:rdf" | "rdf" => FeedType::Rdf,
                _ => FeedType::None,
            })
            .unwrap_or(FeedType::None);
    }

    if text.starts_with('{') && (text.contains("jsonfeed.org/version") || text.contains("\"items\"")) {
        return FeedType::Json;
    }

    // A bare array of JSON Feed items.
    if text.starts_with('[')
        && text.contains("\"url\"")
        && ["\"date_published\"", "\"content_html\"", "\"content_text\""]
            .iter()
            .any(|key| text.contains(key))
    {
        return FeedType::Json;
    }

    FeedType::None
}

/// Name of the first element, skipping the XML prolog, comments and doctype.
fn root_element(text: &str) -> Option<&str> {
    let mut rest = text;
    loop {
        let start = rest.find('<')?;
        rest = &rest[start..];
        if rest.starts_with("<?") {
            rest = &rest[rest.find("?>")? + 2..];
        } else if rest.starts_with("<!--") {
            rest = &rest[rest.find("-->")? + 3..];
        } else if rest.starts_with("<!") {
            rest = &rest[rest.find('>')? + 1..];
        } else {
            let name_end = rest[1..]
                .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .map(|i| i + 1)
                .unwrap_or(rest.len());
            return Some(&rest[1..name_end]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?><rss version="2.0"><channel></channel></rss>"#;
    const ATOM: &str = r#"<?xml version="1.0"?>
<!-- generated -->
<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;
    const RDF: &str = r#"<?xml version="1.0"?><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"></rdf:RDF>"#;
    const JSON_FEED: &str = r#"{"version": "https://jsonfeed.org/version/1.1", "title": "x", "items": []}"#;

    #[test]
    fn test_dedicated_content_type_wins() {
        assert_eq!(detect(Some("application/rss+xml"), b"garbage"), FeedType::Rss);
        assert_eq!(detect(Some("application/atom+xml"), b""), FeedType::Atom);
        assert_eq!(detect(Some("application/feed+json"), b""), FeedType::Json);
    }

    #[test]
    fn test_generic_content_type_sniffs_body() {
        assert_eq!(detect(Some("text/xml; charset=utf-8"), RSS.as_bytes()), FeedType::Rss);
        assert_eq!(detect(Some("application/xml"), ATOM.as_bytes()), FeedType::Atom);
        assert_eq!(detect(Some("application/xml"), RDF.as_bytes()), FeedType::Rdf);
        assert_eq!(detect(Some("application/json"), JSON_FEED.as_bytes()), FeedType::Json);
        assert_eq!(detect(None, RSS.as_bytes()), FeedType::Rss);
    }

    #[test]
    fn test_html_is_not_a_feed() {
        let html = b"<!DOCTYPE html><html><body><h1>Hello</h1></body></html>";
        assert_eq!(detect(Some("text/html"), html), FeedType::None);
        assert_eq!(detect(None, html), FeedType::None);
    }

    #[test]
    fn test_specific_non_feed_type_is_not_sniffed() {
        assert_eq!(detect(Some("application/pdf"), RSS.as_bytes()), FeedType::None);
    }

    #[test]
    fn test_sniff_skips_bom_and_whitespace() {
        let body = format!("\u{feff}\n   {}", RSS);
        assert_eq!(sniff(body.as_bytes()), FeedType::Rss);
    }

    #[test]
    fn test_plain_json_is_not_a_feed() {
        assert_eq!(sniff(br#"{"hello": "world"}"#), FeedType::None);
        assert_eq!(sniff(b"[1, 2, 3]"), FeedType::None);
    }

    #[test]
    fn test_item_array_is_a_json_feed() {
        let body = br#"  [{"url": "https://example.com/a", "content_text": "hi"}]"#;
        assert_eq!(sniff(body), FeedType::Json);
        assert_eq!(detect(Some("application/json"), body), FeedType::Json);
    }
}
