//! Priority-ranked chain of feed body parsers.

use chrono::{DateTime, Utc};
use feed_rs::parser;
use serde::Deserialize;
use tracing::{debug, info};

use crate::app::{GleanerError, Result};
use crate::dom::{absolute_url, resolve_url};
use crate::domain::{FeedItem, FeedType, NormalizedFeed};
use crate::feed::detect::detect_response;
use crate::feed::normalize::{html_to_text, normalize};
use crate::fetcher::HttpResponse;

pub trait FeedBodyParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    fn can_handle(&self, feed_type: FeedType) -> bool;

    fn parse(&self, response: &HttpResponse) -> Result<NormalizedFeed>;
}

/// RSS 0.9x/1.0/2.0, RDF and Atom via feed-rs.
pub struct XmlFeedParser;

impl FeedBodyParser for XmlFeedParser {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn priority(&self) -> i32 {
        2
    }

    fn can_handle(&self, feed_type: FeedType) -> bool {
        feed_type.is_xml()
    }

    fn parse(&self, response: &HttpResponse) -> Result<NormalizedFeed> {
        let feed = parser::parse(response.body.as_slice())
            .map_err(|e| GleanerError::FeedParse(e.to_string()))?;
        Ok(normalize(feed, &response.url))
    }
}

#[derive(Debug, Deserialize)]
struct JsonFeedDocument {
    title: Option<String>,
    description: Option<String>,
    home_page_url: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

/// A JSON Feed document or a bare array of its items.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonFeedBody {
    Document(JsonFeedDocument),
    Items(Vec<JsonFeedItem>),
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    id: Option<serde_json::Value>,
    url: Option<String>,
    external_url: Option<String>,
    title: Option<String>,
    content_html: Option<String>,
    content_text: Option<String>,
    summary: Option<String>,
    image: Option<String>,
    date_published: Option<DateTime<Utc>>,
    date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<String>,
}

/// JSON Feed 1.0/1.1.
pub struct JsonFeedParser;

impl JsonFeedParser {
    fn to_item(item: JsonFeedItem, feed_url: &str) -> Option<FeedItem> {
        let id = item.id.as_ref().and_then(|v| v.as_str()).map(String::from);
        let url = [item.url.as_deref(), item.external_url.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|candidate| resolve_url(feed_url, candidate))
            .or_else(|| id.as_deref().and_then(absolute_url))?;

        let content_text = item
            .content_text
            .clone()
            .or(item.summary.clone())
            .or_else(|| item.content_html.as_deref().map(html_to_text))
            .filter(|t| !t.trim().is_empty());

        let (content_raw, content_raw_mime) = match (item.content_html, item.content_text) {
            (Some(html), _) => (Some(html), Some("text/html".to_string())),
            (None, Some(text)) => (Some(text), Some("text/plain".to_string())),
            (None, None) => (None, None),
        };

        Some(FeedItem {
            url,
            title: item.title,
            content_text,
            content_raw,
            content_raw_mime,
            image_url: item.image,
            published_at: item.date_published.or(item.date_modified),
            tags: item.tags,
        })
    }
}

impl FeedBodyParser for JsonFeedParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn priority(&self) -> i32 {
        1
    }

    fn can_handle(&self, feed_type: FeedType) -> bool {
        feed_type == FeedType::Json
    }

    fn parse(&self, response: &HttpResponse) -> Result<NormalizedFeed> {
        let body: JsonFeedBody = serde_json::from_slice(&response.body)
            .map_err(|e| GleanerError::FeedParse(format!("invalid JSON feed: {}", e)))?;
        let document = match body {
            JsonFeedBody::Document(document) => document,
            JsonFeedBody::Items(items) => JsonFeedDocument {
                title: None,
                description: None,
                home_page_url: None,
                items,
            },
        };

        let items = document
            .items
            .into_iter()
            .filter_map(|item| Self::to_item(item, &response.url))
            .collect();

        Ok(NormalizedFeed {
            title: document.title,
            description: document.description,
            feed_url: response.url.clone(),
            website_url: document.home_page_url,
            published_at: None,
            items,
            links: Vec::new(),
        })
    }
}

/// Terminal fallback: handles everything and yields an empty feed.
pub struct NullFeedParser;

impl FeedBodyParser for NullFeedParser {
    fn name(&self) -> &'static str {
        "null"
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn can_handle(&self, _feed_type: FeedType) -> bool {
        true
    }

    fn parse(&self, response: &HttpResponse) -> Result<NormalizedFeed> {
        Ok(NormalizedFeed::empty(&response.url))
    }
}

pub struct FeedParserChain {
    parsers: Vec<Box<dyn FeedBodyParser>>,
}

impl Default for FeedParserChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(XmlFeedParser),
            Box::new(JsonFeedParser),
            Box::new(NullFeedParser),
        ])
    }
}

impl FeedParserChain {
    pub fn new(mut parsers: Vec<Box<dyn FeedBodyParser>>) -> Self {
        parsers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        debug!(
            parsers = %parsers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", "),
            "Feed parser chain"
        );
        Self { parsers }
    }

    pub fn parser_names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    /// Runs the first parser that claims the detected type. Its error is returned as-is.
    pub fn parse(&self, corr_id: &str, response: &HttpResponse) -> Result<NormalizedFeed> {
        let feed_type = detect_response(response);
        self.parse_as(corr_id, feed_type, response)
    }

    pub fn parse_as(
        &self,
        corr_id: &str,
        feed_type: FeedType,
        response: &HttpResponse,
    ) -> Result<NormalizedFeed> {
        let parser = self
            .parsers
            .iter()
            .find(|p| p.can_handle(feed_type))
            .ok_or_else(|| GleanerError::FeedParse(format!("no parser for {:?}", feed_type)))?;

        debug!(corr_id, parser = parser.name(), feed_type = feed_type.as_str(), url = %response.url, "Parsing feed");
        parser.parse(response).map_err(|e| {
            info!(corr_id, parser = parser.name(), url = %response.url, "Feed parser failed: {}", e);
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response(content_type: &str, body: &str) -> HttpResponse {
        HttpResponse {
            url: "https://example.com/feed".into(),
            status: 200,
            content_type: Some(content_type.into()),
            body: body.as_bytes().to_vec(),
            cache_key: String::new(),
            elapsed: Duration::ZERO,
        }
    }

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title><description>D</description>
<item><title>One</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    const JSON_FEED: &str = r#"{
  "version": "https://jsonfeed.org/version/1.1",
  "title": "JSON Blog",
  "home_page_url": "https://example.com/",
  "items": [
    {"id": "1", "url": "https://example.com/posts/1", "title": "First", "content_html": "<p>Hi</p>", "date_published": "2024-02-01T10:00:00Z", "tags": ["a"]},
    {"id": "https://example.com/posts/2", "content_text": "Plain"},
    {"id": "3"}
  ]
}"#;

    #[test]
    fn test_chain_sorted_by_priority() {
        let chain = FeedParserChain::new(vec![
            Box::new(NullFeedParser),
            Box::new(JsonFeedParser),
            Box::new(XmlFeedParser),
        ]);
        assert_eq!(chain.parser_names(), vec!["xml", "json", "null"]);
    }

    #[test]
    fn test_xml_parser_handles_rss() {
        let chain = FeedParserChain::default();
        let feed = chain.parse("t", &response("application/rss+xml", RSS)).unwrap();
        assert_eq!(feed.title.as_deref(), Some("T"));
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].url, "https://example.com/1");
    }

    #[test]
    fn test_json_parser_handles_json_feed() {
        let chain = FeedParserChain::default();
        let feed = chain.parse("t", &response("application/feed+json", JSON_FEED)).unwrap();
        assert_eq!(feed.title.as_deref(), Some("JSON Blog"));
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].content_text.as_deref(), Some("Hi"));
        assert_eq!(feed.items[0].content_raw_mime.as_deref(), Some("text/html"));
        assert!(feed.items[0].published_at.is_some());
        assert_eq!(feed.items[1].url, "https://example.com/posts/2");
        assert_eq!(feed.items[1].content_raw_mime.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_json_parser_handles_item_array() {
        let chain = FeedParserChain::default();
        let body = r#"[{"url": "/posts/9", "content_text": "Bare", "date_published": "2024-03-01T00:00:00Z"}]"#;
        let feed = chain.parse("t", &response("application/json", body)).unwrap();
        assert!(feed.title.is_none());
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].url, "https://example.com/posts/9");
        assert_eq!(feed.items[0].content_text.as_deref(), Some("Bare"));
    }

    #[test]
    fn test_null_parser_yields_empty_feed_for_html() {
        let chain = FeedParserChain::default();
        let feed = chain
            .parse("t", &response("text/html", "<html><body>hi</body></html>"))
            .unwrap();
        assert!(feed.is_empty());
        assert_eq!(feed.feed_url, "https://example.com/feed");
    }

    #[test]
    fn test_claiming_parser_failure_is_returned() {
        let chain = FeedParserChain::default();
        let err = chain
            .parse("t", &response("application/rss+xml", "this is not xml"))
            .unwrap_err();
        assert!(matches!(err, GleanerError::FeedParse(_)));
    }
}
