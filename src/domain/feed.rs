use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Syndication format of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Rss,
    Atom,
    Rdf,
    Json,
    None,
}

impl FeedType {
    /// Maps a dedicated feed MIME type. Generic types like `text/xml` map to `None`.
    pub fn from_mime(mime: &str) -> FeedType {
        let mime = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        match mime.as_str() {
            "application/rss+xml" | "application/rss" => FeedType::Rss,
            "application/atom+xml" | "application/atom" => FeedType::Atom,
            "application/rdf+xml" | "application/rdf" => FeedType::Rdf,
            "application/feed+json" | "application/json+feed" => FeedType::Json,
            _ => FeedType::None,
        }
    }

    pub fn is_feed(&self) -> bool {
        !matches!(self, FeedType::None)
    }

    pub fn is_xml(&self) -> bool {
        matches!(self, FeedType::Rss | FeedType::Atom | FeedType::Rdf)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Rss => "rss",
            FeedType::Atom => "atom",
            FeedType::Rdf => "rdf",
            FeedType::Json => "json",
            FeedType::None => "none",
        }
    }

    pub fn mime(&self) -> Option<&'static str> {
        match self {
            FeedType::Rss => Some("application/rss+xml"),
            FeedType::Atom => Some("application/atom+xml"),
            FeedType::Rdf => Some("application/rdf+xml"),
            FeedType::Json => Some("application/feed+json"),
            FeedType::None => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub url: String,
    pub title: Option<String>,
    pub content_text: Option<String>,
    pub content_raw: Option<String>,
    pub content_raw_mime: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl FeedItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}

/// Common shape every parser and extractor produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub feed_url: String,
    pub website_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub items: Vec<FeedItem>,
    /// Follow-on pages, e.g. pagination.
    #[serde(default)]
    pub links: Vec<String>,
}

impl NormalizedFeed {
    pub fn empty(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Feed advertised by the page itself via `<link rel="alternate">`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeFeed {
    pub url: String,
    pub feed_type: FeedType,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Repeating-element pattern that turns an HTML page into a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericFeedRule {
    /// Absolute XPath selecting one node per item.
    pub context_xpath: String,
    /// Relative to the context node.
    pub link_xpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination_xpath: Option<String>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub score: f64,
}

impl GenericFeedRule {
    pub fn depth(&self) -> usize {
        self.context_xpath
            .split('/')
            .filter(|step| !step.is_empty())
            .count()
    }
}

/// Either discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedCandidate {
    Native(NativeFeed),
    Generic(GenericFeedRule),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_type_from_mime() {
        assert_eq!(FeedType::from_mime("application/rss+xml"), FeedType::Rss);
        assert_eq!(
            FeedType::from_mime("application/atom+xml; charset=utf-8"),
            FeedType::Atom
        );
        assert_eq!(FeedType::from_mime("APPLICATION/FEED+JSON"), FeedType::Json);
        assert_eq!(FeedType::from_mime("text/xml"), FeedType::None);
        assert_eq!(FeedType::from_mime("text/html"), FeedType::None);
    }

    #[test]
    fn test_rule_depth() {
        let rule = GenericFeedRule {
            context_xpath: "//body/div[2]/ul/li".into(),
            link_xpath: "./a".into(),
            date_xpath: None,
            pagination_xpath: None,
            count: 3,
            score: 1.0,
        };
        assert_eq!(rule.depth(), 4);
    }

    #[test]
    fn test_display_title_fallback() {
        let item = FeedItem::new("https://example.com/a");
        assert_eq!(item.display_title(), "(Untitled)");
    }
}
