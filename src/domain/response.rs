use serde::{Deserialize, Serialize};

use crate::domain::{EmitType, FragmentSpec, GenericFeedRule, NativeFeed};

/// Main content of a page as found by the readability extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedArticle {
    pub url: String,
    pub title: Option<String>,
    /// Cleaned HTML of the main content.
    pub content: String,
    pub content_text: String,
    pub content_mime: String,
    pub image_url: Option<String>,
    pub favicon_url: Option<String>,
    pub published: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedFeeds {
    pub native_feeds: Vec<NativeFeed>,
    pub generic_feeds: Vec<GenericFeedRule>,
}

/// One typed payload of a scraped fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EmittedData {
    Markup(String),
    Text(String),
    /// PNG bytes.
    Pixel(Vec<u8>),
    Feeds(ScrapedFeeds),
    Readability(ExtractedArticle),
}

impl EmittedData {
    pub fn emit_type(&self) -> EmitType {
        match self {
            EmittedData::Markup(_) => EmitType::Markup,
            EmittedData::Text(_) => EmitType::Text,
            EmittedData::Pixel(_) => EmitType::Pixel,
            EmittedData::Feeds(_) => EmitType::Feeds,
            EmittedData::Readability(_) => EmitType::Readability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedElement {
    pub fragment: FragmentSpec,
    pub data: Vec<EmittedData>,
}

impl ScrapedElement {
    pub fn markup(&self) -> Option<&str> {
        self.data.iter().find_map(|d| match d {
            EmittedData::Markup(markup) => Some(markup.as_str()),
            _ => None,
        })
    }

    pub fn text(&self) -> Option<&str> {
        self.data.iter().find_map(|d| match d {
            EmittedData::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn pixel(&self) -> Option<&[u8]> {
        self.data.iter().find_map(|d| match d {
            EmittedData::Pixel(bytes) => Some(bytes.as_slice()),
            _ => None,
        })
    }

    pub fn feeds(&self) -> Option<&ScrapedFeeds> {
        self.data.iter().find_map(|d| match d {
            EmittedData::Feeds(feeds) => Some(feeds),
            _ => None,
        })
    }

    pub fn readability(&self) -> Option<&ExtractedArticle> {
        self.data.iter().find_map(|d| match d {
            EmittedData::Readability(article) => Some(article),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeMetrics {
    pub queue_ms: u64,
    pub render_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeDebug {
    pub corr_id: String,
    pub content_type: Option<String>,
    pub status_code: Option<u16>,
    pub html: Option<String>,
    pub console: Vec<String>,
    pub cookies: Vec<String>,
    pub network: Vec<String>,
    pub metrics: ScrapeMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub url: String,
    pub failed: bool,
    pub error_message: Option<String>,
    pub elements: Vec<ScrapedElement>,
    pub debug: ScrapeDebug,
}

impl ScrapeResponse {
    pub fn failed(url: &str, message: impl Into<String>, debug: ScrapeDebug) -> Self {
        Self {
            url: url.to_string(),
            failed: true,
            error_message: Some(message.into()),
            elements: Vec::new(),
            debug,
        }
    }

    /// Element whose fragment is closest to the document root.
    pub fn root_element(&self) -> Option<&ScrapedElement> {
        self.elements
            .iter()
            .filter(|e| e.fragment.xpath.is_some())
            .min_by_key(|e| e.fragment.xpath.as_deref().map(str::len).unwrap_or(usize::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_element_prefers_shortest_xpath() {
        let response = ScrapeResponse {
            url: "https://example.com".into(),
            failed: false,
            error_message: None,
            elements: vec![
                ScrapedElement {
                    fragment: FragmentSpec::xpath("//h1"),
                    data: vec![EmittedData::Text("Hello".into())],
                },
                ScrapedElement {
                    fragment: FragmentSpec::root(),
                    data: vec![EmittedData::Markup("<html></html>".into())],
                },
            ],
            debug: ScrapeDebug::default(),
        };
        let root = response.root_element().unwrap();
        assert_eq!(root.markup(), Some("<html></html>"));
        assert_eq!(response.elements[0].text(), Some("Hello"));
    }

    #[test]
    fn test_failed_response_has_no_elements() {
        let response = ScrapeResponse::failed("https://example.com", "boom", ScrapeDebug::default());
        assert!(response.failed);
        assert!(response.elements.is_empty());
        assert_eq!(response.error_message.as_deref(), Some("boom"));
    }
}
