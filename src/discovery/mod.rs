//! Feed discovery: native `<link>` tags and generic repeating-element rules.

pub mod generic;
pub mod native;

use scraper::Html;

use crate::domain::{FeedCandidate, ScrapedFeeds};

pub use generic::{extract_feed, parse_date, GenericFeedLocator, GenericFeedOptions};
pub use native::locate_native_feeds;

/// Pure function of the document; performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct FeedDiscoveryLocator {
    generic: GenericFeedLocator,
}

impl FeedDiscoveryLocator {
    pub fn new(options: GenericFeedOptions) -> Self {
        Self {
            generic: GenericFeedLocator::new(options),
        }
    }

    pub fn locate_in(&self, document: &Html, base_url: &str) -> ScrapedFeeds {
        ScrapedFeeds {
            native_feeds: locate_native_feeds(document, base_url),
            generic_feeds: self.generic.locate(document),
        }
    }

    pub fn locate(&self, html: &str, base_url: &str) -> ScrapedFeeds {
        self.locate_in(&Html::parse_document(html), base_url)
    }

    /// Native candidates first, then generic rules by score.
    pub fn candidates(&self, html: &str, base_url: &str) -> Vec<FeedCandidate> {
        let feeds = self.locate(html, base_url);
        feeds
            .native_feeds
            .into_iter()
            .map(FeedCandidate::Native)
            .chain(feeds.generic_feeds.into_iter().map(FeedCandidate::Generic))
            .collect()
    }
}
