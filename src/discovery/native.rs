use std::collections::HashSet;

use scraper::{Html, Selector};

use crate::dom::{collapse_whitespace, resolve_url};
use crate::domain::{FeedType, NativeFeed};

/// `<link rel="alternate" type="...">` tags with a feed MIME type, in document order.
pub fn locate_native_feeds(document: &Html, base_url: &str) -> Vec<NativeFeed> {
    let Ok(selector) = Selector::parse("link[rel][type][href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut feeds = Vec::new();
    for link in document.select(&selector) {
        let element = link.value();
        let is_alternate = element
            .attr("rel")
            .map(|rel| {
                rel.split_whitespace()
                    .any(|token| token.eq_ignore_ascii_case("alternate"))
            })
            .unwrap_or(false);
        if !is_alternate {
            continue;
        }

        let feed_type = element.attr("type").map(FeedType::from_mime).unwrap_or(FeedType::None);
        if !feed_type.is_feed() {
            continue;
        }

        let Some(url) = element.attr("href").and_then(|href| resolve_url(base_url, href)) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        feeds.push(NativeFeed {
            url,
            feed_type,
            title: element
                .attr("title")
                .map(collapse_whitespace)
                .filter(|t| !t.is_empty()),
            description: None,
        });
    }
    feeds
}
