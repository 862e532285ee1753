use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::app::{child_corr_id, Result};
use crate::domain::{Document, NormalizedFeed, ScrapeRequest};
use crate::plugins::filter::keeps_all;
use crate::plugins::tag::apply_tags;
use crate::plugins::{
    CompositeFilter, ConditionalTag, FeedPlugin, FragmentTransformPlugin, PluginContext,
};
use crate::scrape::ScrapeEngine;

const PREVIEW_REPOSITORY: &str = "preview";

/// Synchronous feed entry points used by the CLI.
pub struct FeedService {
    engine: Arc<ScrapeEngine>,
}

impl FeedService {
    pub fn new(engine: Arc<ScrapeEngine>) -> Self {
        Self { engine }
    }

    /// Guarded GET of `url`, parsed by the first capable feed parser.
    pub async fn parse_feed_from_url(&self, corr_id: &str, url: &str) -> Result<NormalizedFeed> {
        info!(corr_id, url, "Parsing feed from url");
        let options = self.engine.fetch_options(None);
        let branch = child_corr_id(corr_id);
        info!(corr_id = %branch, url, "GET");
        let response = self.engine.fetcher().fetch(url, &options).await?;
        self.engine.parsers().parse(&branch, &response)
    }

    /// Scrapes every request, turns the pages into items and applies `filters` and `tags`.
    ///
    /// Items are indexed across all requests in order, which is what the filter `index`
    /// field sees.
    pub async fn parse_feed_from_request(
        &self,
        corr_id: &str,
        owner: Option<&str>,
        requests: &[ScrapeRequest],
        filters: &[CompositeFilter],
        tags: &[ConditionalTag],
    ) -> Result<NormalizedFeed> {
        let responses = self.engine.scrape_all(corr_id, owner, requests).await?;

        let ctx = PluginContext {
            corr_id,
            owner,
            engine: &self.engine,
            index: 0,
        };
        let mut items = Vec::new();
        for response in &responses {
            let output = FeedPlugin.transform(&ctx, response, &serde_json::Value::Null)?;
            items.extend(output.items);
        }

        let mut kept = Vec::with_capacity(items.len());
        for (index, mut item) in items.into_iter().enumerate() {
            let mut document = Document::from_item(PREVIEW_REPOSITORY, &item);
            if !keeps_all(filters, &document, index)? {
                continue;
            }
            apply_tags(tags, &mut document, index)?;
            item.tags = document.tags;
            kept.push(item);
        }

        Ok(NormalizedFeed {
            title: Some("Preview Feed".to_string()),
            published_at: Some(Utc::now()),
            items: kept,
            ..NormalizedFeed::empty("")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::EntitlementsConfig;
    use crate::fetcher::{FetchConfig, HttpFetcher};
    use crate::plugins::testing::Offline;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Blog</title>
<item><title>Rust 1.80</title><link>https://example.com/rust</link><description>Release</description></item>
<item><title>Gardening</title><link>https://example.com/garden</link><description>Plants</description></item>
<item><title>Rust tips</title><link>https://example.com/tips</link><description>Tips</description></item>
</channel></rss>"#;

    async fn service_with_feed() -> (MockServer, FeedService) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(RSS, "application/rss+xml"))
            .mount(&server)
            .await;

        let config = FetchConfig::default();
        let engine = ScrapeEngine::new(
            Arc::new(HttpFetcher::new(&config).unwrap()),
            Arc::new(Offline),
            Arc::new(EntitlementsConfig::default()),
            config,
        );
        (server, FeedService::new(Arc::new(engine)))
    }

    #[tokio::test]
    async fn test_parse_feed_from_url() {
        let (server, service) = service_with_feed().await;
        let feed = service
            .parse_feed_from_url("t", &format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();
        assert_eq!(feed.title.as_deref(), Some("Blog"));
        assert_eq!(feed.items.len(), 3);
    }

    #[tokio::test]
    async fn test_preview_feed_applies_filters_and_tags() {
        let (server, service) = service_with_feed().await;
        let requests = vec![ScrapeRequest::new(format!("{}/feed.xml", server.uri()))];
        let filters: Vec<CompositeFilter> = serde_json::from_value(json!([
            { "include": { "title": { "operator": "contains", "value": "rust" } } }
        ]))
        .unwrap();
        let tags: Vec<ConditionalTag> = serde_json::from_value(json!([
            { "tag": "first", "filter": { "index": { "operator": "eq", "value": 0 } } }
        ]))
        .unwrap();

        let feed = service
            .parse_feed_from_request("t", None, &requests, &filters, &tags)
            .await
            .unwrap();

        assert_eq!(feed.title.as_deref(), Some("Preview Feed"));
        assert_eq!(feed.feed_url, "");
        let urls: Vec<_> = feed.items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/rust", "https://example.com/tips"]);
        assert_eq!(feed.items[0].tags, vec!["first".to_string()]);
        assert!(feed.items[1].tags.is_empty());
    }
}
