use scraper::Html;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::{GleanerError, Result};
use crate::discovery::extract_feed;
use crate::domain::{FeedType, GenericFeedRule, NormalizedFeed, ScrapeResponse};
use crate::feed::detect;
use crate::fetcher::HttpResponse;
use crate::plugins::{parse_params, FragmentOutput, FragmentTransformPlugin, PluginContext};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedPluginParams {
    /// Selectors to apply to an HTML page. Without them the body is parsed as a feed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generic: Option<GenericFeedRule>,
}

/// Turns a scraped page into feed items: explicit generic selectors, a native feed
/// body, or the best generic rule found on an HTML page.
pub struct FeedPlugin;

impl FeedPlugin {
    pub const ID: &'static str = "feed";

    fn to_feed(
        &self,
        ctx: &PluginContext<'_>,
        fragment: &ScrapeResponse,
        markup: &str,
        params: &FeedPluginParams,
    ) -> Result<NormalizedFeed> {
        if let Some(rule) = &params.generic {
            debug!(corr_id = ctx.corr_id, context_xpath = %rule.context_xpath, "Applying generic selectors");
            return extract_feed(&Html::parse_document(markup), rule, &fragment.url);
        }

        let response = HttpResponse {
            url: fragment.url.clone(),
            status: fragment.debug.status_code.unwrap_or(200),
            content_type: fragment.debug.content_type.clone(),
            body: markup.as_bytes().to_vec(),
            cache_key: String::new(),
            elapsed: Default::default(),
        };
        let feed_type = detect(response.content_type.as_deref(), &response.body);
        if feed_type != FeedType::None {
            return ctx.engine.parsers().parse_as(ctx.corr_id, feed_type, &response);
        }

        let document = Html::parse_document(markup);
        let feeds = ctx.engine.locator().locate_in(&document, &fragment.url);
        match feeds.generic_feeds.first() {
            Some(rule) => {
                debug!(
                    corr_id = ctx.corr_id,
                    context_xpath = %rule.context_xpath,
                    score = rule.score,
                    "Using best discovered generic rule"
                );
                extract_feed(&document, rule, &fragment.url)
            }
            None => Ok(NormalizedFeed::empty(&fragment.url)),
        }
    }
}

impl FragmentTransformPlugin for FeedPlugin {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn transform(
        &self,
        ctx: &PluginContext<'_>,
        fragment: &ScrapeResponse,
        params: &serde_json::Value,
    ) -> Result<FragmentOutput> {
        if fragment.failed {
            return Err(GleanerError::FetchFailed(
                fragment
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("scrape of {} failed", fragment.url)),
            ));
        }
        let params: FeedPluginParams = parse_params(Self::ID, params)?;
        let markup = fragment
            .root_element()
            .and_then(|element| element.markup())
            .ok_or_else(|| GleanerError::plugin(Self::ID, "fragment carries no markup"))?;

        let feed = self.to_feed(ctx, fragment, markup, &params)?;
        debug!(corr_id = ctx.corr_id, items = feed.items.len(), "Transformed to feed");

        Ok(FragmentOutput {
            items: feed.items,
            fragments: feed.links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EmittedData, FragmentSpec, ScrapeDebug, ScrapedElement};
    use crate::plugins::testing::offline_engine;
    use crate::scrape::ScrapeEngine;
    use serde_json::json;

    fn fragment(url: &str, content_type: &str, markup: &str) -> ScrapeResponse {
        ScrapeResponse {
            url: url.to_string(),
            failed: false,
            error_message: None,
            elements: vec![ScrapedElement {
                fragment: FragmentSpec::root(),
                data: vec![EmittedData::Markup(markup.to_string())],
            }],
            debug: ScrapeDebug {
                content_type: Some(content_type.to_string()),
                status_code: Some(200),
                ..Default::default()
            },
        }
    }

    fn context(engine: &ScrapeEngine) -> PluginContext<'_> {
        PluginContext {
            corr_id: "t",
            owner: None,
            engine,
            index: 0,
        }
    }

    const LISTING: &str = r#"<html><head><title>Events</title></head><body>
      <div class="list">
        <div class="event"><a href="/e/1">First event</a><span>2024-03-01</span></div>
        <div class="event"><a href="/e/2">Second event</a><span>2024-03-02</span></div>
        <div class="event"><a href="/e/3">Third event</a><span>2024-03-03</span></div>
      </div>
      <a rel="next" href="/events?page=2">Next</a>
    </body></html>"#;

    #[test]
    fn test_native_feed_body() {
        let engine = offline_engine();
        let ctx = context(&engine);
        let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
            <item><title>One</title><link>https://example.com/1</link></item>
            <item><title>Two</title><link>https://example.com/2</link></item>
            </channel></rss>"#;

        let output = FeedPlugin
            .transform(
                &ctx,
                &fragment("https://example.com/feed", "application/rss+xml", rss),
                &serde_json::Value::Null,
            )
            .unwrap();
        assert_eq!(output.items.len(), 2);
        assert!(output.fragments.is_empty());
    }

    #[test]
    fn test_generic_selectors_with_pagination() {
        let engine = offline_engine();
        let ctx = context(&engine);
        let params = json!({
            "generic": {
                "context_xpath": "//div[@class='event']",
                "link_xpath": "./a",
                "date_xpath": "./span",
                "pagination_xpath": "//a[@rel='next']/@href"
            }
        });

        let output = FeedPlugin
            .transform(
                &ctx,
                &fragment("https://example.com/events", "text/html", LISTING),
                &params,
            )
            .unwrap();
        assert_eq!(output.items.len(), 3);
        assert_eq!(output.items[0].url, "https://example.com/e/1");
        assert_eq!(output.items[0].title.as_deref(), Some("First event"));
        assert!(output.items[0].published_at.is_some());
        assert_eq!(output.fragments, vec!["https://example.com/events?page=2".to_string()]);
    }

    #[test]
    fn test_html_without_selectors_uses_discovered_rule() {
        let engine = offline_engine();
        let ctx = context(&engine);
        let output = FeedPlugin
            .transform(
                &ctx,
                &fragment("https://example.com/events", "text/html", LISTING),
                &serde_json::Value::Null,
            )
            .unwrap();
        assert_eq!(output.items.len(), 3);
    }

    #[test]
    fn test_failed_fragment_is_an_error() {
        let engine = offline_engine();
        let ctx = context(&engine);
        let failed = ScrapeResponse::failed("https://example.com/", "status 500", ScrapeDebug::default());
        let err = FeedPlugin.transform(&ctx, &failed, &serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, GleanerError::FetchFailed(ref m) if m == "status 500"));
    }
}
