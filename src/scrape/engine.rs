use std::sync::Arc;
use std::time::{Duration, Instant};

use ego_tree::NodeRef;
use scraper::{Html, Node};
use tracing::{debug, info, warn};
use url::Url;

use crate::app::{GleanerError, Result};
use crate::discovery::FeedDiscoveryLocator;
use crate::dom::{collect_text, inner_html, outer_html, XPath};
use crate::domain::{
    EmitSpec, EmitType, EmittedData, ExtractedArticle, FeedType, FragmentSpec, NativeFeed,
    ScrapeDebug, ScrapeMetrics, ScrapeRequest, ScrapeResponse, ScrapedElement, ScrapedFeeds,
};
use crate::entitlements::Entitlements;
use crate::feed::{detect_response, FeedParserChain};
use crate::fetcher::{FetchConfig, FetchOptions, Fetcher, HttpResponse};
use crate::render::{Capture, RenderEngine, RenderRequest};
use crate::scrape::readability::ReadabilityExtractor;

/// Turns a `ScrapeRequest` into typed payloads. Has no persistence side effects.
pub struct ScrapeEngine {
    fetcher: Arc<dyn Fetcher>,
    renderer: Arc<dyn RenderEngine>,
    entitlements: Arc<dyn Entitlements>,
    fetch_config: FetchConfig,
    parsers: FeedParserChain,
    locator: FeedDiscoveryLocator,
    readability: ReadabilityExtractor,
}

/// A parsed page plus, in render mode, the screenshots taken for pixel emits.
struct Page<'a> {
    document: &'a Html,
    base_url: &'a str,
    screenshots: &'a [Option<Vec<u8>>],
    captures: &'a [Option<usize>],
}

impl ScrapeEngine {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        renderer: Arc<dyn RenderEngine>,
        entitlements: Arc<dyn Entitlements>,
        fetch_config: FetchConfig,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            entitlements,
            fetch_config,
            parsers: FeedParserChain::default(),
            locator: FeedDiscoveryLocator::default(),
            readability: ReadabilityExtractor::default(),
        }
    }

    pub fn with_readability(mut self, readability: ReadabilityExtractor) -> Self {
        self.readability = readability;
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn parsers(&self) -> &FeedParserChain {
        &self.parsers
    }

    pub fn locator(&self) -> &FeedDiscoveryLocator {
        &self.locator
    }

    pub fn readability(&self) -> &ReadabilityExtractor {
        &self.readability
    }

    pub fn entitlements(&self) -> &Arc<dyn Entitlements> {
        &self.entitlements
    }

    /// Timeout of a single fetch or render for `owner`.
    pub fn timeout_for(&self, owner: Option<&str>) -> Duration {
        Duration::from_millis(self.entitlements.timeout_ms_for(owner))
    }

    /// Guarded static GET with the configured allow-list.
    pub fn fetch_options(&self, owner: Option<&str>) -> FetchOptions {
        FetchOptions::from_config(&self.fetch_config, self.timeout_for(owner))
    }

    /// Rejects malformed requests. Performs no I/O.
    pub fn validate(request: &ScrapeRequest) -> Result<()> {
        let url = Url::parse(&request.url)
            .map_err(|e| GleanerError::RequestInvalid(format!("invalid url {}: {}", request.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GleanerError::RequestInvalid(format!(
                "unsupported url scheme {}",
                url.scheme()
            )));
        }

        for emit in &request.emit {
            if emit.types.is_empty() {
                return Err(GleanerError::RequestInvalid(
                    "emit spec has no types".to_string(),
                ));
            }
            if emit.fragment.is_underspecified() {
                return Err(GleanerError::RequestInvalid(
                    "fragment is underspecified".to_string(),
                ));
            }
            if emit.wants(EmitType::Pixel) && !request.is_rendered() {
                return Err(GleanerError::RequestInvalid(
                    "emitting pixel requires prerendering".to_string(),
                ));
            }
            if emit.fragment.bounding_box.is_some() && !request.is_rendered() {
                return Err(GleanerError::RequestInvalid(
                    "bounding box requires prerendering".to_string(),
                ));
            }
            if let Some(xpath) = emit.fragment.xpath.as_deref().filter(|x| !x.trim().is_empty()) {
                XPath::parse(xpath).map_err(|e| GleanerError::RequestInvalid(e.to_string()))?;
            }
        }
        Ok(())
    }

    pub async fn scrape(&self, corr_id: &str, request: &ScrapeRequest) -> Result<ScrapeResponse> {
        self.scrape_for(corr_id, None, request).await
    }

    /// Network, timeout, status and content-type problems yield a failed response;
    /// malformed requests are an error.
    pub async fn scrape_for(
        &self,
        corr_id: &str,
        owner: Option<&str>,
        request: &ScrapeRequest,
    ) -> Result<ScrapeResponse> {
        Self::validate(request)?;
        let timeout = self.timeout_for(owner);

        match &request.render {
            Some(_) => self.scrape_rendered(corr_id, request, timeout).await,
            None => self.scrape_static(corr_id, owner, request).await,
        }
    }

    /// Scrapes several requests in order, after checking them all against the owner's limits.
    pub async fn scrape_all(
        &self,
        corr_id: &str,
        owner: Option<&str>,
        requests: &[ScrapeRequest],
    ) -> Result<Vec<ScrapeResponse>> {
        let max = self.entitlements.max_sources_per_repository_for(owner);
        if requests.len() > max {
            return Err(GleanerError::RequestInvalid(format!(
                "{} sources requested but at most {} are allowed",
                requests.len(),
                max
            )));
        }
        for request in requests {
            Self::validate(request)?;
        }

        let mut responses = Vec::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            let child = format!("{}/{}", corr_id, i);
            responses.push(self.scrape_for(&child, owner, request).await?);
        }
        Ok(responses)
    }

    async fn scrape_static(
        &self,
        corr_id: &str,
        owner: Option<&str>,
        request: &ScrapeRequest,
    ) -> Result<ScrapeResponse> {
        let options = self.fetch_options(owner);
        let mut debug = ScrapeDebug {
            corr_id: corr_id.to_string(),
            ..Default::default()
        };

        let started = Instant::now();
        let response = match self.fetcher.fetch(&request.url, &options).await {
            Ok(response) => response,
            Err(e) => {
                info!(corr_id, url = %request.url, "Static fetch failed: {}", e);
                return Ok(ScrapeResponse::failed(&request.url, e.to_string(), debug));
            }
        };
        debug.content_type = response.content_type.clone();
        debug.status_code = Some(response.status);
        debug.metrics = ScrapeMetrics {
            queue_ms: 0,
            render_ms: started.elapsed().as_millis() as u64,
        };

        let feed_type = detect_response(&response);
        if feed_type.is_feed() {
            debug!(corr_id, url = %response.url, feed_type = feed_type.as_str(), "Response is a feed");
            return Ok(self.feed_response(corr_id, request, &response, feed_type, debug));
        }

        let document = Html::parse_document(&response.body_text());
        let page = Page {
            document: &document,
            base_url: &response.url,
            screenshots: &[],
            captures: &[],
        };
        let elements = self.extract_all(&page, &request.effective_emit())?;

        Ok(ScrapeResponse {
            url: response.url.clone(),
            failed: false,
            error_message: None,
            elements,
            debug,
        })
    }

    /// A feed body is returned as-is at the root, together with its single native candidate.
    fn feed_response(
        &self,
        corr_id: &str,
        request: &ScrapeRequest,
        response: &HttpResponse,
        feed_type: FeedType,
        debug: ScrapeDebug,
    ) -> ScrapeResponse {
        let feed = match self.parsers.parse_as(corr_id, feed_type, response) {
            Ok(feed) => feed,
            Err(e) => return ScrapeResponse::failed(&request.url, e.to_string(), debug),
        };

        let candidate = NativeFeed {
            url: response.url.clone(),
            feed_type,
            title: feed.title,
            description: feed.description,
        };

        ScrapeResponse {
            url: response.url.clone(),
            failed: false,
            error_message: None,
            elements: vec![ScrapedElement {
                fragment: FragmentSpec::root(),
                data: vec![
                    EmittedData::Markup(response.body_text()),
                    EmittedData::Feeds(ScrapedFeeds {
                        native_feeds: vec![candidate],
                        generic_feeds: Vec::new(),
                    }),
                ],
            }],
            debug,
        }
    }

    async fn scrape_rendered(
        &self,
        corr_id: &str,
        request: &ScrapeRequest,
        timeout: Duration,
    ) -> Result<ScrapeResponse> {
        let directives = request.render.clone().unwrap_or_default();
        let emits = request.effective_emit();

        let mut render_request = RenderRequest::new(&request.url, &directives, timeout);
        let captures: Vec<Option<usize>> = emits
            .iter()
            .map(|emit| {
                if !emit.wants(EmitType::Pixel) {
                    return None;
                }
                let capture = match (&emit.fragment.bounding_box, emit.fragment.xpath.as_deref()) {
                    (Some(bounding_box), _) => Capture::Clip(*bounding_box),
                    (None, Some("/")) | (None, None) => Capture::Element("/*".to_string()),
                    (None, Some(xpath)) => Capture::Element(xpath.to_string()),
                };
                Some(render_request.capture(capture))
            })
            .collect();

        let mut debug = ScrapeDebug {
            corr_id: corr_id.to_string(),
            ..Default::default()
        };

        let output = match self.renderer.render(&render_request).await {
            Ok(output) => output,
            Err(e @ GleanerError::RequestInvalid(_)) => return Err(e),
            Err(e) => {
                info!(corr_id, url = %request.url, "Render failed: {}", e);
                return Ok(ScrapeResponse::failed(&request.url, e.to_string(), debug));
            }
        };

        debug.content_type = Some("text/html".to_string());
        debug.html = Some(output.html.clone());
        debug.console = output.console.clone();
        debug.cookies = output.cookies.clone();
        debug.network = output.network.clone();
        debug.metrics = ScrapeMetrics {
            queue_ms: output.queue_time.as_millis() as u64,
            render_ms: output.render_time.as_millis() as u64,
        };

        let document = Html::parse_document(&output.html);
        let page = Page {
            document: &document,
            base_url: &output.url,
            screenshots: &output.screenshots,
            captures: &captures,
        };
        let elements = self.extract_all(&page, &emits)?;

        Ok(ScrapeResponse {
            url: output.url.clone(),
            failed: false,
            error_message: None,
            elements,
            debug,
        })
    }

    fn extract_all(&self, page: &Page<'_>, emits: &[EmitSpec]) -> Result<Vec<ScrapedElement>> {
        emits
            .iter()
            .enumerate()
            .map(|(index, emit)| self.extract(page, index, emit))
            .collect()
    }

    fn extract(&self, page: &Page<'_>, index: usize, emit: &EmitSpec) -> Result<ScrapedElement> {
        let root = page.document.tree.root();
        // Bounding-box-only fragments address pixels; structural payloads use the whole page.
        let node = match emit.fragment.xpath.as_deref().filter(|x| !x.trim().is_empty()) {
            Some(xpath) => XPath::parse(xpath)
                .map_err(|e| GleanerError::RequestInvalid(e.to_string()))?
                .first_node(root)
                .ok_or_else(|| {
                    GleanerError::RequestInvalid(format!("xpath {} cannot be resolved", xpath))
                })?,
            None => root,
        };

        let mut data = Vec::with_capacity(emit.types.len());
        for emit_type in &emit.types {
            data.push(match emit_type {
                EmitType::Markup => EmittedData::Markup(inner_html(page.document, node)),
                EmitType::Text => EmittedData::Text(collect_text(node)),
                EmitType::Feeds => EmittedData::Feeds(self.discover(page, node)),
                EmitType::Readability => EmittedData::Readability(self.readable(page, node)),
                EmitType::Pixel => {
                    let png = page
                        .captures
                        .get(index)
                        .copied()
                        .flatten()
                        .and_then(|i| page.screenshots.get(i).cloned().flatten());
                    match png {
                        Some(png) => EmittedData::Pixel(png),
                        None => {
                            warn!(fragment = ?emit.fragment, "Fragment could not be captured");
                            return Err(GleanerError::RequestInvalid(
                                "fragment cannot be captured".to_string(),
                            ));
                        }
                    }
                }
            });
        }

        Ok(ScrapedElement {
            fragment: emit.fragment.clone(),
            data,
        })
    }

    fn discover(&self, page: &Page<'_>, node: NodeRef<'_, Node>) -> ScrapedFeeds {
        if node.parent().is_none() {
            return self.locator.locate_in(page.document, page.base_url);
        }
        self.locator.locate(&outer_html(node), page.base_url)
    }

    fn readable(&self, page: &Page<'_>, node: NodeRef<'_, Node>) -> ExtractedArticle {
        if node.parent().is_none() {
            return self.readability.extract(page.document, page.base_url);
        }
        self.readability.extract_html(&outer_html(node), page.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::domain::{BoundingBox, RenderDirectives};
    use crate::entitlements::EntitlementsConfig;
    use crate::render::RenderOutput;

    #[derive(Default)]
    struct FakeFetcher {
        responses: Mutex<HashMap<String, (Option<String>, String)>>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn with(url: &str, content_type: &str, body: &str) -> Self {
            let fetcher = Self::default();
            fetcher.responses.lock().unwrap().insert(
                url.to_string(),
                (Some(content_type.to_string()), body.to_string()),
            );
            fetcher
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let responses = self.responses.lock().unwrap();
            let (content_type, body) = responses
                .get(url)
                .cloned()
                .ok_or_else(|| GleanerError::FetchFailed(format!("timed out fetching {}", url)))?;
            Ok(HttpResponse {
                url: url.to_string(),
                status: 200,
                content_type,
                body: body.into_bytes(),
                cache_key: String::new(),
                elapsed: Duration::ZERO,
            })
        }

        async fn probe_content_type(&self, url: &str, _timeout: Duration) -> Result<Option<String>> {
            Ok(self.responses.lock().unwrap().get(url).and_then(|r| r.0.clone()))
        }
    }

    struct FakeRenderer {
        html: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RenderEngine for FakeRenderer {
        async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RenderOutput {
                url: request.url.clone(),
                html: self.html.clone(),
                screenshots: request.captures.iter().map(|_| Some(vec![137, 80, 78, 71])).collect(),
                console: vec!["log: ready".to_string()],
                cookies: vec!["session=1".to_string()],
                network: Vec::new(),
                queue_time: Duration::from_millis(3),
                render_time: Duration::from_millis(40),
            })
        }
    }

    fn engine(fetcher: Arc<FakeFetcher>, renderer: Arc<FakeRenderer>) -> ScrapeEngine {
        ScrapeEngine::new(
            fetcher,
            renderer,
            Arc::new(EntitlementsConfig::default()),
            FetchConfig::default(),
        )
    }

    fn renderer(html: &str) -> Arc<FakeRenderer> {
        Arc::new(FakeRenderer {
            html: html.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    const PAGE: &str = "<html><body><h1>Hello</h1><p>World</p></body></html>";

    #[tokio::test]
    async fn test_underspecified_fragment_is_rejected_without_network() {
        let fetcher = Arc::new(FakeFetcher::with("https://example.com/", "text/html", PAGE));
        let renderer = renderer(PAGE);
        let engine = engine(fetcher.clone(), renderer.clone());

        let request = ScrapeRequest::new("https://example.com/")
            .with_emit(EmitSpec::new(FragmentSpec::default(), vec![EmitType::Text]));
        let err = engine.scrape("t", &request).await.unwrap_err();

        assert!(matches!(err, GleanerError::RequestInvalid(ref m) if m.contains("underspecified")));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pixel_without_render_is_rejected() {
        let fetcher = Arc::new(FakeFetcher::with("https://example.com/", "text/html", PAGE));
        let engine = engine(fetcher.clone(), renderer(PAGE));

        let request = ScrapeRequest::new("https://example.com/")
            .with_emit(EmitSpec::new(FragmentSpec::xpath("//h1"), vec![EmitType::Pixel]));
        let err = engine.scrape("t", &request).await.unwrap_err();

        assert!(matches!(err, GleanerError::RequestInvalid(ref m) if m.contains("prerendering")));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_types_and_bad_xpath_are_rejected() {
        let fetcher = Arc::new(FakeFetcher::with("https://example.com/", "text/html", PAGE));
        let engine = engine(fetcher.clone(), renderer(PAGE));

        let no_types = ScrapeRequest::new("https://example.com/")
            .with_emit(EmitSpec::new(FragmentSpec::xpath("//h1"), vec![]));
        assert!(engine.scrape("t", &no_types).await.is_err());

        let bad_xpath = ScrapeRequest::new("https://example.com/")
            .with_emit(EmitSpec::new(FragmentSpec::xpath("//h1[@"), vec![EmitType::Text]));
        assert!(engine.scrape("t", &bad_xpath).await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_static_text_of_heading() {
        let fetcher = Arc::new(FakeFetcher::with("https://example.com/", "text/html", PAGE));
        let engine = engine(fetcher.clone(), renderer(PAGE));

        let request = ScrapeRequest::new("https://example.com/").with_emit(EmitSpec::new(
            FragmentSpec::xpath("//h1"),
            vec![EmitType::Text, EmitType::Markup],
        ));
        let response = engine.scrape("t", &request).await.unwrap();

        assert!(!response.failed);
        assert_eq!(response.elements.len(), 1);
        assert_eq!(response.elements[0].text(), Some("Hello"));
        assert_eq!(response.elements[0].markup(), Some("Hello"));
        assert_eq!(response.debug.status_code, Some(200));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_emit_returns_root_markup() {
        let fetcher = Arc::new(FakeFetcher::with("https://example.com/", "text/html", PAGE));
        let engine = engine(fetcher, renderer(PAGE));

        let response = engine
            .scrape("t", &ScrapeRequest::new("https://example.com/"))
            .await
            .unwrap();
        let root = response.root_element().unwrap();
        assert_eq!(root.fragment, FragmentSpec::root());
        assert!(root.markup().unwrap().contains("<h1>Hello</h1>"));
    }

    #[tokio::test]
    async fn test_feed_content_type_short_circuits() {
        let rss = r#"<?xml version="1.0"?><rss version="2.0"><channel>
            <title>News</title><description>Daily</description>
            <item><title>A</title><link>https://example.com/a</link></item>
            </channel></rss>"#;
        let fetcher = Arc::new(FakeFetcher::with(
            "https://example.com/feed",
            "application/rss+xml; charset=utf-8",
            rss,
        ));
        let engine = engine(fetcher, renderer(PAGE));

        let request = ScrapeRequest::new("https://example.com/feed")
            .with_emit(EmitSpec::new(FragmentSpec::xpath("//h1"), vec![EmitType::Text]));
        let response = engine.scrape("t", &request).await.unwrap();

        assert_eq!(response.elements.len(), 1);
        let element = &response.elements[0];
        assert_eq!(element.fragment.xpath.as_deref(), Some("/"));
        assert_eq!(element.markup(), Some(rss));
        let feeds = element.feeds().unwrap();
        assert_eq!(feeds.native_feeds.len(), 1);
        assert!(feeds.generic_feeds.is_empty());
        assert_eq!(feeds.native_feeds[0].url, "https://example.com/feed");
        assert_eq!(feeds.native_feeds[0].feed_type, FeedType::Rss);
        assert_eq!(feeds.native_feeds[0].title.as_deref(), Some("News"));
        assert_eq!(feeds.native_feeds[0].description.as_deref(), Some("Daily"));
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_failed_response() {
        let fetcher = Arc::new(FakeFetcher::default());
        let engine = engine(fetcher, renderer(PAGE));

        let response = engine
            .scrape("t", &ScrapeRequest::new("https://slow.example.com/"))
            .await
            .unwrap();
        assert!(response.failed);
        assert!(response.error_message.unwrap().contains("timed out"));
        assert!(response.elements.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_xpath_is_a_request_error() {
        let fetcher = Arc::new(FakeFetcher::with("https://example.com/", "text/html", PAGE));
        let engine = engine(fetcher, renderer(PAGE));

        let request = ScrapeRequest::new("https://example.com/")
            .with_emit(EmitSpec::new(FragmentSpec::xpath("//table"), vec![EmitType::Text]));
        let err = engine.scrape("t", &request).await.unwrap_err();
        assert!(matches!(err, GleanerError::RequestInvalid(ref m) if m.contains("cannot be resolved")));
    }

    #[tokio::test]
    async fn test_rendered_scrape_with_pixels_and_debug() {
        let fetcher = Arc::new(FakeFetcher::default());
        let renderer = renderer(PAGE);
        let engine = engine(fetcher.clone(), renderer.clone());

        let request = ScrapeRequest::new("https://example.com/")
            .rendered(RenderDirectives::default())
            .with_emit(EmitSpec::new(
                FragmentSpec::xpath("//p"),
                vec![EmitType::Text, EmitType::Pixel],
            ))
            .with_emit(EmitSpec::new(
                FragmentSpec::bounding_box(BoundingBox {
                    x: 0,
                    y: 0,
                    width: 100,
                    height: 50,
                }),
                vec![EmitType::Pixel],
            ));
        let response = engine.scrape("t", &request).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.elements[0].text(), Some("World"));
        assert!(response.elements[0].pixel().is_some());
        assert!(response.elements[1].pixel().is_some());
        assert_eq!(response.debug.console, vec!["log: ready".to_string()]);
        assert_eq!(response.debug.metrics.render_ms, 40);
        assert!(response.debug.html.is_some());
    }

    #[tokio::test]
    async fn test_scrape_all_enforces_source_limit() {
        let fetcher = Arc::new(FakeFetcher::with("https://example.com/", "text/html", PAGE));
        let engine = engine(fetcher.clone(), renderer(PAGE));

        let requests = vec![ScrapeRequest::new("https://example.com/"); 11];
        let err = engine.scrape_all("t", None, &requests).await.unwrap_err();
        assert!(matches!(err, GleanerError::RequestInvalid(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

        let responses = engine.scrape_all("t", None, &requests[..2]).await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1].debug.corr_id, "t/1");
    }
}
