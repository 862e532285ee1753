use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::app::{child_corr_id, GleanerError, Result};
use crate::domain::{Document, FeedItem, Repository, Source};
use crate::harvest::RetentionManager;
use crate::plugins::{PluginContext, PluginOutcome, PluginRegistry};
use crate::scrape::ScrapeEngine;
use crate::store::{Store, UpsertOutcome};

/// Pages followed per source through pagination links, the first page included.
pub const DEFAULT_MAX_PAGES: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub inserted: usize,
    pub updated: usize,
    pub dropped: usize,
    pub failed_sources: usize,
    pub retention_deleted: usize,
}

/// One complete harvest of a repository. The scheduler only knows this seam.
#[async_trait]
pub trait Harvest: Send + Sync {
    async fn harvest(&self, corr_id: &str, repository: &Repository) -> Result<HarvestReport>;
}

/// Sources in order, then the plugin pipeline, then upsert by URL, then retention.
pub struct RepositoryHarvester {
    engine: Arc<ScrapeEngine>,
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    retention: RetentionManager,
    max_pages: usize,
}

impl RepositoryHarvester {
    pub fn new(engine: Arc<ScrapeEngine>, store: Arc<dyn Store>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            engine,
            retention: RetentionManager::new(store.clone()),
            store,
            registry,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Scrapes a source and its pagination into feed items.
    async fn collect_items(
        &self,
        corr_id: &str,
        repository: &Repository,
        source: &Source,
    ) -> Result<Vec<FeedItem>> {
        let owner = Some(repository.owner_id.as_str());
        let (transform, params) = self.registry.fragment_transform(&repository.plugins);

        let mut queue = VecDeque::from([source.request.url.clone()]);
        let mut visited = HashSet::new();
        let mut items = Vec::new();

        while let Some(url) = queue.pop_front() {
            if visited.len() >= self.max_pages {
                debug!(corr_id, url = %url, "Page limit reached, not following");
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }

            let request = source.request.retarget(&url);
            let response = self.engine.scrape_for(corr_id, owner, &request).await?;
            let ctx = PluginContext {
                corr_id,
                owner,
                engine: &self.engine,
                index: 0,
            };
            let output = transform.transform(&ctx, &response, &params)?;
            debug!(corr_id, url = %url, items = output.items.len(), "Fragment transformed");

            items.extend(output.items);
            queue.extend(output.fragments.into_iter().filter(|next| !visited.contains(next)));
        }

        Ok(items)
    }

    /// Runs the document plugins over a source's items. `offset` continues the batch index.
    async fn to_documents(
        &self,
        corr_id: &str,
        repository: &Repository,
        source: &Source,
        items: Vec<FeedItem>,
        offset: usize,
        report: &mut HarvestReport,
    ) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let mut document = Document::from_item(&repository.id, &item);
            for tag in &source.tags {
                document.add_tag(tag);
            }

            let ctx = PluginContext {
                corr_id,
                owner: Some(repository.owner_id.as_str()),
                engine: &self.engine,
                index: offset + i,
            };
            match self
                .registry
                .process_document(&ctx, &repository.plugins, &mut document)
                .await?
            {
                PluginOutcome::Keep => documents.push(document),
                PluginOutcome::Drop => report.dropped += 1,
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl Harvest for RepositoryHarvester {
    async fn harvest(&self, corr_id: &str, repository: &Repository) -> Result<HarvestReport> {
        info!(corr_id, repository = %repository.id, title = %repository.title, "Harvesting");
        self.registry.check(&repository.plugins)?;

        let owner = Some(repository.owner_id.as_str());
        let max_sources = self.engine.entitlements().max_sources_per_repository_for(owner);
        if repository.sources.len() > max_sources {
            return Err(GleanerError::LimitExceeded(format!(
                "repository has {} sources but at most {} are allowed",
                repository.sources.len(),
                max_sources
            )));
        }

        let mut report = HarvestReport::default();
        let mut seen_urls = HashSet::new();
        let mut index = 0;

        for source in &repository.sources {
            let source_corr = child_corr_id(corr_id);
            let outcome = match self.collect_items(&source_corr, repository, source).await {
                Ok(items) => {
                    let items: Vec<_> = items
                        .into_iter()
                        .filter(|item| seen_urls.insert(item.url.clone()))
                        .collect();
                    let count = items.len();
                    let documents = self
                        .to_documents(&source_corr, repository, source, items, index, &mut report)
                        .await;
                    index += count;
                    documents
                }
                Err(e) => Err(e),
            };

            let documents = match outcome {
                Ok(documents) => documents,
                Err(e) => {
                    warn!(corr_id = %source_corr, source = %source.id, url = %source.request.url, "Source failed: {}", e);
                    self.store.mark_source_erroneous(&source.id, &e.to_string())?;
                    report.failed_sources += 1;
                    continue;
                }
            };

            for document in &documents {
                match self.store.upsert_document(document)? {
                    UpsertOutcome::Inserted => report.inserted += 1,
                    UpsertOutcome::Updated => report.updated += 1,
                }
            }
            if source.erroneous {
                self.store.clear_source_error(&source.id)?;
            }
            debug!(corr_id = %source_corr, source = %source.id, documents = documents.len(), "Source harvested");
        }

        if !repository.sources.is_empty() && report.failed_sources == repository.sources.len() {
            return Err(GleanerError::HarvestFailed(format!(
                "all {} sources failed",
                report.failed_sources
            )));
        }

        report.retention_deleted = self.retention.apply(corr_id, repository)?;
        info!(
            corr_id,
            repository = %repository.id,
            inserted = report.inserted,
            updated = report.updated,
            dropped = report.dropped,
            failed_sources = report.failed_sources,
            "Harvest complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Owner, PluginExecution, ScrapeRequest};
    use crate::entitlements::EntitlementsConfig;
    use crate::fetcher::{FetchConfig, HttpFetcher};
    use crate::plugins::testing::Offline;
    use crate::store::SqliteStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Blog</title>
<item><title>One</title><link>https://example.com/1</link><pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate></item>
<item><title>Two (sponsored)</title><link>https://example.com/2</link><pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate></item>
<item><title>Three</title><link>https://example.com/3</link><pubDate>Wed, 03 Jan 2024 10:00:00 GMT</pubDate></item>
</channel></rss>"#;

    struct Fixture {
        server: MockServer,
        store: Arc<SqliteStore>,
        harvester: RepositoryHarvester,
    }

    async fn fixture() -> Fixture {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(RSS, "application/rss+xml"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_owner(&Owner::new("o", "O")).unwrap();
        let config = FetchConfig {
            cache_ttl_secs: 0,
            ..FetchConfig::default()
        };
        let engine = ScrapeEngine::new(
            Arc::new(HttpFetcher::new(&config).unwrap()),
            Arc::new(Offline),
            Arc::new(EntitlementsConfig::default()),
            config,
        );
        let harvester = RepositoryHarvester::new(
            Arc::new(engine),
            store.clone(),
            Arc::new(PluginRegistry::default()),
        );
        Fixture {
            server,
            store,
            harvester,
        }
    }

    fn repository(store: &SqliteStore, urls: &[String]) -> Repository {
        let mut repository = Repository::new("o", "Blog", "1h");
        for url in urls {
            repository.add_source(ScrapeRequest::new(url.clone()));
        }
        store.add_repository(&repository).unwrap();
        repository
    }

    #[tokio::test]
    async fn test_reharvest_is_idempotent() {
        let f = fixture().await;
        let repository = repository(&f.store, &[format!("{}/feed.xml", f.server.uri())]);

        let first = f.harvester.harvest("t", &repository).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.updated, 0);

        let second = f.harvester.harvest("t", &repository).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 3);

        let documents = f.store.get_documents(&repository.id).unwrap();
        assert_eq!(documents.len(), 3);
        assert_eq!(documents[0].url, "https://example.com/3");
    }

    #[tokio::test]
    async fn test_filter_plugin_and_index_tags() {
        let f = fixture().await;
        let mut repository = Repository::new("o", "Blog", "1h");
        repository.add_source(ScrapeRequest::new(format!("{}/feed.xml", f.server.uri())));
        repository.plugins = vec![
            PluginExecution::new(
                "filter",
                json!([{ "exclude": { "title": { "operator": "contains", "value": "sponsored" } } }]),
            ),
            PluginExecution::new(
                "conditional_tag",
                json!([{ "tag": "top", "filter": { "index": { "operator": "lt", "value": 1 } } }]),
            ),
        ];
        f.store.add_repository(&repository).unwrap();

        let report = f.harvester.harvest("t", &repository).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.dropped, 1);

        let first = f
            .store
            .get_document_by_url(&repository.id, "https://example.com/1")
            .unwrap()
            .unwrap();
        assert_eq!(first.tags, vec!["top".to_string()]);
        assert!(f
            .store
            .get_document_by_url(&repository.id, "https://example.com/2")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failing_source_is_marked_and_others_proceed() {
        let f = fixture().await;
        let repository = repository(
            &f.store,
            &[
                format!("{}/broken.xml", f.server.uri()),
                format!("{}/feed.xml", f.server.uri()),
            ],
        );

        let report = f.harvester.harvest("t", &repository).await.unwrap();
        assert_eq!(report.failed_sources, 1);
        assert_eq!(report.inserted, 3);

        let sources = f.store.get_sources(&repository.id).unwrap();
        assert!(sources[0].erroneous);
        assert!(sources[0].last_error_message.is_some());
        assert!(!sources[1].erroneous);
    }

    #[tokio::test]
    async fn test_all_sources_failing_fails_the_harvest() {
        let f = fixture().await;
        let repository = repository(&f.store, &[format!("{}/broken.xml", f.server.uri())]);

        let err = f.harvester.harvest("t", &repository).await.unwrap_err();
        assert!(matches!(err, GleanerError::HarvestFailed(_)));
    }

    #[tokio::test]
    async fn test_pagination_is_followed_once() {
        let f = fixture().await;
        let page = |n: u32, next: &str| {
            format!(
                r#"<html><body><ul>
                  <li class="post"><a href="/p/{n}a">Post {n}a</a></li>
                  <li class="post"><a href="/p/{n}b">Post {n}b</a></li>
                  <li class="post"><a href="/p/{n}c">Post {n}c</a></li>
                </ul><a rel="next" href="{next}">Next</a></body></html>"#
            )
        };
        Mock::given(method("GET"))
            .and(path("/list/1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page(1, "/list/2"), "text/html"))
            .expect(1)
            .mount(&f.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list/2"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(page(2, "/list/1"), "text/html"))
            .expect(1)
            .mount(&f.server)
            .await;

        let mut repository = Repository::new("o", "List", "1h");
        repository.add_source(ScrapeRequest::new(format!("{}/list/1", f.server.uri())));
        repository.plugins = vec![PluginExecution::new(
            "feed",
            json!({ "generic": {
                "context_xpath": "//li[@class='post']",
                "link_xpath": "./a",
                "pagination_xpath": "//a[@rel='next']/@href"
            }}),
        )];
        f.store.add_repository(&repository).unwrap();

        let report = f.harvester.harvest("t", &repository).await.unwrap();
        assert_eq!(report.inserted, 6);
    }
}
