use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{GleanerError, Result};
use crate::config::Config;
use crate::feed::FeedService;
use crate::fetcher::HttpFetcher;
use crate::harvest::{HarvestScheduler, RepositoryHarvester};
use crate::plugins::PluginRegistry;
use crate::render::ChromeRenderer;
use crate::scrape::{ReadabilityExtractor, ScrapeEngine};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Wires store, scrape engine, plugins and scheduler together.
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub engine: Arc<ScrapeEngine>,
    pub registry: Arc<PluginRegistry>,
    pub config: Config,
}

impl AppContext {
    pub fn new(db_path: Option<PathBuf>, config: Config) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };
        let store = Arc::new(SqliteStore::new(&db_path)?);
        Self::with_store(store, config)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        Self::with_store(Arc::new(SqliteStore::in_memory()?), config)
    }

    fn with_store(store: Arc<dyn Store>, config: Config) -> Result<Self> {
        let readability = ReadabilityExtractor::new(&config.readability);
        let engine = ScrapeEngine::new(
            Arc::new(HttpFetcher::new(&config.fetch)?),
            Arc::new(ChromeRenderer::new(config.render.clone())),
            Arc::new(config.entitlements.clone()),
            config.fetch.clone(),
        )
        .with_readability(readability);

        Ok(Self {
            store,
            engine: Arc::new(engine),
            registry: Arc::new(PluginRegistry::default()),
            config,
        })
    }

    pub fn feed_service(&self) -> FeedService {
        FeedService::new(self.engine.clone())
    }

    pub fn harvester(&self) -> RepositoryHarvester {
        RepositoryHarvester::new(self.engine.clone(), self.store.clone(), self.registry.clone())
            .with_max_pages(self.config.scheduler.max_pages)
    }

    pub fn scheduler(&self) -> HarvestScheduler {
        HarvestScheduler::new(
            self.store.clone(),
            Arc::new(self.harvester()),
            self.config.scheduler.clone(),
        )
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| GleanerError::Config("Could not find data directory".into()))?;
        let gleaner_dir = data_dir.join("gleaner");
        std::fs::create_dir_all(&gleaner_dir)?;
        Ok(gleaner_dir.join("gleaner.db"))
    }
}
