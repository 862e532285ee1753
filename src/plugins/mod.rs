//! Ordered, polymorphic transform stages applied to harvested fragments and documents.
//!
//! Two kinds of plugins exist:
//!
//! - **Fragment transforms** turn a scraped page into feed items plus follow-on
//!   fragments (pagination). A repository uses the first one in its plugin list;
//!   the feed plugin when it names none.
//! - **Document plugins** run on every item in the repository's order. Each returns
//!   `Keep` or `Drop`; a drop skips the remaining plugins and the item is not stored.
//!
//! Plugins are looked up by stable id in a `PluginRegistry`.

pub mod feed;
pub mod filter;
pub mod fulltext;
pub mod tag;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::app::{GleanerError, Result};
use crate::domain::{Document, FeedItem, PluginExecution, ScrapeResponse};
use crate::scrape::ScrapeEngine;

pub use feed::FeedPlugin;
pub use filter::{CompositeFilter, FieldFilter, FilterPlugin, NumericFilter, StringFilter};
pub use fulltext::FulltextPlugin;
pub use tag::{ConditionalTag, ConditionalTagPlugin};

/// What a plugin run needs from its surroundings.
pub struct PluginContext<'a> {
    pub corr_id: &'a str,
    pub owner: Option<&'a str>,
    pub engine: &'a ScrapeEngine,
    /// Position of the item within the harvested batch.
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FragmentOutput {
    pub items: Vec<FeedItem>,
    /// URLs to scrape next with the same request, e.g. pagination.
    pub fragments: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOutcome {
    Keep,
    Drop,
}

pub trait FragmentTransformPlugin: Send + Sync {
    fn id(&self) -> &'static str;

    fn transform(
        &self,
        ctx: &PluginContext<'_>,
        fragment: &ScrapeResponse,
        params: &serde_json::Value,
    ) -> Result<FragmentOutput>;
}

#[async_trait]
pub trait DocumentPlugin: Send + Sync {
    fn id(&self) -> &'static str;

    async fn process(
        &self,
        ctx: &PluginContext<'_>,
        document: &mut Document,
        params: &serde_json::Value,
    ) -> Result<PluginOutcome>;
}

#[derive(Clone)]
pub enum Plugin {
    Fragment(Arc<dyn FragmentTransformPlugin>),
    Document(Arc<dyn DocumentPlugin>),
}

impl Plugin {
    pub fn id(&self) -> &'static str {
        match self {
            Plugin::Fragment(plugin) => plugin.id(),
            Plugin::Document(plugin) => plugin.id(),
        }
    }
}

/// Explicit, ordered table of plugins keyed by id.
#[derive(Clone)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Plugin::Fragment(Arc::new(FeedPlugin)));
        registry.register(Plugin::Document(Arc::new(FulltextPlugin)));
        registry.register(Plugin::Document(Arc::new(FilterPlugin)));
        registry.register(Plugin::Document(Arc::new(ConditionalTagPlugin)));
        registry
    }
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Adds a plugin, replacing one registered under the same id in place.
    pub fn register(&mut self, plugin: Plugin) {
        match self.plugins.iter_mut().find(|p| p.id() == plugin.id()) {
            Some(existing) => *existing = plugin,
            None => self.plugins.push(plugin),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.id() == id)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.id()).collect()
    }

    /// Fails on the first execution naming an unknown plugin.
    pub fn check(&self, executions: &[PluginExecution]) -> Result<()> {
        for execution in executions {
            if self.get(&execution.plugin_id).is_none() {
                return Err(GleanerError::plugin(&execution.plugin_id, "unknown plugin"));
            }
        }
        Ok(())
    }

    /// First fragment transform in `executions`, else the feed plugin with no params.
    pub fn fragment_transform(
        &self,
        executions: &[PluginExecution],
    ) -> (Arc<dyn FragmentTransformPlugin>, serde_json::Value) {
        executions
            .iter()
            .find_map(|execution| match self.get(&execution.plugin_id) {
                Some(Plugin::Fragment(plugin)) => Some((plugin.clone(), execution.params.clone())),
                _ => None,
            })
            .unwrap_or_else(|| (Arc::new(FeedPlugin), serde_json::Value::Null))
    }

    /// Runs the document plugins of `executions` in order. A `Drop` stops the run.
    ///
    /// A plugin that aborts (`HarvestAborted`) leaves the document as it was and the
    /// run continues; any other error is returned.
    pub async fn process_document(
        &self,
        ctx: &PluginContext<'_>,
        executions: &[PluginExecution],
        document: &mut Document,
    ) -> Result<PluginOutcome> {
        for execution in executions {
            let plugin = match self.get(&execution.plugin_id) {
                Some(Plugin::Document(plugin)) => plugin,
                Some(Plugin::Fragment(_)) => continue,
                None => return Err(GleanerError::plugin(&execution.plugin_id, "unknown plugin")),
            };

            match plugin.process(ctx, document, &execution.params).await {
                Ok(PluginOutcome::Keep) => {}
                Ok(PluginOutcome::Drop) => {
                    debug!(corr_id = ctx.corr_id, plugin = plugin.id(), url = %document.url, "Document dropped");
                    return Ok(PluginOutcome::Drop);
                }
                Err(GleanerError::HarvestAborted(reason)) => {
                    info!(corr_id = ctx.corr_id, plugin = plugin.id(), url = %document.url, "Plugin aborted: {}", reason);
                }
                Err(e @ GleanerError::PluginFailed { .. }) => return Err(e),
                Err(e) => return Err(GleanerError::plugin(plugin.id(), e.to_string())),
            }
        }
        Ok(PluginOutcome::Keep)
    }
}

/// Deserializes plugin params; `null` yields the default.
pub fn parse_params<T: DeserializeOwned + Default>(plugin: &str, params: &serde_json::Value) -> Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| GleanerError::plugin(plugin, format!("invalid params: {}", e)))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;
    use crate::entitlements::EntitlementsConfig;
    use crate::fetcher::{FetchConfig, FetchOptions, Fetcher, HttpResponse};
    use crate::render::{RenderEngine, RenderOutput, RenderRequest};

    /// Engine whose fetcher and renderer fail every call.
    pub struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<HttpResponse> {
            Err(GleanerError::FetchFailed(format!("offline: {}", url)))
        }

        async fn probe_content_type(&self, _url: &str, _timeout: Duration) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl RenderEngine for Offline {
        async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
            Err(GleanerError::Render(format!("offline: {}", request.url)))
        }
    }

    pub fn offline_engine() -> ScrapeEngine {
        ScrapeEngine::new(
            Arc::new(Offline),
            Arc::new(Offline),
            Arc::new(EntitlementsConfig::default()),
            FetchConfig::default(),
        )
    }
}
