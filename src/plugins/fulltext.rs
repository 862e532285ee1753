use async_trait::async_trait;
use html_escape::encode_text;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::app::{GleanerError, Result};
use crate::domain::{Document, ExtractedArticle, RenderDirectives, ScrapeRequest};
use crate::fetcher::{mime_of, HttpResponse};
use crate::plugins::{DocumentPlugin, PluginContext, PluginOutcome};

const BLACKLIST: &[&str] = &["https://twitter.com", "https://www.imdb.com", "https://www.google."];

pub fn is_blacklisted(url: &str) -> bool {
    BLACKLIST.iter().any(|prefix| url.starts_with(prefix))
}

/// Replaces a document's content with the full article behind its URL.
pub struct FulltextPlugin;

impl FulltextPlugin {
    pub const ID: &'static str = "fulltext";

    async fn fetch(&self, ctx: &PluginContext<'_>, url: &str) -> Result<HttpResponse> {
        let mut options = ctx.engine.fetch_options(ctx.owner);
        options.allowed_content_types.push("application/pdf".to_string());
        ctx.engine.fetcher().fetch(url, &options).await
    }

    async fn render(&self, ctx: &PluginContext<'_>, url: &str) -> Result<HttpResponse> {
        let request = ScrapeRequest::new(url).rendered(RenderDirectives::default());
        let response = ctx.engine.scrape_for(ctx.corr_id, ctx.owner, &request).await?;
        if response.failed {
            return Err(GleanerError::FetchFailed(
                response
                    .error_message
                    .unwrap_or_else(|| format!("render of {} failed", url)),
            ));
        }
        let markup = response
            .root_element()
            .and_then(|e| e.markup())
            .unwrap_or_default()
            .to_string();
        Ok(HttpResponse {
            url: response.url,
            status: 200,
            content_type: Some("text/html".to_string()),
            body: markup.into_bytes(),
            cache_key: String::new(),
            elapsed: Default::default(),
        })
    }

    fn extract(&self, ctx: &PluginContext<'_>, response: &HttpResponse) -> Result<ExtractedArticle> {
        let mime = response.mime().unwrap_or_else(|| "text/html".to_string());
        match mime.as_str() {
            "text/html" => {
                debug!(corr_id = ctx.corr_id, url = %response.url, "Extracting from markup");
                Ok(ctx.engine.readability().extract_html(&response.body_text(), &response.url))
            }
            "text/plain" => {
                debug!(corr_id = ctx.corr_id, url = %response.url, "Extracting from text");
                Ok(ExtractedArticle {
                    url: response.url.clone(),
                    content_text: response.body_text().trim().to_string(),
                    content_mime: "text/plain".to_string(),
                    ..Default::default()
                })
            }
            "application/pdf" => {
                debug!(corr_id = ctx.corr_id, url = %response.url, "Extracting from pdf");
                let text = pdf_extract::extract_text_from_mem(&response.body)
                    .map_err(|e| GleanerError::plugin(Self::ID, format!("unreadable pdf: {}", e)))?;
                Ok(ctx.engine.readability().extract_html(&text_to_html(&text), &response.url))
            }
            other => {
                warn!(corr_id = ctx.corr_id, url = %response.url, "Cannot extract article from {}", other);
                Err(GleanerError::plugin(
                    Self::ID,
                    format!("unsupported content type {} for extraction", other),
                ))
            }
        }
    }
}

/// Paragraphs separated by blank lines become `<p>` elements.
fn text_to_html(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", encode_text(p)))
        .collect();
    format!("<html><body><article>{}</article></body></html>", paragraphs.join("\n"))
}

fn has_noscript(body: &str) -> bool {
    Selector::parse("noscript")
        .map(|selector| Html::parse_document(body).select(&selector).next().is_some())
        .unwrap_or(false)
}

fn apply(document: &mut Document, article: ExtractedArticle, final_url: &str) {
    if let Some(title) = article.title.filter(|t| !t.trim().is_empty()) {
        document.title = Some(title);
    }
    let content = article.content.trim();
    if !content.is_empty() {
        document.content_raw = Some(content.to_string());
        document.content_raw_mime = Some(article.content_mime.clone());
    }
    if let Some(image_url) = article.image_url.filter(|u| !u.trim().is_empty()) {
        document.image_url = Some(image_url);
    }
    let text = article.content_text.trim();
    document.content_text = if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    };
    if final_url != document.url {
        document.alias_url = Some(final_url.to_string());
    }
}

#[async_trait]
impl DocumentPlugin for FulltextPlugin {
    fn id(&self) -> &'static str {
        Self::ID
    }

    async fn process(
        &self,
        ctx: &PluginContext<'_>,
        document: &mut Document,
        _params: &serde_json::Value,
    ) -> Result<PluginOutcome> {
        let url = document.url.clone();
        if Url::parse(&url).is_err() {
            return Err(GleanerError::HarvestAborted(format!("illegal url {}", url)));
        }
        if is_blacklisted(&url) {
            return Err(GleanerError::HarvestAborted(format!("blacklisted {}", url)));
        }

        let announced = ctx
            .engine
            .fetcher()
            .probe_content_type(&url, ctx.engine.timeout_for(ctx.owner))
            .await
            .ok()
            .flatten()
            .map(|ct| mime_of(&ct));
        let can_prerender = matches!(announced.as_deref(), Some("text/html") | Some("text/plain"));

        let mut response = self.fetch(ctx, &url).await?;
        if can_prerender && has_noscript(&response.body_text()) {
            info!(corr_id = ctx.corr_id, url = %url, "Prerendering, found noscript tag");
            response = self.render(ctx, &url).await?;
        }

        let article = self.extract(ctx, &response)?;
        apply(document, article, &response.url);
        Ok(PluginOutcome::Keep)
    }
}
