pub mod config;
pub mod http_fetcher;

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::app::Result;

pub use config::FetchConfig;
pub use http_fetcher::HttpFetcher;

/// Guards applied to a single GET.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// `None` accepts any 2xx status.
    pub expected_status: Option<u16>,
    /// Content-type prefixes; empty accepts everything.
    pub allowed_content_types: Vec<String>,
    pub max_bytes: u64,
}

impl FetchOptions {
    pub fn from_config(config: &FetchConfig, timeout: Duration) -> Self {
        Self {
            timeout,
            expected_status: Some(config.expected_status),
            allowed_content_types: config.allowed_content_types.clone(),
            max_bytes: config.max_bytes,
        }
    }

    pub fn with_allowed_content_types(mut self, allowed: &[&str]) -> Self {
        self.allowed_content_types = allowed.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn cache_key(&self, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(self.max_bytes.to_le_bytes());
        for allowed in &self.allowed_content_types {
            hasher.update(allowed.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub cache_key: String,
    pub elapsed: Duration,
}

impl HttpResponse {
    /// Content type without parameters, lowercased.
    pub fn mime(&self) -> Option<String> {
        self.content_type.as_deref().map(mime_of)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<HttpResponse>;

    /// Content type announced for `url`, without downloading the body.
    async fn probe_content_type(&self, url: &str, timeout: Duration) -> Result<Option<String>>;
}

pub fn mime_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_lowercase()
}

pub fn is_content_type_allowed(content_type: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let mime = mime_of(content_type);
    allowed
        .iter()
        .any(|prefix| mime.starts_with(&prefix.to_lowercase()))
}
