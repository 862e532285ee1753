use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{redirect, Client};
use tracing::debug;

use crate::app::{GleanerError, Result};
use crate::fetcher::{is_content_type_allowed, FetchConfig, FetchOptions, Fetcher, HttpResponse};

pub struct HttpFetcher {
    client: Client,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, HttpResponse)>>,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .brotli(true)
            .redirect(redirect::Policy::limited(config.redirect_limit))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            cache_ttl: config.cache_ttl(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, key: &str) -> Option<HttpResponse> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.cache_ttl)
            .map(|(_, response)| response.clone())
    }

    fn remember(&self, response: &HttpResponse) {
        if self.cache_ttl.is_zero() {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            let ttl = self.cache_ttl;
            cache.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
            cache.insert(response.cache_key.clone(), (Instant::now(), response.clone()));
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<HttpResponse> {
        let cache_key = options.cache_key(url);
        if let Some(response) = self.cached(&cache_key) {
            debug!(url, "Serving cached response");
            return Ok(response);
        }

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status().as_u16();
        match options.expected_status {
            Some(expected) if status != expected => {
                return Err(GleanerError::FetchFailed(format!(
                    "expected status {} but got {} for {}",
                    expected, status, url
                )));
            }
            None if !response.status().is_success() => {
                return Err(GleanerError::FetchFailed(format!(
                    "status {} for {}",
                    status, url
                )));
            }
            _ => {}
        }

        if let Some(content_len) = response.content_length() {
            if content_len > options.max_bytes {
                return Err(GleanerError::FetchFailed(format!(
                    "response of {} bytes exceeds limit of {} bytes",
                    content_len, options.max_bytes
                )));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        if let Some(ct) = content_type.as_deref() {
            if !is_content_type_allowed(ct, &options.allowed_content_types) {
                return Err(GleanerError::FetchFailed(format!(
                    "unsupported content type {} for {}",
                    ct, url
                )));
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_reqwest_error(url, e))?;
            if body.len() as u64 + chunk.len() as u64 > options.max_bytes {
                return Err(GleanerError::FetchFailed(format!(
                    "response exceeds limit of {} bytes",
                    options.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        let response = HttpResponse {
            url: final_url,
            status,
            content_type,
            body,
            cache_key,
            elapsed: started.elapsed(),
        };
        self.remember(&response);

        Ok(response)
    }

    async fn probe_content_type(&self, url: &str, timeout: Duration) -> Result<Option<String>> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        Ok(response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from))
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> GleanerError {
    if err.is_timeout() {
        return GleanerError::FetchFailed(format!("timed out fetching {}", url));
    }
    if err.is_redirect() {
        return GleanerError::FetchFailed(format!("too many redirects for {}", url));
    }
    GleanerError::Http(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> FetchOptions {
        FetchOptions::from_config(&FetchConfig::default(), Duration::from_secs(5))
    }

    fn uncached() -> HttpFetcher {
        let config = FetchConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        HttpFetcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>ok</html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let url = format!("{}/doc", server.uri());
        let response = uncached().fetch(&url, &options()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"<html>ok</html>");
        assert_eq!(response.mime().as_deref(), Some("text/html"));
        assert_eq!(response.url, url);
    }

    #[tokio::test]
    async fn test_fetch_rejects_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/missing", server.uri());
        let err = uncached().fetch(&url, &options()).await.unwrap_err();
        assert!(matches!(err, GleanerError::FetchFailed(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_disallowed_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/image"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 4], "image/png"))
            .mount(&server)
            .await;

        let url = format!("{}/image", server.uri());
        let err = uncached().fetch(&url, &options()).await.unwrap_err();
        assert!(err.to_string().contains("unsupported content type"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("x".repeat(64), "text/plain"))
            .mount(&server)
            .await;

        let mut options = options();
        options.max_bytes = 16;
        let url = format!("{}/big", server.uri());
        let err = uncached().fetch(&url, &options).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[tokio::test]
    async fn test_fetch_serves_repeated_get_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("hello", "text/plain"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let url = format!("{}/feed", server.uri());
        let first = fetcher.fetch(&url, &options()).await.unwrap();
        let second = fetcher.fetch(&url, &options()).await.unwrap();
        assert_eq!(first.body, second.body);
        assert_eq!(first.cache_key, second.cache_key);
    }

    #[tokio::test]
    async fn test_probe_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/paper.pdf"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf"))
            .mount(&server)
            .await;

        let url = format!("{}/paper.pdf", server.uri());
        let content_type = uncached()
            .probe_content_type(&url, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(content_type.as_deref(), Some("application/pdf"));
    }
}
