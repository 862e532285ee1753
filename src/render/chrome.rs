use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport as Clip};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, warn};

use crate::app::{GleanerError, Result};
use crate::domain::{BoundingBox, PageAction, WaitUntil};
use crate::render::config::RenderConfig;
use crate::render::script;
use crate::render::{Capture, RenderEngine, RenderOutput, RenderRequest};

fn render_error(context: &str, e: impl std::fmt::Display) -> GleanerError {
    GleanerError::Render(format!("{}: {}", context, e))
}

/// Runs `step` unless `deadline` passes first. A render that runs out of time is a failed fetch.
async fn within<T>(
    deadline: tokio::time::Instant,
    request: &RenderRequest,
    step: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(GleanerError::FetchFailed(format!(
            "render of {} timed out after {}ms",
            request.url,
            request.timeout.as_millis()
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Chrome-based render engine using chromiumoxide.
///
/// The browser is launched on first use so that static-only workloads never need Chrome.
pub struct ChromeRenderer {
    browser: OnceCell<Browser>,
    config: RenderConfig,
    semaphore: Arc<Semaphore>,
}

impl ChromeRenderer {
    pub fn new(config: RenderConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            browser: OnceCell::new(),
            config,
            semaphore,
        }
    }

    async fn browser(&self) -> Result<&Browser> {
        self.browser
            .get_or_try_init(|| async {
                let mut builder = BrowserConfig::builder()
                    .arg("--no-sandbox")
                    .arg("--disable-gpu")
                    .arg("--disable-dev-shm-usage")
                    .arg("--disable-software-rasterizer");

                if !self.config.headless {
                    builder = builder.with_head();
                }

                let browser_config = builder
                    .build()
                    .map_err(|e| render_error("Failed to build browser config", e))?;

                let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
                    GleanerError::Render(format!(
                        "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
                        e
                    ))
                })?;

                tokio::spawn(async move { while handler.next().await.is_some() {} });

                debug!(headless = self.config.headless, "Browser launched");
                Ok(browser)
            })
            .await
    }

    /// Applies viewport, user agent, headers and cookies before navigation.
    async fn prepare_page(&self, page: &Page, request: &RenderRequest) -> Result<()> {
        let viewport = request.viewport.unwrap_or(self.config.default_viewport);
        page.execute(SetDeviceMetricsOverrideParams::new(
            viewport.width as i64,
            viewport.height as i64,
            1.0,
            viewport.is_mobile,
        ))
        .await
        .map_err(|e| render_error("Failed to set viewport", e))?;

        if let Some(ref ua) = self.config.user_agent {
            page.set_user_agent(ua)
                .await
                .map_err(|e| render_error("Failed to set user agent", e))?;
        }

        let headers: serde_json::Map<String, serde_json::Value> = request
            .actions
            .iter()
            .filter_map(|action| match action {
                PageAction::Header { name, value } => {
                    Some((name.clone(), serde_json::Value::String(value.clone())))
                }
                _ => None,
            })
            .collect();
        if !headers.is_empty() {
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(headers),
            )))
            .await
            .map_err(|e| render_error("Failed to set headers", e))?;
        }

        let cookies = request
            .actions
            .iter()
            .filter_map(|action| match action {
                PageAction::Cookie { name, value } => Some(
                    CookieParam::builder()
                        .name(name.clone())
                        .value(value.clone())
                        .url(request.url.clone())
                        .build()
                        .map_err(|e| render_error("Invalid cookie", e)),
                ),
                _ => None,
            })
            .collect::<Result<Vec<_>>>()?;
        if !cookies.is_empty() {
            page.set_cookies(cookies)
                .await
                .map_err(|e| render_error("Failed to set cookies", e))?;
        }
        Ok(())
    }

    async fn wait_for_network_idle(&self, page: &Page, deadline: Instant) -> Result<()> {
        let quiet = self.config.network_idle();
        let mut last_count = -1i64;
        let mut stable_since = Instant::now();
        while Instant::now() < deadline {
            let count: i64 = page
                .evaluate(script::resource_count())
                .await
                .map_err(|e| render_error("Script execution failed", e))?
                .into_value()
                .map_err(|e| render_error("Failed to parse result", e))?;
            if count != last_count {
                last_count = count;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= quiet {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }

    async fn run_actions(&self, page: &Page, actions: &[PageAction]) -> Result<()> {
        for action in actions {
            let script = match action {
                PageAction::Click { xpath } => script::click(xpath),
                PageAction::Type { xpath, value } => script::type_into(xpath, value),
                PageAction::Wait { ms } => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    continue;
                }
                PageAction::Cookie { .. } | PageAction::Header { .. } => continue,
            };
            let matched: bool = page
                .evaluate(script.as_str())
                .await
                .map_err(|e| render_error("Page action failed", e))?
                .into_value()
                .map_err(|e| render_error("Failed to parse result", e))?;
            if !matched {
                return Err(GleanerError::RequestInvalid(format!(
                    "page action target cannot be resolved: {:?}",
                    action
                )));
            }
        }
        Ok(())
    }

    async fn screenshot(&self, page: &Page, capture: &Capture) -> Result<Option<Vec<u8>>> {
        let clip = match capture {
            Capture::Clip(BoundingBox {
                x,
                y,
                width,
                height,
            }) => Clip {
                x: *x as f64,
                y: *y as f64,
                width: *width as f64,
                height: *height as f64,
                scale: 1.0,
            },
            Capture::Element(xpath) => {
                let rect: Option<Rect> = page
                    .evaluate(script::bounding_rect(xpath).as_str())
                    .await
                    .map_err(|e| render_error("Script execution failed", e))?
                    .into_value()
                    .map_err(|e| render_error("Failed to parse result", e))?;
                let Some(rect) = rect.filter(|r| r.width > 0.0 && r.height > 0.0) else {
                    return Ok(None);
                };
                Clip {
                    x: rect.x,
                    y: rect.y,
                    width: rect.width,
                    height: rect.height,
                    scale: 1.0,
                }
            }
        };

        let png = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .clip(clip)
                    .build(),
            )
            .await
            .map_err(|e| render_error("Screenshot failed", e))?;
        Ok(Some(png))
    }

    async fn render_page(&self, page: &Page, request: &RenderRequest) -> Result<RenderOutput> {
        let deadline = Instant::now() + request.timeout;
        self.prepare_page(page, request).await?;

        let console = Arc::new(Mutex::new(Vec::new()));
        let mut events = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| render_error("Failed to listen to console", e))?;
        let sink = console.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let args = event
                    .args
                    .iter()
                    .map(|arg| match (&arg.value, &arg.description) {
                        (Some(serde_json::Value::String(s)), _) => s.clone(),
                        (Some(value), _) => value.to_string(),
                        (None, Some(description)) => description.clone(),
                        (None, None) => String::new(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                if let Ok(mut lines) = sink.lock() {
                    lines.push(format!("{:?}: {}", event.r#type, args).to_lowercase());
                }
            }
        });

        page.goto(request.url.as_str())
            .await
            .map_err(|e| render_error("Navigation failed", e))?;

        match request.wait_until {
            WaitUntil::Load | WaitUntil::DomContentLoaded => {
                tokio::time::sleep(self.config.wait_after_load()).await;
            }
            WaitUntil::NetworkIdle => self.wait_for_network_idle(page, deadline).await?,
        }

        self.run_actions(page, &request.actions).await?;

        let html = page
            .content()
            .await
            .map_err(|e| render_error("Failed to read page content", e))?;
        let url = page
            .url()
            .await
            .map_err(|e| render_error("Failed to read page url", e))?
            .unwrap_or_else(|| request.url.clone());

        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| render_error("Failed to read cookies", e))?
            .into_iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        let network: Vec<String> = page
            .evaluate(script::network_log())
            .await
            .map_err(|e| render_error("Script execution failed", e))?
            .into_value()
            .map_err(|e| render_error("Failed to parse result", e))?;

        let mut screenshots = Vec::with_capacity(request.captures.len());
        for capture in &request.captures {
            screenshots.push(self.screenshot(page, capture).await?);
        }

        listener.abort();
        let console = console.lock().map(|lines| lines.clone()).unwrap_or_default();

        Ok(RenderOutput {
            url,
            html,
            screenshots,
            console,
            cookies,
            network,
            ..Default::default()
        })
    }
}

#[async_trait]
impl RenderEngine for ChromeRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        let queued = Instant::now();
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| render_error("Semaphore error", e))?;
        let queue_time = queued.elapsed();

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + request.timeout;
        let page = within(deadline, request, async {
            self.browser()
                .await?
                .new_page("about:blank")
                .await
                .map_err(|e| render_error("Failed to create page", e))
        })
        .await?;

        let result = within(deadline, request, self.render_page(&page, request)).await;

        if let Err(e) = page.close().await {
            warn!(url = %request.url, "Failed to close page: {}", e);
        }

        let mut output = result?;
        output.queue_time = queue_time;
        output.render_time = started.elapsed();
        debug!(
            url = %output.url,
            queue_ms = queue_time.as_millis() as u64,
            render_ms = output.render_time.as_millis() as u64,
            "Page rendered"
        );
        Ok(output)
    }
}
