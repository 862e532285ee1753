//! Headless-browser rendering for scrape requests that carry render directives.
//!
//! ```text
//! ScrapeRequest (render) → RenderRequest → RenderEngine → RenderOutput → ScrapeEngine
//! ```
//!
//! The engine loads the page, replays the page actions, waits for the requested
//! condition and returns the DOM snapshot together with the page's console log,
//! cookies, network log, PNG crops for every requested capture and timing.

mod chrome;
mod config;
mod script;

pub use chrome::ChromeRenderer;
pub use config::RenderConfig;

use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;
use crate::domain::{BoundingBox, PageAction, RenderDirectives, Viewport, WaitUntil};

/// Region of the rendered page to screenshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    Clip(BoundingBox),
    /// Bounding box of the first node matching the XPath.
    Element(String),
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: String,
    pub viewport: Option<Viewport>,
    pub wait_until: WaitUntil,
    pub actions: Vec<PageAction>,
    pub captures: Vec<Capture>,
    pub timeout: Duration,
}

impl RenderRequest {
    pub fn new(url: &str, directives: &RenderDirectives, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            viewport: directives.viewport,
            wait_until: directives.wait_until,
            actions: directives.actions.clone(),
            captures: Vec::new(),
            timeout,
        }
    }

    /// Registers a capture and returns its index in `RenderOutput::screenshots`.
    pub fn capture(&mut self, capture: Capture) -> usize {
        if let Some(index) = self.captures.iter().position(|c| *c == capture) {
            return index;
        }
        self.captures.push(capture);
        self.captures.len() - 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// URL of the page after navigation and actions.
    pub url: String,
    pub html: String,
    /// PNG per capture, index-aligned with `RenderRequest::captures`; `None` when the
    /// capture could not be taken.
    pub screenshots: Vec<Option<Vec<u8>>>,
    pub console: Vec<String>,
    pub cookies: Vec<String>,
    pub network: Vec<String>,
    pub queue_time: Duration,
    pub render_time: Duration,
}

/// Trait for page rendering implementations
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput>;
}
