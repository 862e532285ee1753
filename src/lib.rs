//! # Gleaner
//!
//! A scrape-and-harvest pipeline: turns declarative scrape requests into structured
//! payloads and feeds, and harvests configured repositories on a schedule.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher / RenderEngine → ScrapeEngine → Plugins → Store
//!                                  ↑
//!                         HarvestScheduler (tick, claim, backoff)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Look at a page
//! gleaner scrape https://example.com --emit text,feeds
//!
//! # Create a repository and give it a source
//! gleaner repo add "Rust news" --refresh 1h
//! gleaner source add <repository-id> https://blog.rust-lang.org/feed.xml
//!
//! # Harvest whatever is due, once
//! gleaner harvest --once
//! ```

/// Application context, correlation ids and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together store, scrape engine,
/// plugin registry and configuration.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/gleaner/config.toml`.
pub mod config;

/// Background daemon running the harvest scheduler.
///
/// - `gleaner daemon start` - Start the background scheduler
/// - `gleaner daemon stop` - Stop the daemon
/// - `gleaner daemon status` - Check if daemon is running
pub mod daemon;

/// Feed discovery: native `<link rel="alternate">` feeds and generic repeating-element rules.
pub mod discovery;

/// XPath evaluation and DOM helpers over `scraper` documents.
pub mod dom;

/// Core domain models: requests, responses, feeds, repositories and documents.
pub mod domain;

/// Per-owner limits.
pub mod entitlements;

/// Feed type detection, the feed parser chain and the synchronous feed entry points.
pub mod feed;

/// Guarded HTTP fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for GETs with status, content-type and size guards
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation with a short-lived cache
pub mod fetcher;

/// Scheduled harvesting, retention and backoff.
pub mod harvest;

/// Fragment-transform and document plugins.
pub mod plugins;

/// Headless browser rendering via chromiumoxide.
pub mod render;

/// The scrape engine and readability extraction.
pub mod scrape;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
