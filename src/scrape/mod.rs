//! Scrape engine: fetch or render a page and extract typed payloads from it.
//!
//! ```text
//! ScrapeRequest → validate → static GET | render → feed short-circuit | emit specs → ScrapeResponse
//! ```

mod engine;
pub mod readability;

pub use engine::ScrapeEngine;
pub use readability::{ReadabilityExtractor, ReadabilityOptions};
