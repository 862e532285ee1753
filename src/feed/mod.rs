//! Feed type detection, the feed body parser chain and the feed service.

pub mod detect;
pub mod normalize;
pub mod parser;
mod service;

pub use detect::{detect, detect_response, sniff};
pub use normalize::{html_to_text, normalize};
pub use parser::{FeedBodyParser, FeedParserChain, JsonFeedParser, NullFeedParser, XmlFeedParser};
pub use service::FeedService;
