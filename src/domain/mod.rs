pub mod document;
pub mod feed;
pub mod repository;
pub mod request;
pub mod response;

pub use document::{Document, ReleaseStatus};
pub use feed::{FeedCandidate, FeedItem, FeedType, GenericFeedRule, NativeFeed, NormalizedFeed};
pub use repository::{HarvestState, Owner, PluginExecution, Repository, RetentionPolicy, Source};
pub use request::{
    BoundingBox, EmitSpec, EmitType, FragmentSpec, PageAction, RenderDirectives, ScrapeRequest,
    Viewport, WaitUntil,
};
pub use response::{
    EmittedData, ExtractedArticle, ScrapeDebug, ScrapeMetrics, ScrapeResponse, ScrapedElement,
    ScrapedFeeds,
};
