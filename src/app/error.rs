use thiserror::Error;

#[derive(Error, Debug)]
pub enum GleanerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A malformed scrape request. Raised before any network call.
    #[error("Invalid request: {0}")]
    RequestInvalid(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Plugin {plugin} failed: {message}")]
    PluginFailed { plugin: String, message: String },

    /// A document plugin refused to work on the input, e.g. a blacklisted host.
    #[error("Harvest aborted: {0}")]
    HarvestAborted(String),

    #[error("Harvest failed: {0}")]
    HarvestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid XPath: {0}")]
    XPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl GleanerError {
    pub fn plugin(plugin: &str, message: impl Into<String>) -> Self {
        Self::PluginFailed {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GleanerError>;
