use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::FeedItem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    #[default]
    Released,
    Pending,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Released => "released",
            ReleaseStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ReleaseStatus::Pending,
            _ => ReleaseStatus::Released,
        }
    }
}

/// A harvested item after the plugin pipeline, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub repository_id: String,
    pub url: String,
    pub alias_url: Option<String>,
    pub title: Option<String>,
    pub content_text: Option<String>,
    pub content_raw: Option<String>,
    pub content_raw_mime: Option<String>,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    pub status: ReleaseStatus,
    pub published_at: DateTime<Utc>,
    /// Whether `published_at` came from the source rather than the harvest clock.
    /// An undated re-harvest keeps the stored date.
    #[serde(skip)]
    pub dated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(repository_id: &str, url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Self::generate_id(repository_id, url),
            repository_id: repository_id.to_string(),
            url: url.to_string(),
            alias_url: None,
            title: None,
            content_text: None,
            content_raw: None,
            content_raw_mime: None,
            image_url: None,
            tags: Vec::new(),
            status: ReleaseStatus::Released,
            published_at: now,
            dated: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same repository and URL always yield the same id.
    pub fn generate_id(repository_id: &str, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(repository_id.as_bytes());
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn from_item(repository_id: &str, item: &FeedItem) -> Self {
        let mut document = Self::new(repository_id, &item.url);
        document.title = item.title.clone();
        document.content_text = item.content_text.clone();
        document.content_raw = item.content_raw.clone();
        document.content_raw_mime = item.content_raw_mime.clone();
        document.image_url = item.image_url.clone();
        document.tags = item.tags.clone();
        if let Some(published_at) = item.published_at {
            document.set_published_at(published_at);
        }
        document
    }

    pub fn set_published_at(&mut self, published_at: DateTime<Utc>) {
        self.published_at = published_at;
        self.dated = true;
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}
