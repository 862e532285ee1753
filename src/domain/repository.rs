use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ScrapeRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub name: String,
    pub locked: bool,
}

impl Owner {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            locked: false,
        }
    }
}

/// Limits applied after each harvest. Unset fields do not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_items: Option<u32>,
    pub max_age_days: Option<u32>,
}

/// One entry of a repository's ordered plugin list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginExecution {
    pub plugin_id: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl PluginExecution {
    pub fn new(plugin_id: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestState {
    #[default]
    Idle,
    Running,
}

impl HarvestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestState::Idle => "idle",
            HarvestState::Running => "running",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => HarvestState::Running,
            _ => HarvestState::Idle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub repository_id: String,
    pub title: Option<String>,
    pub request: ScrapeRequest,
    pub erroneous: bool,
    pub last_error_message: Option<String>,
    pub tags: Vec<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn new(repository_id: &str, request: ScrapeRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            repository_id: repository_id.to_string(),
            title: None,
            request,
            erroneous: false,
            last_error_message: None,
            tags: Vec::new(),
            last_run_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.request.url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    /// Cron expression or interval shorthand. Empty means never scheduled.
    pub refresh_expression: String,
    pub retention: RetentionPolicy,
    pub plugins: Vec<PluginExecution>,
    pub sources: Vec<Source>,
    pub archived: bool,
    pub disabled_from: Option<DateTime<Utc>>,
    pub next_harvest_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub harvest_state: HarvestState,
    pub failure_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn new(owner_id: &str, title: impl Into<String>, refresh_expression: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: title.into(),
            refresh_expression: refresh_expression.into(),
            retention: RetentionPolicy::default(),
            plugins: Vec::new(),
            sources: Vec::new(),
            archived: false,
            disabled_from: None,
            next_harvest_at: None,
            last_updated_at: now,
            harvest_state: HarvestState::Idle,
            failure_count: 0,
            created_at: now,
        }
    }

    pub fn add_source(&mut self, request: ScrapeRequest) -> &mut Source {
        let source = Source::new(&self.id, request);
        self.sources.push(source);
        let last = self.sources.len() - 1;
        &mut self.sources[last]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_repository_is_idle_and_unscheduled() {
        let repository = Repository::new("owner", "News", "1h");
        assert_eq!(repository.harvest_state, HarvestState::Idle);
        assert!(repository.next_harvest_at.is_none());
        assert_eq!(repository.failure_count, 0);
    }

    #[test]
    fn test_add_source_links_repository() {
        let mut repository = Repository::new("owner", "News", "1h");
        let id = repository.id.clone();
        let source = repository.add_source(ScrapeRequest::new("https://example.com"));
        assert_eq!(source.repository_id, id);
        assert_eq!(source.display_title(), "https://example.com");
    }

    #[test]
    fn test_harvest_state_round_trip_strings() {
        assert_eq!(HarvestState::parse("running"), HarvestState::Running);
        assert_eq!(HarvestState::parse(HarvestState::Idle.as_str()), HarvestState::Idle);
    }
}
