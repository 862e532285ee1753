pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{Document, Owner, Repository, Source};

pub use sqlite::SqliteStore;

/// Outcome of a finished harvest as written back to the repository row.
/// Applying it also releases the repository (`harvest_state = idle`).
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleUpdate {
    pub next_harvest_at: DateTime<Utc>,
    pub failure_count: u32,
    /// Set when the harvest stored new documents.
    pub last_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Which documents of a repository to delete. Pending documents are never matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DocumentPredicate {
    /// Released documents except the newest `n` by publication time.
    ReleasedBeyondNewest(u32),
    ReleasedOlderThan(DateTime<Utc>),
}

pub trait Store: Send + Sync {
    // Owner operations
    fn add_owner(&self, owner: &Owner) -> Result<()>;
    fn get_owner(&self, id: &str) -> Result<Option<Owner>>;
    fn set_owner_locked(&self, id: &str, locked: bool) -> Result<()>;

    // Repository operations
    fn add_repository(&self, repository: &Repository) -> Result<()>;
    fn get_repository(&self, id: &str) -> Result<Option<Repository>>;
    fn get_all_repositories(&self) -> Result<Vec<Repository>>;
    fn set_repository_archived(&self, id: &str, archived: bool) -> Result<()>;

    // Source operations
    fn add_source(&self, source: &Source) -> Result<()>;
    fn get_sources(&self, repository_id: &str) -> Result<Vec<Source>>;
    fn count_active_sources(&self, owner_id: &str) -> Result<usize>;
    fn mark_source_erroneous(&self, source_id: &str, message: &str) -> Result<()>;
    fn clear_source_error(&self, source_id: &str) -> Result<()>;

    // Scheduling
    /// Idle, unarchived repositories of unlocked owners that are due at `now`,
    /// least recently updated first.
    fn find_due_repositories(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Repository>>;
    /// Atomically moves the repository from idle to running; false if it was not idle.
    fn claim_repository(&self, id: &str) -> Result<bool>;
    /// Releases repositories left running by a previous process.
    fn reset_running_repositories(&self) -> Result<usize>;
    fn update_schedule(&self, id: &str, update: &ScheduleUpdate) -> Result<()>;

    // Document operations
    fn upsert_document(&self, document: &Document) -> Result<UpsertOutcome>;
    fn get_document_by_url(&self, repository_id: &str, url: &str) -> Result<Option<Document>>;
    /// Newest first.
    fn get_documents(&self, repository_id: &str) -> Result<Vec<Document>>;
    fn delete_documents(&self, repository_id: &str, predicate: DocumentPredicate) -> Result<usize>;
}
