use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::app::Result;
use crate::domain::Repository;
use crate::store::{DocumentPredicate, Store};

/// Enforces a repository's retention policy on its released documents.
pub struct RetentionManager {
    store: Arc<dyn Store>,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn apply(&self, corr_id: &str, repository: &Repository) -> Result<usize> {
        self.apply_at(corr_id, repository, Utc::now())
    }

    /// Returns the number of deleted documents. Both limits may fire in one pass.
    pub fn apply_at(&self, corr_id: &str, repository: &Repository, now: DateTime<Utc>) -> Result<usize> {
        let mut deleted = 0;

        if let Some(max_items) = repository.retention.max_items {
            deleted += self
                .store
                .delete_documents(&repository.id, DocumentPredicate::ReleasedBeyondNewest(max_items))?;
        }
        if let Some(max_age_days) = repository.retention.max_age_days {
            let cutoff = now - Duration::days(i64::from(max_age_days));
            deleted += self
                .store
                .delete_documents(&repository.id, DocumentPredicate::ReleasedOlderThan(cutoff))?;
        }

        if deleted > 0 {
            debug!(corr_id, repository = %repository.id, deleted, "Retention removed documents");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Document, Owner, RetentionPolicy};
    use crate::store::SqliteStore;

    fn seeded(retention: RetentionPolicy) -> (Arc<SqliteStore>, Repository, DateTime<Utc>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_owner(&Owner::new("o", "O")).unwrap();
        let mut repository = Repository::new("o", "R", "1h");
        repository.retention = retention;
        store.add_repository(&repository).unwrap();

        let now = Utc::now();
        for i in 0..5 {
            let mut document = Document::new(&repository.id, &format!("https://example.com/{}", i));
            document.set_published_at(now - Duration::days(i * 10));
            store.upsert_document(&document).unwrap();
        }
        (store, repository, now)
    }

    #[test]
    fn test_max_items_keeps_newest() {
        let (store, repository, now) = seeded(RetentionPolicy {
            max_items: Some(2),
            max_age_days: None,
        });
        let manager = RetentionManager::new(store.clone());

        assert_eq!(manager.apply_at("t", &repository, now).unwrap(), 3);
        let urls: Vec<_> = store
            .get_documents(&repository.id)
            .unwrap()
            .into_iter()
            .map(|d| d.url)
            .collect();
        assert_eq!(urls, vec!["https://example.com/0", "https://example.com/1"]);
    }

    #[test]
    fn test_max_age_and_max_items_both_apply() {
        let (store, repository, now) = seeded(RetentionPolicy {
            max_items: Some(4),
            max_age_days: Some(25),
        });
        let manager = RetentionManager::new(store.clone());

        assert_eq!(manager.apply_at("t", &repository, now).unwrap(), 2);
        assert_eq!(store.get_documents(&repository.id).unwrap().len(), 3);
    }

    #[test]
    fn test_no_policy_keeps_everything() {
        let (store, repository, now) = seeded(RetentionPolicy::default());
        let manager = RetentionManager::new(store.clone());
        assert_eq!(manager.apply_at("t", &repository, now).unwrap(), 0);
        assert_eq!(store.get_documents(&repository.id).unwrap().len(), 5);
    }
}
