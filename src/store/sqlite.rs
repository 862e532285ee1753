use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};
use serde::de::DeserializeOwned;

use crate::app::{GleanerError, Result};
use crate::domain::{
    Document, HarvestState, Owner, ReleaseStatus, Repository, RetentionPolicy, Source,
};
use crate::store::{DocumentPredicate, ScheduleUpdate, Store, UpsertOutcome};

const REPOSITORY_COLUMNS: &str = "id, owner_id, title, refresh_expression, retention_max_items,
     retention_max_age_days, plugins, archived, disabled_from, next_harvest_at, last_updated_at,
     harvest_state, failure_count, created_at";

const SOURCE_COLUMNS: &str = "id, repository_id, title, request, erroneous, last_error_message,
     tags, last_run_at, created_at";

const DOCUMENT_COLUMNS: &str = "id, repository_id, url, alias_url, title, content_text,
     content_raw, content_raw_mime, image_url, tags, status, published_at, created_at, updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC timestamps, so that SQL string comparison orders them correctly.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| s.parse::<DateTime<Utc>>().ok())
}

fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)
        .ok()
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

fn optional_datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        refresh_expression: row.get(3)?,
        retention: RetentionPolicy {
            max_items: row.get(4)?,
            max_age_days: row.get(5)?,
        },
        plugins: json_column(row, 6)?,
        sources: Vec::new(),
        archived: row.get(7)?,
        disabled_from: optional_datetime_column(row, 8)?,
        next_harvest_at: optional_datetime_column(row, 9)?,
        last_updated_at: datetime_column(row, 10)?,
        harvest_state: HarvestState::parse(&row.get::<_, String>(11)?),
        failure_count: row.get(12)?,
        created_at: datetime_column(row, 13)?,
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        title: row.get(2)?,
        request: json_column(row, 3)?,
        erroneous: row.get(4)?,
        last_error_message: row.get(5)?,
        tags: json_column(row, 6)?,
        last_run_at: optional_datetime_column(row, 7)?,
        created_at: datetime_column(row, 8)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        url: row.get(2)?,
        alias_url: row.get(3)?,
        title: row.get(4)?,
        content_text: row.get(5)?,
        content_raw: row.get(6)?,
        content_raw_mime: row.get(7)?,
        image_url: row.get(8)?,
        tags: json_column(row, 9)?,
        status: ReleaseStatus::parse(&row.get::<_, String>(10)?),
        published_at: datetime_column(row, 11)?,
        dated: true,
        created_at: datetime_column(row, 12)?,
        updated_at: datetime_column(row, 13)?,
    })
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            GleanerError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.lock()?;

        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|_| GleanerError::Database(rusqlite::Error::InvalidQuery))?;

        Ok(())
    }

    fn load_sources(conn: &Connection, repository_id: &str) -> Result<Vec<Source>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sources WHERE repository_id = ?1 ORDER BY position, created_at",
            SOURCE_COLUMNS
        ))?;
        let sources = stmt
            .query_map(params![repository_id], source_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn load_repositories(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Repository>> {
        let mut stmt = conn.prepare(sql)?;
        let mut repositories = stmt
            .query_map(params, repository_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for repository in &mut repositories {
            repository.sources = Self::load_sources(conn, &repository.id)?;
        }
        Ok(repositories)
    }

    fn insert_source(conn: &Connection, source: &Source) -> Result<()> {
        conn.execute(
            "INSERT INTO sources (id, repository_id, position, title, request, erroneous,
                                  last_error_message, tags, last_run_at, created_at)
             VALUES (?1, ?2, (SELECT COUNT(*) FROM sources WHERE repository_id = ?2),
                     ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                source.id,
                source.repository_id,
                source.title,
                serde_json::to_string(&source.request)?,
                source.erroneous,
                source.last_error_message,
                serde_json::to_string(&source.tags)?,
                source.last_run_at.as_ref().map(format_datetime),
                format_datetime(&source.created_at),
            ],
        )?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn add_owner(&self, owner: &Owner) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO owners (id, name, locked, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![owner.id, owner.name, owner.locked, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn get_owner(&self, id: &str) -> Result<Option<Owner>> {
        let conn = self.lock()?;
        let owner = conn
            .query_row(
                "SELECT id, name, locked FROM owners WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Owner {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        locked: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(owner)
    }

    fn set_owner_locked(&self, id: &str, locked: bool) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("UPDATE owners SET locked = ?2 WHERE id = ?1", params![id, locked])?;
        Ok(())
    }

    fn add_repository(&self, repository: &Repository) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO repositories (id, owner_id, title, refresh_expression, retention_max_items,
                                       retention_max_age_days, plugins, archived, disabled_from,
                                       next_harvest_at, last_updated_at, harvest_state,
                                       failure_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                repository.id,
                repository.owner_id,
                repository.title,
                repository.refresh_expression,
                repository.retention.max_items,
                repository.retention.max_age_days,
                serde_json::to_string(&repository.plugins)?,
                repository.archived,
                repository.disabled_from.as_ref().map(format_datetime),
                repository.next_harvest_at.as_ref().map(format_datetime),
                format_datetime(&repository.last_updated_at),
                repository.harvest_state.as_str(),
                repository.failure_count,
                format_datetime(&repository.created_at),
            ],
        )?;
        for source in &repository.sources {
            Self::insert_source(&tx, source)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let conn = self.lock()?;
        let repositories = Self::load_repositories(
            &conn,
            &format!("SELECT {} FROM repositories WHERE id = ?1", REPOSITORY_COLUMNS),
            params![id],
        )?;
        Ok(repositories.into_iter().next())
    }

    fn get_all_repositories(&self) -> Result<Vec<Repository>> {
        let conn = self.lock()?;
        Self::load_repositories(
            &conn,
            &format!(
                "SELECT {} FROM repositories ORDER BY title COLLATE NOCASE, created_at",
                REPOSITORY_COLUMNS
            ),
            [],
        )
    }

    fn set_repository_archived(&self, id: &str, archived: bool) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE repositories SET archived = ?2 WHERE id = ?1",
            params![id, archived],
        )?;
        if changed == 0 {
            return Err(GleanerError::RepositoryNotFound(id.to_string()));
        }
        Ok(())
    }

    fn add_source(&self, source: &Source) -> Result<()> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM repositories WHERE id = ?1)",
            params![source.repository_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(GleanerError::RepositoryNotFound(source.repository_id.clone()));
        }
        Self::insert_source(&conn, source)
    }

    fn get_sources(&self, repository_id: &str) -> Result<Vec<Source>> {
        let conn = self.lock()?;
        Self::load_sources(&conn, repository_id)
    }

    fn count_active_sources(&self, owner_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sources s JOIN repositories r ON r.id = s.repository_id
             WHERE r.owner_id = ?1 AND r.archived = 0",
            params![owner_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn mark_source_erroneous(&self, source_id: &str, message: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sources SET erroneous = 1, last_error_message = ?2, last_run_at = ?3 WHERE id = ?1",
            params![source_id, message, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn clear_source_error(&self, source_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sources SET erroneous = 0, last_error_message = NULL, last_run_at = ?2 WHERE id = ?1",
            params![source_id, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn find_due_repositories(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Repository>> {
        let conn = self.lock()?;
        let columns = REPOSITORY_COLUMNS
            .split(',')
            .map(|c| format!("r.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        Self::load_repositories(
            &conn,
            &format!(
                "SELECT {} FROM repositories r JOIN owners o ON o.id = r.owner_id
                 WHERE r.archived = 0
                   AND o.locked = 0
                   AND r.refresh_expression != ''
                   AND r.harvest_state = 'idle'
                   AND (r.disabled_from IS NULL OR r.disabled_from > ?1)
                   AND (r.next_harvest_at IS NULL OR r.next_harvest_at <= ?1)
                 ORDER BY r.last_updated_at ASC, r.created_at ASC
                 LIMIT ?2",
                columns
            ),
            params![format_datetime(&now), limit as i64],
        )
    }

    fn claim_repository(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE repositories SET harvest_state = 'running' WHERE id = ?1 AND harvest_state = 'idle'",
            params![id],
        )?;
        Ok(changed == 1)
    }

    fn reset_running_repositories(&self) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE repositories SET harvest_state = 'idle' WHERE harvest_state = 'running'",
            [],
        )?;
        Ok(changed)
    }

    fn update_schedule(&self, id: &str, update: &ScheduleUpdate) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE repositories SET
                next_harvest_at = ?2,
                failure_count = ?3,
                last_updated_at = COALESCE(?4, last_updated_at),
                harvest_state = 'idle'
             WHERE id = ?1",
            params![
                id,
                format_datetime(&update.next_harvest_at),
                update.failure_count,
                update.last_updated_at.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn upsert_document(&self, document: &Document) -> Result<UpsertOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE repository_id = ?1 AND url = ?2)",
            params![document.repository_id, document.url],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO documents (id, repository_id, url, alias_url, title, content_text,
                                    content_raw, content_raw_mime, image_url, tags, status,
                                    published_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT (repository_id, url) DO UPDATE SET
                alias_url = excluded.alias_url,
                title = excluded.title,
                content_text = excluded.content_text,
                content_raw = excluded.content_raw,
                content_raw_mime = excluded.content_raw_mime,
                image_url = excluded.image_url,
                tags = excluded.tags,
                published_at = CASE WHEN ?15 THEN excluded.published_at ELSE published_at END,
                updated_at = excluded.updated_at",
            params![
                document.id,
                document.repository_id,
                document.url,
                document.alias_url,
                document.title,
                document.content_text,
                document.content_raw,
                document.content_raw_mime,
                document.image_url,
                serde_json::to_string(&document.tags)?,
                document.status.as_str(),
                format_datetime(&document.published_at),
                format_datetime(&document.created_at),
                format_datetime(&document.updated_at),
                document.dated,
            ],
        )?;

        tx.commit()?;
        Ok(if exists {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    fn get_document_by_url(&self, repository_id: &str, url: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let document = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE repository_id = ?1 AND url = ?2",
                    DOCUMENT_COLUMNS
                ),
                params![repository_id, url],
                document_from_row,
            )
            .optional()?;
        Ok(document)
    }

    fn get_documents(&self, repository_id: &str) -> Result<Vec<Document>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE repository_id = ?1
             ORDER BY published_at DESC, created_at DESC",
            DOCUMENT_COLUMNS
        ))?;
        let documents = stmt
            .query_map(params![repository_id], document_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(documents)
    }

    fn delete_documents(&self, repository_id: &str, predicate: DocumentPredicate) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = match predicate {
            DocumentPredicate::ReleasedBeyondNewest(keep) => conn.execute(
                "DELETE FROM documents
                 WHERE repository_id = ?1 AND status = 'released'
                   AND id NOT IN (
                       SELECT id FROM documents
                       WHERE repository_id = ?1 AND status = 'released'
                       ORDER BY published_at DESC, created_at DESC
                       LIMIT ?2)",
                params![repository_id, keep],
            )?,
            DocumentPredicate::ReleasedOlderThan(cutoff) => conn.execute(
                "DELETE FROM documents
                 WHERE repository_id = ?1 AND status = 'released' AND published_at < ?2",
                params![repository_id, format_datetime(&cutoff)],
            )?,
        };
        Ok(deleted)
    }
}
