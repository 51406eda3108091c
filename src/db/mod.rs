//! SQLite document store for incidents, narratives, clarifications and templates.
//!
//! All access goes through [`DbHandle`], which serializes connection use
//! behind a mutex and runs it on tokio's blocking pool. Every method on
//! [`Store`] is therefore atomic with respect to every other; methods that
//! touch more than one row open a transaction.

mod incidents;
mod narratives;
mod questions;
mod templates;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use rusqlite::types::Type;

/// Async-safe handle to the store.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Store>>,
}

impl DbHandle {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Open an in-memory store. Used by tests.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Store::new_in_memory()?))
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Store) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<anyhow::Error> + Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Begin a transaction spanning several `Store` calls.
    ///
    /// Store methods that open their own transaction must not run inside it.
    pub fn transaction(&self) -> Result<rusqlite::Transaction<'_>> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        self.conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure connection")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS incidents (
                    id TEXT PRIMARY KEY,
                    company_id TEXT NOT NULL,
                    participant_name TEXT NOT NULL,
                    reporter_name TEXT NOT NULL,
                    location TEXT NOT NULL DEFAULT '',
                    event_at TEXT NOT NULL,
                    capture_status TEXT NOT NULL DEFAULT 'draft',
                    overall_status TEXT NOT NULL DEFAULT 'capture_pending',
                    analysis_status TEXT NOT NULL DEFAULT 'not_started',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS phase_progress (
                    incident_id TEXT NOT NULL REFERENCES incidents(id),
                    phase TEXT NOT NULL,
                    answers_submitted INTEGER NOT NULL DEFAULT 0,
                    last_answer_at TEXT,
                    PRIMARY KEY (incident_id, phase)
                );

                CREATE TABLE IF NOT EXISTS narratives (
                    id TEXT PRIMARY KEY,
                    incident_id TEXT NOT NULL UNIQUE REFERENCES incidents(id),
                    before_event TEXT NOT NULL DEFAULT '',
                    during_event TEXT NOT NULL DEFAULT '',
                    end_event TEXT NOT NULL DEFAULT '',
                    post_event TEXT NOT NULL DEFAULT '',
                    enhanced_before_event TEXT NOT NULL DEFAULT '',
                    enhanced_during_event TEXT NOT NULL DEFAULT '',
                    enhanced_end_event TEXT NOT NULL DEFAULT '',
                    enhanced_post_event TEXT NOT NULL DEFAULT '',
                    consolidated_text TEXT,
                    merged_text TEXT,
                    content_fingerprint TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    enhanced_at TEXT
                );

                CREATE TABLE IF NOT EXISTS clarification_questions (
                    incident_id TEXT NOT NULL REFERENCES incidents(id),
                    phase TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    question_text TEXT NOT NULL,
                    question_order INTEGER NOT NULL,
                    generation_id TEXT NOT NULL,
                    model_id TEXT NOT NULL,
                    template_name TEXT NOT NULL,
                    template_version INTEGER NOT NULL,
                    ai_backed INTEGER NOT NULL,
                    lifecycle TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL,
                    retired_at TEXT,
                    PRIMARY KEY (incident_id, phase, question_id)
                );

                CREATE TABLE IF NOT EXISTS clarification_answers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    incident_id TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    question_id TEXT NOT NULL,
                    answer_text TEXT NOT NULL,
                    character_count INTEGER NOT NULL,
                    word_count INTEGER NOT NULL,
                    is_complete INTEGER NOT NULL,
                    answered_by TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (incident_id, phase, question_id),
                    FOREIGN KEY (incident_id, phase, question_id)
                        REFERENCES clarification_questions(incident_id, phase, question_id)
                );

                CREATE TABLE IF NOT EXISTS clarification_fingerprints (
                    incident_id TEXT NOT NULL REFERENCES incidents(id),
                    phase TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    generation_id TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (incident_id, phase)
                );

                CREATE TABLE IF NOT EXISTS prompt_templates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    subsystem TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    body TEXT NOT NULL,
                    model_hint TEXT,
                    lifecycle TEXT NOT NULL DEFAULT 'active',
                    usage_count INTEGER NOT NULL DEFAULT 0,
                    avg_latency_ms REAL NOT NULL DEFAULT 0,
                    success_rate REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    UNIQUE (name, version)
                );

                CREATE INDEX IF NOT EXISTS idx_questions_lookup
                    ON clarification_questions(incident_id, phase, lifecycle);
                CREATE INDEX IF NOT EXISTS idx_answers_incident
                    ON clarification_answers(incident_id, phase);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_templates_one_active
                    ON prompt_templates(name) WHERE lifecycle = 'active';
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}

/// Read a text column and parse it with `FromStr`, reporting failures as conversion errors.
fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use narrate_common::NewIncident;

    pub fn new_incident(id: &str) -> NewIncident {
        NewIncident {
            id: id.to_string(),
            company_id: "acme".to_string(),
            participant_name: "Jordan Lee".to_string(),
            reporter_name: "Sam Ortiz".to_string(),
            location: "Warehouse B, loading dock".to_string(),
            event_at: Utc.with_ymd_and_hms(2026, 3, 4, 9, 30, 0).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let store = Store::new_in_memory()?;

        let table_count: i32 = store.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN (
                'incidents', 'phase_progress', 'narratives', 'clarification_questions',
                'clarification_answers', 'clarification_fingerprints', 'prompt_templates')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 7, "Expected 7 tables to exist");

        let index_count: i32 = store.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name IN (
                'idx_questions_lookup', 'idx_answers_incident', 'idx_templates_one_active')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(index_count, 3, "Expected 3 indexes to exist");
        Ok(())
    }

    #[test]
    fn test_migrations_are_rerunnable() -> Result<()> {
        let store = Store::new_in_memory()?;
        store.run_migrations()?;
        store.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_file_backed_store_persists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("narrate.db");
        {
            let store = Store::new(&path)?;
            store.insert_incident(&test_support::new_incident("I1"))?;
        }
        let store = Store::new(&path)?;
        assert!(store.get_incident("I1")?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_call_runs_on_blocking_pool() -> Result<()> {
        let db = DbHandle::in_memory()?;
        let created = db
            .call(|s| s.insert_incident(&test_support::new_incident("I2")))
            .await?;
        assert_eq!(created.id, "I2");
        let fetched = db.call(|s| s.get_incident("I2")).await?;
        assert!(fetched.is_some());
        Ok(())
    }
}
