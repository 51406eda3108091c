use anyhow::{Context, Result};
use chrono::Utc;
use narrate_common::{PromptTemplate, TemplateStats};
use rusqlite::{OptionalExtension, params};

use super::{Store, parse_column};

const TEMPLATE_COLUMNS: &str = "id, name, subsystem, version, body, model_hint, lifecycle,
     usage_count, avg_latency_ms, success_rate, created_at";

fn template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptTemplate> {
    Ok(PromptTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        subsystem: row.get(2)?,
        version: row.get(3)?,
        body: row.get(4)?,
        model_hint: row.get(5)?,
        lifecycle: parse_column(row, 6)?,
        stats: TemplateStats {
            usage_count: row.get(7)?,
            avg_latency_ms: row.get(8)?,
            success_rate: row.get(9)?,
        },
        created_at: row.get(10)?,
    })
}

impl Store {
    // ── Prompt templates ──────────────────────────────────────────────

    /// Append a new active version of `name`, retiring the previous active one.
    pub fn insert_template_version(
        &self,
        name: &str,
        subsystem: &str,
        body: &str,
        model_hint: Option<&str>,
    ) -> Result<PromptTemplate> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let next_version: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM prompt_templates WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .context("Failed to compute next template version")?;

        tx.execute(
            "UPDATE prompt_templates SET lifecycle = 'retired' WHERE name = ?1 AND lifecycle = 'active'",
            params![name],
        )
        .context("Failed to retire active template")?;

        tx.execute(
            "INSERT INTO prompt_templates (name, subsystem, version, body, model_hint, lifecycle, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)",
            params![name, subsystem, next_version, body, model_hint, Utc::now()],
        )
        .context("Failed to insert template version")?;
        let id = tx.last_insert_rowid();

        tx.commit().context("Failed to commit template version")?;
        self.get_template_by_id(id)?
            .context("Template not found after insert")
    }

    pub fn get_template_by_id(&self, id: i64) -> Result<Option<PromptTemplate>> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM prompt_templates WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], template_from_row)
            .optional()
            .context("Failed to query template")
    }

    /// The active version of `name`, optionally restricted to one subsystem.
    pub fn active_template(
        &self,
        name: &str,
        subsystem: Option<&str>,
    ) -> Result<Option<PromptTemplate>> {
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM prompt_templates
             WHERE name = ?1 AND lifecycle = 'active' AND (?2 IS NULL OR subsystem = ?2)
             ORDER BY version DESC LIMIT 1"
        );
        self.conn
            .query_row(&sql, params![name, subsystem], template_from_row)
            .optional()
            .context("Failed to query active template")
    }

    /// Every version of every template, newest version first within a name.
    pub fn list_templates(&self) -> Result<Vec<PromptTemplate>> {
        let sql = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM prompt_templates ORDER BY name, version DESC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_templates")?;
        let rows = stmt
            .query_map([], template_from_row)
            .context("Failed to query templates")?;

        let mut templates = Vec::new();
        for row in rows {
            templates.push(row.context("Failed to read template row")?);
        }
        Ok(templates)
    }

    pub fn template_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM prompt_templates WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .context("Failed to check template existence")?;
        Ok(count > 0)
    }

    pub fn update_template_stats(&self, id: i64, stats: &TemplateStats) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE prompt_templates SET usage_count = ?1, avg_latency_ms = ?2, success_rate = ?3
                 WHERE id = ?4",
                params![
                    stats.usage_count,
                    stats.avg_latency_ms,
                    stats.success_rate,
                    id
                ],
            )
            .context("Failed to update template stats")?;
        anyhow::ensure!(updated == 1, "Template {} not found for stats update", id);
        Ok(())
    }
}
