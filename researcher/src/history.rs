use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::search::SearchResult;

/// What a research call returns and what is persisted for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPayload {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub summary: String,
}

/// A persisted research run. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub id: i64,
    pub query: String,
    pub results: ResearchPayload,
    pub timestamp: String,
}

/// Append-only log of research runs backed by a single SQLite table.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the history table if it does not exist yet. Idempotent.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS research_history (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                query     TEXT NOT NULL,
                results   TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure research_history table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_research_history_timestamp ON research_history (timestamp)")
            .execute(&self.pool)
            .await
            .context("failed to ensure research_history index")?;

        info!("history: schema ensured");
        Ok(())
    }

    /// Insert a new row for `query`. Returns the id assigned by SQLite.
    pub async fn save(&self, query: &str, payload: &ResearchPayload) -> Result<i64> {
        let results_json = serde_json::to_string(payload).context("failed to serialize research payload")?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO research_history (query, results, timestamp) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(query)
        .bind(&results_json)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert research record")?;

        info!("history: stored record {} for '{}'", id, query);
        Ok(id)
    }

    /// Every record, newest first.
    pub async fn list_all(&self) -> Result<Vec<ResearchRecord>> {
        let rows = sqlx::query(
            "SELECT id, query, results, timestamp FROM research_history ORDER BY timestamp DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to query research history")?;

        rows.iter().map(record_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<ResearchRecord>> {
        let row = sqlx::query("SELECT id, query, results, timestamp FROM research_history WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to query research record {}", id))?;

        row.as_ref().map(record_from_row).transpose()
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ResearchRecord> {
    let id: i64 = row.try_get("id")?;
    let results_json: String = row.try_get("results")?;
    let results: ResearchPayload = serde_json::from_str(&results_json)
        .with_context(|| format!("corrupt results payload in record {}", id))?;

    Ok(ResearchRecord {
        id,
        query: row.try_get("query")?,
        results,
        timestamp: row.try_get("timestamp")?,
    })
}
