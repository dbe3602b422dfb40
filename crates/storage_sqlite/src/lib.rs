use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use core_types::{FlowId, MessageEntry, Sender};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;

/// Identifies one shell run; the in-memory log restarts its numbering per run.
pub type RunId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedEntry {
    pub run_id: RunId,
    pub flow_id: Option<FlowId>,
    pub entry: MessageEntry,
}

/// Append-only archive of conversation log entries.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    pool: SqlitePool,
}

impl TranscriptStore {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.as_ref().to_string_lossy()
        ))?
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transcript_entries (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                flow_id TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(run_id, seq)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CURRENT_DB_SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        let version = row.get::<String, _>("value").parse::<u32>()?;
        Ok(version)
    }

    /// Archives `entries` in one transaction. Entries already archived for the
    /// run are skipped; returns how many rows were written.
    pub async fn append_entries(
        &self,
        run_id: RunId,
        flow_id: Option<&FlowId>,
        entries: &[MessageEntry],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO transcript_entries(
                    id, run_id, seq, sender, text, flow_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(entry.id.to_string())
            .bind(run_id.to_string())
            .bind(i64::try_from(entry.seq).context("sequence number out of range")?)
            .bind(entry.sender.as_str())
            .bind(&entry.text)
            .bind(flow_id.map(FlowId::as_str))
            .bind(entry.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    /// The most recent `limit` entries across runs, oldest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<ArchivedEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, seq, sender, text, flow_id, created_at FROM (
                SELECT id, run_id, seq, sender, text, flow_id, created_at, rowid
                FROM transcript_entries
                ORDER BY rowid DESC
                LIMIT ?1
            )
            ORDER BY rowid ASC
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_entry_row).collect()
    }

    pub async fn list_run(&self, run_id: RunId) -> Result<Vec<ArchivedEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_id, seq, sender, text, flow_id, created_at
            FROM transcript_entries
            WHERE run_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_entry_row).collect()
    }

    /// Drops the whole archive.
    pub async fn purge(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM transcript_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn map_entry_row(row: sqlx::sqlite::SqliteRow) -> Result<ArchivedEntry> {
    let sender = parse_sender(row.get::<String, _>("sender").as_str())?;
    let flow_id: Option<String> = row.get("flow_id");
    Ok(ArchivedEntry {
        run_id: Uuid::parse_str(row.get::<String, _>("run_id").as_str())?,
        flow_id: flow_id.map(FlowId::new),
        entry: MessageEntry {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
            seq: u64::try_from(row.get::<i64, _>("seq")).context("negative sequence number")?,
            sender,
            text: row.get("text"),
            created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        },
    })
}

fn parse_sender(value: &str) -> Result<Sender> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("invalid sender in database: {value}"))
}

fn parse_rfc3339(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc))
}
