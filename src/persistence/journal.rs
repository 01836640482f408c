//! Delivery Journal
//!
//! Durable table of command delivery state keyed by `command_id`.
//! Every mutation is conditional on the row still being in a non-terminal
//! status, so concurrent writers racing on one command converge and a
//! terminal entry is never reopened.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, instrument};

use crate::domain::{AckStage, DeliveryStatus, JournalEntry, StatusUpdate};
use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage interface for the delivery journal
#[async_trait]
pub trait DeliveryJournal: Send + Sync {
    /// Insert a new entry; returns `false` when the command id already exists
    async fn insert(&self, entry: &JournalEntry) -> StoreResult<bool>;

    async fn get(&self, command_id: &str) -> StoreResult<Option<JournalEntry>>;

    /// Apply a status transition.
    ///
    /// Returns `false` without writing when the stored entry is already
    /// terminal, and `StoreError::NotFound` when there is no such row.
    async fn update_status(&self, command_id: &str, update: &StatusUpdate) -> StoreResult<bool>;

    /// Mark an entry acknowledged at `stage` and clear its deadline
    async fn mark_acked(&self, command_id: &str, stage: AckStage) -> StoreResult<bool>;

    /// Persist the resolved owning executor
    async fn assign_agent(&self, command_id: &str, agent_id: &str) -> StoreResult<bool>;

    /// Non-terminal entries whose deadline is at or before `before`, oldest first
    async fn due_entries(&self, before: DateTime<Utc>, limit: i64)
        -> StoreResult<Vec<JournalEntry>>;
}

const ENTRY_COLUMNS: &str = r#"
    command_id, trade_id, agent_id, target_account_id, command_type, payload,
    stage, status, attempt, next_retry_at, last_error, created_at, updated_at
"#;

fn decode_err(message: String) -> StoreError {
    StoreError::Database(sqlx::Error::Decode(message.into()))
}

fn row_to_entry(row: &PgRow) -> StoreResult<JournalEntry> {
    let command_type: String = row.try_get("command_type")?;
    let status: String = row.try_get("status")?;
    let stage: i32 = row.try_get("stage")?;
    let attempt: i32 = row.try_get("attempt")?;

    Ok(JournalEntry {
        command_id: row.try_get("command_id")?,
        trade_id: row.try_get("trade_id")?,
        agent_id: row.try_get("agent_id")?,
        target_account_id: row.try_get("target_account_id")?,
        command_type: command_type.parse().map_err(decode_err)?,
        payload: row.try_get("payload")?,
        stage: AckStage::from_i32(stage),
        status: status.parse().map_err(decode_err)?,
        attempt: attempt.max(0) as u32,
        next_retry_at: row.try_get("next_retry_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn attempt_column(attempt: u32) -> i32 {
    i32::try_from(attempt).unwrap_or(i32::MAX)
}

/// PostgreSQL-backed journal
#[derive(Clone)]
pub struct PgDeliveryJournal {
    pool: PgPool,
}

impl PgDeliveryJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish "terminal" from "missing" after a conditional update hit no rows
    async fn terminal_or_missing(&self, command_id: &str) -> StoreResult<bool> {
        let exists = sqlx::query("SELECT 1 FROM delivery_journal WHERE command_id = $1")
            .bind(command_id)
            .fetch_optional(&self.pool)
            .await?;

        match exists {
            Some(_) => {
                debug!(command_id, "journal row already terminal, update skipped");
                Ok(false)
            }
            None => Err(StoreError::NotFound(command_id.to_string())),
        }
    }

    /// Entries in a given status, most recently updated first
    pub async fn list_by_status(
        &self,
        status: DeliveryStatus,
        limit: i64,
    ) -> StoreResult<Vec<JournalEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM delivery_journal WHERE status = $1 ORDER BY updated_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Row count per delivery status
    pub async fn status_counts(&self) -> StoreResult<Vec<(DeliveryStatus, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM delivery_journal
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<(DeliveryStatus, i64)> {
                let status: String = row.try_get("status")?;
                let count: i64 = row.try_get("count")?;
                Ok((status.parse().map_err(decode_err)?, count))
            })
            .collect()
    }
}

#[async_trait]
impl DeliveryJournal for PgDeliveryJournal {
    #[instrument(skip(self, entry), fields(command_id = %entry.command_id))]
    async fn insert(&self, entry: &JournalEntry) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO delivery_journal (
                command_id, trade_id, agent_id, target_account_id, command_type,
                payload, stage, status, attempt, next_retry_at, last_error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (command_id) DO NOTHING
            "#,
        )
        .bind(&entry.command_id)
        .bind(&entry.trade_id)
        .bind(&entry.agent_id)
        .bind(&entry.target_account_id)
        .bind(entry.command_type.as_str())
        .bind(&entry.payload)
        .bind(entry.stage.as_i32())
        .bind(entry.status.as_str())
        .bind(attempt_column(entry.attempt))
        .bind(entry.next_retry_at)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, command_id: &str) -> StoreResult<Option<JournalEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM delivery_journal WHERE command_id = $1");
        let row = sqlx::query(&sql)
            .bind(command_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    #[instrument(skip(self, update), fields(status = %update.status, attempt = update.attempt))]
    async fn update_status(&self, command_id: &str, update: &StatusUpdate) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_journal
            SET stage = GREATEST(stage, $2),
                status = $3,
                attempt = GREATEST(attempt, $4),
                next_retry_at = $5,
                last_error = $6,
                updated_at = NOW()
            WHERE command_id = $1
              AND status IN ('pending', 'inflight')
            "#,
        )
        .bind(command_id)
        .bind(update.stage.as_i32())
        .bind(update.status.as_str())
        .bind(attempt_column(update.attempt))
        .bind(update.next_retry_at)
        .bind(&update.last_error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.terminal_or_missing(command_id).await;
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn mark_acked(&self, command_id: &str, stage: AckStage) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_journal
            SET stage = GREATEST(stage, $2),
                status = 'acked',
                next_retry_at = NULL,
                updated_at = NOW()
            WHERE command_id = $1
              AND status IN ('pending', 'inflight')
            "#,
        )
        .bind(command_id)
        .bind(stage.as_i32())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.terminal_or_missing(command_id).await;
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn assign_agent(&self, command_id: &str, agent_id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_journal
            SET agent_id = $2,
                updated_at = NOW()
            WHERE command_id = $1
              AND status IN ('pending', 'inflight')
            "#,
        )
        .bind(command_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.terminal_or_missing(command_id).await;
        }
        Ok(true)
    }

    async fn due_entries(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<JournalEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM delivery_journal
            WHERE status IN ('pending', 'inflight')
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= $1
            ORDER BY next_retry_at ASC
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_entry).collect()
    }
}
