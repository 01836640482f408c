//! Retry Event Log
//!
//! Append-only history of delivery attempts, kept for audit and diagnostics.
//! The delivery service only writes here; operators read it back.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::journal::StoreResult;
use crate::domain::{AckResult, AckStage, RetryEvent};

#[async_trait]
pub trait RetryEventLog: Send + Sync {
    async fn append(&self, event: &RetryEvent) -> StoreResult<()>;
}

/// PostgreSQL-backed retry event log
#[derive(Clone)]
pub struct PgRetryEventLog {
    pool: PgPool,
}

impl PgRetryEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All recorded attempts for a command, oldest first
    pub async fn events_for(&self, command_id: &str) -> StoreResult<Vec<RetryEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT command_id, stage, result, attempt, error, duration_ms, created_at
            FROM delivery_retry_event
            WHERE command_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(command_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<RetryEvent> {
                let stage: i32 = row.try_get("stage")?;
                let result: String = row.try_get("result")?;
                let attempt: i32 = row.try_get("attempt")?;
                Ok(RetryEvent {
                    command_id: row.try_get("command_id")?,
                    stage: AckStage::from_i32(stage),
                    result: AckResult::parse(&result),
                    attempt: attempt.max(0) as u32,
                    error: row.try_get("error")?,
                    duration_ms: row.try_get("duration_ms")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl RetryEventLog for PgRetryEventLog {
    async fn append(&self, event: &RetryEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_retry_event (
                command_id, stage, result, attempt, error, duration_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.command_id)
        .bind(event.stage.as_i32())
        .bind(event.result.as_str())
        .bind(i32::try_from(event.attempt).unwrap_or(i32::MAX))
        .bind(&event.error)
        .bind(event.duration_ms)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
