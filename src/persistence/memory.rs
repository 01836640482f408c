//! In-memory journal backends for dry-run mode and tests.
//!
//! State lives only as long as the process. Transient failures can be
//! injected to exercise the storage-retry path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use super::journal::{DeliveryJournal, StoreResult};
use super::retry_events::RetryEventLog;
use crate::domain::{AckStage, DeliveryStatus, JournalEntry, RetryEvent, StatusUpdate};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryJournal {
    entries: RwLock<HashMap<String, JournalEntry>>,
    injected_failures: AtomicU32,
    calls: AtomicU32,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` operations with a transient error
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of backend operations attempted so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<JournalEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    fn check_fault(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    /// Apply `mutate` to a live row; `Ok(false)` for terminal rows
    async fn mutate_live<F>(&self, command_id: &str, mutate: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut JournalEntry),
    {
        self.check_fault()?;
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(command_id)
            .ok_or_else(|| StoreError::NotFound(command_id.to_string()))?;

        if entry.status.is_terminal() {
            return Ok(false);
        }
        mutate(entry);
        entry.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl DeliveryJournal for MemoryJournal {
    async fn insert(&self, entry: &JournalEntry) -> StoreResult<bool> {
        self.check_fault()?;
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.command_id) {
            return Ok(false);
        }
        entries.insert(entry.command_id.clone(), entry.clone());
        Ok(true)
    }

    async fn get(&self, command_id: &str) -> StoreResult<Option<JournalEntry>> {
        self.check_fault()?;
        Ok(self.entries.read().await.get(command_id).cloned())
    }

    async fn update_status(&self, command_id: &str, update: &StatusUpdate) -> StoreResult<bool> {
        self.mutate_live(command_id, |entry| {
            entry.stage = entry.stage.max(update.stage);
            entry.status = update.status;
            entry.attempt = entry.attempt.max(update.attempt);
            entry.next_retry_at = update.next_retry_at;
            entry.last_error = update.last_error.clone();
        })
        .await
    }

    async fn mark_acked(&self, command_id: &str, stage: AckStage) -> StoreResult<bool> {
        self.mutate_live(command_id, |entry| {
            entry.stage = entry.stage.max(stage);
            entry.status = DeliveryStatus::Acked;
            entry.next_retry_at = None;
        })
        .await
    }

    async fn assign_agent(&self, command_id: &str, agent_id: &str) -> StoreResult<bool> {
        self.mutate_live(command_id, |entry| {
            entry.agent_id = agent_id.to_string();
        })
        .await
    }

    async fn due_entries(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<JournalEntry>> {
        self.check_fault()?;
        let entries = self.entries.read().await;
        let mut due: Vec<JournalEntry> = entries
            .values()
            .filter(|entry| entry.is_due(before))
            .cloned()
            .collect();
        due.sort_by_key(|entry| entry.next_retry_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }
}

#[derive(Default)]
pub struct MemoryRetryEventLog {
    events: RwLock<Vec<RetryEvent>>,
}

impl MemoryRetryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RetryEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for(&self, command_id: &str) -> Vec<RetryEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.command_id == command_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RetryEventLog for MemoryRetryEventLog {
    async fn append(&self, event: &RetryEvent) -> StoreResult<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CommandType, PENDING_AGENT};
    use chrono::Duration;

    fn entry(command_id: &str, next_retry_at: Option<DateTime<Utc>>) -> JournalEntry {
        let now = Utc::now();
        JournalEntry {
            command_id: command_id.to_string(),
            trade_id: "trade-1".to_string(),
            agent_id: PENDING_AGENT.to_string(),
            target_account_id: "acct-1".to_string(),
            command_type: CommandType::Execute,
            payload: b"{}".to_vec(),
            stage: AckStage::Unspecified,
            status: DeliveryStatus::Pending,
            attempt: 0,
            next_retry_at,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let journal = MemoryJournal::new();
        assert!(journal.insert(&entry("cmd-1", Some(Utc::now()))).await.unwrap());
        assert!(!journal.insert(&entry("cmd-1", Some(Utc::now()))).await.unwrap());
        assert_eq!(journal.len().await, 1);
    }

    #[tokio::test]
    async fn test_terminal_rows_are_not_updated() {
        let journal = MemoryJournal::new();
        journal.insert(&entry("cmd-1", Some(Utc::now()))).await.unwrap();
        assert!(journal.mark_acked("cmd-1", AckStage::EaConfirmed).await.unwrap());

        let update = StatusUpdate {
            stage: AckStage::Unspecified,
            status: DeliveryStatus::Pending,
            attempt: 5,
            next_retry_at: Some(Utc::now()),
            last_error: None,
        };
        assert!(!journal.update_status("cmd-1", &update).await.unwrap());
        assert!(!journal.assign_agent("cmd-1", "agent-2").await.unwrap());

        let stored = journal.get("cmd-1").await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Acked);
        assert_eq!(stored.next_retry_at, None);
        assert_eq!(stored.agent_id, PENDING_AGENT);
    }

    #[tokio::test]
    async fn test_older_update_keeps_stage_and_attempt() {
        let journal = MemoryJournal::new();
        journal.insert(&entry("cmd-1", Some(Utc::now()))).await.unwrap();

        let progressed = StatusUpdate {
            stage: AckStage::PipeDelivered,
            status: DeliveryStatus::Inflight,
            attempt: 3,
            next_retry_at: Some(Utc::now()),
            last_error: None,
        };
        assert!(journal.update_status("cmd-1", &progressed).await.unwrap());

        let older = StatusUpdate {
            stage: AckStage::Unspecified,
            status: DeliveryStatus::Inflight,
            attempt: 2,
            next_retry_at: Some(Utc::now()),
            last_error: None,
        };
        assert!(journal.update_status("cmd-1", &older).await.unwrap());

        let stored = journal.get("cmd-1").await.unwrap().unwrap();
        assert_eq!(stored.stage, AckStage::PipeDelivered);
        assert_eq!(stored.attempt, 3);

        assert!(journal.mark_acked("cmd-1", AckStage::AgentBuffered).await.unwrap());
        let stored = journal.get("cmd-1").await.unwrap().unwrap();
        assert_eq!(stored.stage, AckStage::PipeDelivered);
        assert_eq!(stored.status, DeliveryStatus::Acked);
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let journal = MemoryJournal::new();
        let err = journal.assign_agent("ghost", "agent-1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_due_entries_ordered_and_limited() {
        let journal = MemoryJournal::new();
        let now = Utc::now();
        journal.insert(&entry("late", Some(now - Duration::seconds(1)))).await.unwrap();
        journal.insert(&entry("early", Some(now - Duration::seconds(5)))).await.unwrap();
        journal.insert(&entry("future", Some(now + Duration::seconds(60)))).await.unwrap();
        journal.insert(&entry("parked", None)).await.unwrap();

        let due = journal.due_entries(now, 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|e| e.command_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);

        let limited = journal.due_entries(now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let journal = MemoryJournal::new();
        journal.fail_next(2);
        assert!(journal.get("x").await.unwrap_err().is_transient());
        assert!(journal.get("x").await.is_err());
        assert!(journal.get("x").await.unwrap().is_none());
        assert_eq!(journal.calls(), 3);
    }
}
