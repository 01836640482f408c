//! Journal-backed at-least-once command delivery.
//!
//! Every command is written to the delivery journal before it is sent, and
//! every state change after that goes through the journal's conditional
//! update. The journal is the only source of truth: a restarted process
//! resumes from it through the reconciliation sweep.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ports::{CapabilityCheck, OwnershipResolver, Transport};
use super::reconciler::Reconciler;
use crate::config::{DeliveryConfig, SharedDeliveryConfig};
use crate::domain::{
    AckResult, AckStage, CloseOrder, CommandAck, CommandType, CoreMessage, DeliveryStatus,
    ExecuteOrder, JournalEntry, RetryEvent, StatusUpdate, PENDING_AGENT,
};
use crate::error::{RelayError, Result};
use crate::persistence::{DeliveryJournal, RetryEventLog, StorageRetry};
use crate::services::DeliveryMetrics;

/// Collaborators owned by the connection layer
#[derive(Clone)]
pub struct DeliveryPorts {
    pub owners: Arc<dyn OwnershipResolver>,
    pub transport: Arc<dyn Transport>,
    pub capabilities: Arc<dyn CapabilityCheck>,
}

struct SweeperHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Outcome of ownership resolution before a send
enum Assignment {
    Ready,
    Unresolved(RelayError),
    /// The row went terminal underneath us
    Settled,
}

pub struct DeliveryService {
    journal: Arc<dyn DeliveryJournal>,
    events: Arc<dyn RetryEventLog>,
    ports: DeliveryPorts,
    config: SharedDeliveryConfig,
    storage: StorageRetry,
    metrics: Arc<DeliveryMetrics>,
    cancel: CancellationToken,
    interval_tx: watch::Sender<Duration>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl DeliveryService {
    pub fn new(
        config: DeliveryConfig,
        journal: Arc<dyn DeliveryJournal>,
        events: Arc<dyn RetryEventLog>,
        ports: DeliveryPorts,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (interval_tx, _) = watch::channel(config.reconciler_interval());
        let config: SharedDeliveryConfig = Arc::new(tokio::sync::RwLock::new(config));

        Self {
            storage: StorageRetry::new(config.clone(), cancel.clone()),
            journal,
            events,
            ports,
            config,
            metrics: Arc::new(DeliveryMetrics::new()),
            cancel,
            interval_tx,
            sweeper: Mutex::new(None),
        }
    }

    /// Share an externally owned metrics collector
    pub fn with_metrics(mut self, metrics: Arc<DeliveryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<DeliveryMetrics> {
        self.metrics.clone()
    }

    /// Token bounding the service lifetime; cancelling it aborts pending
    /// storage retries and the sweeper
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn config(&self) -> DeliveryConfig {
        self.config.read().await.clone()
    }

    /// Swap the delivery policy; the sweeper picks up a new interval after
    /// its current sweep
    pub async fn update_config(&self, config: DeliveryConfig) {
        let interval = config.reconciler_interval();
        {
            let mut current = self.config.write().await;
            if *current == config {
                return;
            }
            *current = config;
        }
        self.interval_tx.send_replace(interval);
        info!(interval_ms = interval.as_millis() as u64, "delivery config updated");
    }

    /// Spawn the reconciliation sweeper. Calling it again is a no-op.
    ///
    /// A service is single-use: once `stop` has run it refuses to start.
    pub async fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if self.cancel.is_cancelled() {
            warn!("delivery service already stopped; not starting sweeper");
            return;
        }
        if sweeper.is_some() {
            debug!("delivery sweeper already running");
            return;
        }

        let stop = self.cancel.child_token();
        let reconciler = Reconciler::new(Arc::clone(self), self.interval_tx.subscribe(), stop.clone());
        let task = tokio::spawn(reconciler.run());
        *sweeper = Some(SweeperHandle { stop, task });
        info!("delivery service started");
    }

    /// Cancel the service and wait for the sweeper to exit
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.sweeper.lock().await.take();
        if let Some(handle) = handle {
            handle.stop.cancel();
            if let Err(err) = handle.task.await {
                warn!(error = %err, "delivery sweeper task ended abnormally");
            }
        }
        info!("delivery service stopped");
    }

    pub async fn schedule_execute(&self, agent_hint: &str, order: ExecuteOrder) -> Result<String> {
        self.schedule(agent_hint, CommandType::Execute, CoreMessage::ExecuteOrder(order))
            .await
    }

    pub async fn schedule_close(&self, agent_hint: &str, order: CloseOrder) -> Result<String> {
        self.schedule(agent_hint, CommandType::Close, CoreMessage::CloseOrder(order))
            .await
    }

    /// Journal a command and attempt its first delivery.
    ///
    /// Returns the command id. Scheduling an id that is already journaled
    /// leaves the existing row untouched and sends nothing.
    pub async fn schedule(
        &self,
        agent_hint: &str,
        command_type: CommandType,
        mut message: CoreMessage,
    ) -> Result<String> {
        let agent_hint = agent_hint.trim();
        if agent_hint.is_empty() && message.target_account_id().trim().is_empty() {
            return Err(RelayError::Validation(
                "command has neither an agent nor a target account".to_string(),
            ));
        }

        if message.command_id().is_empty() {
            message.set_command_id(Uuid::now_v7().to_string());
        }
        let payload = message.encode()?;

        let now = Utc::now();
        let entry = JournalEntry {
            command_id: message.command_id().to_string(),
            trade_id: message.trade_id().to_string(),
            agent_id: if agent_hint.is_empty() {
                PENDING_AGENT.to_string()
            } else {
                agent_hint.to_string()
            },
            target_account_id: message.target_account_id().to_string(),
            command_type,
            payload,
            stage: AckStage::Unspecified,
            status: DeliveryStatus::Pending,
            attempt: 0,
            next_retry_at: Some(now),
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .storage
            .run("delivery_journal.insert", || self.journal.insert(&entry))
            .await?;

        let command_id = entry.command_id.clone();
        if !inserted {
            debug!(command_id = %command_id, "command already journaled");
            return Ok(command_id);
        }

        debug!(
            command_id = %command_id,
            agent_id = %entry.agent_id,
            account_id = %entry.target_account_id,
            command_type = %command_type,
            "command journaled"
        );

        self.dispatch(entry, &message).await?;
        Ok(command_id)
    }

    /// Send one journaled command and record the outcome.
    ///
    /// Send failures and unresolved owners are not errors: the entry goes
    /// back to pending with backoff. Only journal failures are returned.
    pub async fn dispatch(&self, mut entry: JournalEntry, message: &CoreMessage) -> Result<()> {
        if entry.status.is_terminal() {
            debug!(command_id = %entry.command_id, status = %entry.status, "skip dispatch of settled command");
            return Ok(());
        }

        match self.ensure_agent_assignment(&mut entry).await? {
            Assignment::Ready => {}
            Assignment::Settled => return Ok(()),
            Assignment::Unresolved(cause) => {
                warn!(
                    command_id = %entry.command_id,
                    account_id = %entry.target_account_id,
                    "delivery waiting for account owner"
                );
                return self.mark_pending(&mut entry, &cause).await;
            }
        }

        let lossless = self.ports.capabilities.supports_lossless_delivery(&entry.agent_id);
        let started = Instant::now();

        if let Err(err) = self.ports.transport.send(&entry.agent_id, message).await {
            warn!(
                command_id = %entry.command_id,
                agent_id = %entry.agent_id,
                attempt = entry.attempt + 1,
                error = %err,
                "command send failed"
            );
            return self.mark_pending(&mut entry, &err).await;
        }

        if !lossless {
            return self.complete_compat_delivery(&entry, started.elapsed()).await;
        }

        let cfg = self.config().await;
        let attempt = entry.attempt + 1;
        let update = StatusUpdate {
            stage: entry.stage,
            status: DeliveryStatus::Inflight,
            attempt,
            next_retry_at: Some(deadline_after(Utc::now(), cfg.ack_timeout())),
            last_error: None,
        };

        let applied = self
            .storage
            .run("delivery_journal.update_inflight", || {
                self.journal.update_status(&entry.command_id, &update)
            })
            .await?;
        if !applied {
            debug!(command_id = %entry.command_id, "command settled during send");
            return Ok(());
        }

        self.record_event(&entry.command_id, entry.stage, AckResult::Pending, attempt, None, started.elapsed())
            .await;
        self.metrics.record_attempt(&entry.agent_id, entry.stage, AckResult::Ok);

        debug!(
            command_id = %entry.command_id,
            agent_id = %entry.agent_id,
            attempt,
            "command inflight"
        );
        Ok(())
    }

    /// Apply an executor acknowledgement to the journal.
    ///
    /// Unknown and already-settled commands are ignored.
    pub async fn handle_ack(&self, agent_id: &str, ack: &CommandAck) -> Result<()> {
        if ack.command_id.is_empty() {
            return Err(RelayError::Validation("ack without command id".to_string()));
        }

        let entry = self
            .journal
            .get(&ack.command_id)
            .await
            .map_err(|source| RelayError::Journal {
                operation: "delivery_journal.get",
                source,
            })?;

        let Some(entry) = entry else {
            warn!(command_id = %ack.command_id, agent_id, "ack for unknown command");
            self.metrics.inc_unknown_acks();
            return Ok(());
        };

        if entry.status.is_terminal() {
            debug!(
                command_id = %ack.command_id,
                status = %entry.status,
                stage = %ack.stage,
                "ack for settled command ignored"
            );
            return Ok(());
        }

        if ack.stage < entry.stage {
            debug!(
                command_id = %ack.command_id,
                stored = %entry.stage,
                reported = %ack.stage,
                "stale ack stage"
            );
        }
        let stage = entry.stage.max(ack.stage);

        let (status, next_retry_at, last_error) = if ack.result == AckResult::Failed {
            (DeliveryStatus::Failed, None, Some(ack.error_code.to_string()))
        } else if stage.is_final() {
            (DeliveryStatus::Acked, None, None)
        } else {
            let cfg = self.config().await;
            (
                DeliveryStatus::Inflight,
                Some(deadline_after(Utc::now(), cfg.ack_timeout())),
                None,
            )
        };

        let update = StatusUpdate {
            stage,
            status,
            attempt: entry.attempt,
            next_retry_at,
            last_error,
        };

        let applied = self
            .storage
            .run("delivery_journal.update_ack", || {
                self.journal.update_status(&entry.command_id, &update)
            })
            .await?;
        if !applied {
            debug!(command_id = %ack.command_id, "command settled before ack applied");
            return Ok(());
        }

        self.metrics.inc_acks_processed();
        if status == DeliveryStatus::Acked {
            self.metrics.record_pending_age(stage, Utc::now() - entry.created_at);
        }

        match status {
            DeliveryStatus::Failed => warn!(
                command_id = %ack.command_id,
                agent_id,
                stage = %stage,
                error_code = %ack.error_code,
                "command rejected by executor"
            ),
            _ => info!(
                command_id = %ack.command_id,
                agent_id,
                stage = %stage,
                status = %status,
                "delivery ack processed"
            ),
        }
        Ok(())
    }

    /// Resolve and persist the owner of an entry still on the pending sentinel
    async fn ensure_agent_assignment(&self, entry: &mut JournalEntry) -> Result<Assignment> {
        if !entry.needs_owner() {
            return Ok(Assignment::Ready);
        }

        let Some(owner) = self.ports.owners.get_owner(&entry.target_account_id) else {
            return Ok(Assignment::Unresolved(RelayError::OwnerUnavailable(
                entry.target_account_id.clone(),
            )));
        };

        let applied = self
            .storage
            .run("delivery_journal.assign_agent", || {
                self.journal.assign_agent(&entry.command_id, &owner)
            })
            .await?;
        if !applied {
            return Ok(Assignment::Settled);
        }

        info!(
            command_id = %entry.command_id,
            account_id = %entry.target_account_id,
            agent_id = %owner,
            "command assigned to agent"
        );
        entry.agent_id = owner;
        Ok(Assignment::Ready)
    }

    /// Executors without acknowledgement support get a single send
    async fn complete_compat_delivery(&self, entry: &JournalEntry, elapsed: Duration) -> Result<()> {
        let applied = self
            .storage
            .run("delivery_journal.mark_compat_ack", || {
                self.journal.mark_acked(&entry.command_id, AckStage::CoreAccepted)
            })
            .await?;
        if !applied {
            return Ok(());
        }

        self.record_event(
            &entry.command_id,
            AckStage::CoreAccepted,
            AckResult::Ok,
            entry.attempt + 1,
            None,
            elapsed,
        )
        .await;
        self.metrics
            .record_attempt(&entry.agent_id, AckStage::CoreAccepted, AckResult::Ok);
        self.metrics
            .record_pending_age(AckStage::CoreAccepted, Utc::now() - entry.created_at);

        info!(
            command_id = %entry.command_id,
            agent_id = %entry.agent_id,
            "command delivered in compatibility mode"
        );
        Ok(())
    }

    /// Count a failed attempt and schedule the next one, or give up
    async fn mark_pending(&self, entry: &mut JournalEntry, cause: &RelayError) -> Result<()> {
        let cfg = self.config().await;
        let attempt = entry.attempt + 1;
        let max_retries = cfg.effective_max_retries();
        let backoff = cfg.backoff_for(attempt);
        let exhausted = attempt >= max_retries;

        let update = StatusUpdate {
            stage: entry.stage,
            status: if exhausted {
                DeliveryStatus::Failed
            } else {
                DeliveryStatus::Pending
            },
            attempt,
            next_retry_at: if exhausted {
                None
            } else {
                Some(deadline_after(Utc::now(), backoff))
            },
            last_error: Some(cause.to_string()),
        };

        let applied = self
            .storage
            .run("delivery_journal.update_pending", || {
                self.journal.update_status(&entry.command_id, &update)
            })
            .await?;
        if !applied {
            return Ok(());
        }

        entry.attempt = attempt;
        entry.status = update.status;
        entry.next_retry_at = update.next_retry_at;
        entry.last_error = update.last_error.clone();

        let error_text = cause.to_string();
        self.record_event(
            &entry.command_id,
            entry.stage,
            AckResult::Failed,
            attempt,
            Some(error_text),
            Duration::ZERO,
        )
        .await;
        self.metrics
            .record_attempt(&entry.agent_id, entry.stage, AckResult::Failed);

        if exhausted {
            error!(
                command_id = %entry.command_id,
                agent_id = %entry.agent_id,
                attempt,
                error = %cause,
                "delivery failed permanently"
            );
        } else {
            debug!(
                command_id = %entry.command_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "delivery rescheduled"
            );
        }
        Ok(())
    }

    /// Audit events are best effort; a lost event never fails delivery
    async fn record_event(
        &self,
        command_id: &str,
        stage: AckStage,
        result: AckResult,
        attempt: u32,
        error: Option<String>,
        elapsed: Duration,
    ) {
        let event = RetryEvent {
            command_id: command_id.to_string(),
            stage,
            result,
            attempt,
            error,
            duration_ms: elapsed.as_millis().min(i64::MAX as u128) as i64,
            created_at: Utc::now(),
        };

        if let Err(err) = self.events.append(&event).await {
            warn!(command_id, error = %err, "failed to record retry event");
        }
    }

    pub(crate) fn journal(&self) -> &Arc<dyn DeliveryJournal> {
        &self.journal
    }
}

/// `now + delay`, saturating at the maximum representable time
fn deadline_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
