//! End-to-end delivery flows over the in-memory journal.

use async_trait::async_trait;
use chrono::Utc;
use copyrelay::delivery::{AccountRegistry, AgentCapabilities, DeliveryPorts, DeliveryService, Transport};
use copyrelay::domain::{
    AckResult, AckStage, CloseOrder, CommandAck, CoreMessage, DeliveryStatus, ExecuteOrder,
    OrderSide, PENDING_AGENT,
};
use copyrelay::error::{RelayError, Result};
use copyrelay::persistence::{DeliveryJournal, MemoryJournal, MemoryRetryEventLog};
use copyrelay::DeliveryConfig;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every send; fails while `failing` is set
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    fn sends(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, agent_id: &str, message: &CoreMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelayError::Transport(format!("{agent_id} disconnected")));
        }
        self.sent
            .lock()
            .unwrap()
            .push((agent_id.to_string(), message.command_id().to_string()));
        Ok(())
    }
}

struct Fixture {
    service: Arc<DeliveryService>,
    journal: Arc<MemoryJournal>,
    events: Arc<MemoryRetryEventLog>,
    transport: Arc<RecordingTransport>,
    registry: Arc<AccountRegistry>,
    capabilities: Arc<AgentCapabilities>,
}

fn fixture(config: DeliveryConfig) -> Fixture {
    let journal = Arc::new(MemoryJournal::new());
    let events = Arc::new(MemoryRetryEventLog::new());
    let transport = Arc::new(RecordingTransport::default());
    let registry = Arc::new(AccountRegistry::new());
    let capabilities = Arc::new(AgentCapabilities::new());

    let service = Arc::new(DeliveryService::new(
        config,
        journal.clone(),
        events.clone(),
        DeliveryPorts {
            owners: registry.clone(),
            transport: transport.clone(),
            capabilities: capabilities.clone(),
        },
    ));

    Fixture {
        service,
        journal,
        events,
        transport,
        registry,
        capabilities,
    }
}

fn scenario_config() -> DeliveryConfig {
    DeliveryConfig {
        ack_timeout_ms: 10_000,
        max_retries: 3,
        retry_backoff_ms: vec![1_000, 2_000, 4_000],
        ..Default::default()
    }
}

fn execute(command_id: &str, account: &str) -> ExecuteOrder {
    ExecuteOrder {
        command_id: command_id.to_string(),
        trade_id: "trade-42".to_string(),
        target_account_id: account.to_string(),
        symbol: "EURUSD".to_string(),
        side: OrderSide::Buy,
        lot_size: dec!(0.25),
        price: Some(dec!(1.0912)),
        stop_loss: Some(dec!(1.0850)),
        take_profit: None,
        magic_number: 4242,
        timestamp_ms: 1_700_000_000_000,
    }
}

/// Replay one journaled entry the way a sweep would, ignoring its deadline
async fn redispatch(f: &Fixture, command_id: &str) {
    let entry = f.journal.get(command_id).await.unwrap().unwrap();
    let message = CoreMessage::decode(&entry.payload).unwrap();
    tokio_test::assert_ok!(f.service.dispatch(entry, &message).await);
}

#[tokio::test]
async fn test_duplicate_schedule_keeps_one_row() {
    let f = fixture(scenario_config());
    f.capabilities.set_lossless("agent-1", true);

    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();

    assert_eq!(f.journal.len().await, 1);
    assert_eq!(f.transport.sends().len(), 1);
    let stored = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(stored.attempt, 1);
}

#[tokio::test]
async fn test_exhausted_retries_fail_permanently() {
    let f = fixture(scenario_config());
    f.capabilities.set_lossless("agent-1", true);
    f.transport.set_failing(true);

    let before = Utc::now();
    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();

    let first = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(first.status, DeliveryStatus::Pending);
    assert_eq!(first.attempt, 1);
    assert!(first.next_retry_at.unwrap() >= before + chrono::Duration::seconds(1));

    redispatch(&f, "cmd-1").await;
    let second = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(second.status, DeliveryStatus::Pending);
    assert_eq!(second.attempt, 2);
    assert!(second.next_retry_at.unwrap() >= before + chrono::Duration::seconds(2));

    redispatch(&f, "cmd-1").await;
    let third = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(third.status, DeliveryStatus::Failed);
    assert_eq!(third.attempt, 3);
    assert_eq!(third.next_retry_at, None);
    assert!(third.last_error.unwrap().contains("disconnected"));

    let events = f.events.events_for("cmd-1").await;
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.result == AckResult::Failed));
    assert_eq!(events.iter().map(|e| e.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);

    // A failed entry stays failed even once the executor recovers
    f.transport.set_failing(false);
    redispatch(&f, "cmd-1").await;
    assert!(f.transport.sends().is_empty());
    assert_eq!(f.journal.get("cmd-1").await.unwrap().unwrap().status, DeliveryStatus::Failed);
}

#[tokio::test]
async fn test_owner_resolved_on_later_sweep() {
    let f = fixture(DeliveryConfig {
        retry_backoff_ms: vec![1],
        ..scenario_config()
    });
    f.capabilities.set_lossless("agent-7", true);

    f.service.schedule_execute("", execute("cmd-1", "acct-7")).await.unwrap();
    let parked = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(parked.agent_id, PENDING_AGENT);
    assert_eq!(parked.status, DeliveryStatus::Pending);
    assert!(f.transport.sends().is_empty());

    f.registry.register_account("agent-7", "acct-7");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let summary = f.service.reconcile_once().await;
    assert_eq!(summary.dispatched, 1);

    let stored = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(stored.agent_id, "agent-7");
    assert_eq!(stored.status, DeliveryStatus::Inflight);
    assert_eq!(f.transport.sends(), vec![("agent-7".to_string(), "cmd-1".to_string())]);
}

#[tokio::test]
async fn test_lossless_delivery_confirmed() {
    let f = fixture(scenario_config());
    f.capabilities.set_lossless("agent-1", true);

    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
    let inflight = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(inflight.status, DeliveryStatus::Inflight);

    f.service
        .handle_ack("agent-1", &CommandAck::ok("cmd-1", AckStage::EaConfirmed))
        .await
        .unwrap();

    let acked = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(acked.status, DeliveryStatus::Acked);
    assert_eq!(acked.stage, AckStage::EaConfirmed);
    assert_eq!(acked.next_retry_at, None);

    let events = f.events.events_for("cmd-1").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, AckResult::Pending);
    assert_eq!(f.service.metrics().pending_age_samples(AckStage::EaConfirmed), 1);
}

#[tokio::test]
async fn test_partial_ack_refreshes_deadline() {
    let f = fixture(DeliveryConfig {
        ack_timeout_ms: 60_000,
        ..scenario_config()
    });
    f.capabilities.set_lossless("agent-1", true);

    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
    let sent = f.journal.get("cmd-1").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    f.service
        .handle_ack("agent-1", &CommandAck::ok("cmd-1", AckStage::AgentBuffered))
        .await
        .unwrap();

    let buffered = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(buffered.status, DeliveryStatus::Inflight);
    assert_eq!(buffered.stage, AckStage::AgentBuffered);
    assert_eq!(buffered.attempt, sent.attempt);
    assert!(buffered.next_retry_at.unwrap() > sent.next_retry_at.unwrap());
}

#[tokio::test]
async fn test_sweep_copy_older_than_ack_keeps_progress() {
    let f = fixture(scenario_config());
    f.capabilities.set_lossless("agent-1", true);

    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
    // A sweep scans the row before the ack lands
    let scanned = f.journal.get("cmd-1").await.unwrap().unwrap();
    let message = CoreMessage::decode(&scanned.payload).unwrap();

    f.service
        .handle_ack("agent-1", &CommandAck::ok("cmd-1", AckStage::PipeDelivered))
        .await
        .unwrap();
    let acked = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(acked.stage, AckStage::PipeDelivered);

    tokio_test::assert_ok!(f.service.dispatch(scanned, &message).await);

    let stored = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Inflight);
    assert_eq!(stored.stage, AckStage::PipeDelivered);
    assert!(stored.attempt >= acked.attempt);
    assert_eq!(f.transport.sends().len(), 2);
}

#[tokio::test]
async fn test_compatibility_mode_close() {
    let f = fixture(scenario_config());

    let close = CloseOrder {
        command_id: "cmd-close".to_string(),
        trade_id: "trade-42".to_string(),
        target_account_id: "acct-1".to_string(),
        symbol: "EURUSD".to_string(),
        ticket: 991,
        magic_number: 4242,
        timestamp_ms: 0,
    };
    f.service.schedule_close("legacy-agent", close).await.unwrap();

    let stored = f.journal.get("cmd-close").await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Acked);
    assert_eq!(stored.stage, AckStage::CoreAccepted);
    assert_eq!(f.transport.sends().len(), 1);
}

#[tokio::test]
async fn test_acks_after_terminal_are_noops() {
    let f = fixture(scenario_config());
    f.capabilities.set_lossless("agent-1", true);

    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
    f.service
        .handle_ack("agent-1", &CommandAck::ok("cmd-1", AckStage::EaConfirmed))
        .await
        .unwrap();
    let acked = f.journal.get("cmd-1").await.unwrap().unwrap();

    f.service
        .handle_ack("agent-1", &CommandAck::ok("cmd-1", AckStage::AgentBuffered))
        .await
        .unwrap();
    f.service
        .handle_ack(
            "agent-1",
            &CommandAck::failed("cmd-1", AckStage::EaConfirmed, copyrelay::ErrorCode::Requote),
        )
        .await
        .unwrap();

    let after = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(after.status, DeliveryStatus::Acked);
    assert_eq!(after.stage, acked.stage);
    assert_eq!(after.next_retry_at, acked.next_retry_at);
    assert_eq!(after.updated_at, acked.updated_at);
}

#[tokio::test]
async fn test_empty_sweep_is_noop() {
    let f = fixture(scenario_config());
    let summary = f.service.reconcile_once().await;
    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.dispatched, 0);
    assert!(f.transport.sends().is_empty());
}

#[tokio::test]
async fn test_back_to_back_sweeps_do_not_double_dispatch() {
    let f = fixture(scenario_config());
    f.capabilities.set_lossless("agent-1", true);
    f.transport.set_failing(true);

    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
    f.transport.set_failing(false);

    // Backoff has not elapsed yet
    let first = f.service.reconcile_once().await;
    let second = f.service.reconcile_once().await;
    assert_eq!(first.scanned, 0);
    assert_eq!(second.scanned, 0);
    assert!(f.transport.sends().is_empty());
}

#[tokio::test]
async fn test_inflight_entry_replayed_after_deadline() {
    let f = fixture(DeliveryConfig {
        ack_timeout_ms: 100,
        ..scenario_config()
    });
    f.capabilities.set_lossless("agent-1", true);

    f.service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
    assert_eq!(f.service.reconcile_once().await.scanned, 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let replay = f.service.reconcile_once().await;
    assert_eq!(replay.dispatched, 1);
    // Immediately after the replay the new deadline has not lapsed
    assert_eq!(f.service.reconcile_once().await.scanned, 0);

    let stored = f.journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(stored.attempt, 2);
    assert_eq!(f.transport.sends().len(), 2);
}

#[tokio::test]
async fn test_sweeper_redelivers_after_restart() {
    let journal = Arc::new(MemoryJournal::new());

    // First process journals the command while the executor is offline
    {
        let transport = Arc::new(RecordingTransport::default());
        transport.set_failing(true);
        let caps = Arc::new(AgentCapabilities::new());
        caps.set_lossless("agent-1", true);
        let service = DeliveryService::new(
            DeliveryConfig {
                retry_backoff_ms: vec![5],
                ..scenario_config()
            },
            journal.clone(),
            Arc::new(MemoryRetryEventLog::new()),
            DeliveryPorts {
                owners: Arc::new(AccountRegistry::new()),
                transport,
                capabilities: caps,
            },
        );
        service.schedule_execute("agent-1", execute("cmd-1", "acct-1")).await.unwrap();
        service.stop().await;
    }

    // A fresh process picks the entry up from the journal alone
    let transport = Arc::new(RecordingTransport::default());
    let caps = Arc::new(AgentCapabilities::new());
    caps.set_lossless("agent-1", true);
    let service = Arc::new(DeliveryService::new(
        DeliveryConfig {
            reconciler_interval_ms: 10,
            ..scenario_config()
        },
        journal.clone(),
        Arc::new(MemoryRetryEventLog::new()),
        DeliveryPorts {
            owners: Arc::new(AccountRegistry::new()),
            transport: transport.clone(),
            capabilities: caps,
        },
    ));
    service.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.stop().await;

    assert_eq!(transport.sends(), vec![("agent-1".to_string(), "cmd-1".to_string())]);
    let stored = journal.get("cmd-1").await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Inflight);
    assert_eq!(stored.attempt, 2);
}
