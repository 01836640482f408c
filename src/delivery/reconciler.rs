//! Periodic replay of journal entries whose deadline has lapsed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::service::DeliveryService;
use crate::domain::CoreMessage;

/// Counts from one reconciliation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub dispatched: usize,
    pub decode_failures: usize,
    pub errors: usize,
}

pub(crate) struct Reconciler {
    service: Arc<DeliveryService>,
    interval_rx: watch::Receiver<Duration>,
    stop: CancellationToken,
}

impl Reconciler {
    pub(crate) fn new(
        service: Arc<DeliveryService>,
        interval_rx: watch::Receiver<Duration>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            service,
            interval_rx,
            stop,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut period = *self.interval_rx.borrow_and_update();
        let mut ticker = sweep_ticker(period);
        info!(interval_ms = period.as_millis() as u64, "delivery reconciler started");

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                changed = self.interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = *self.interval_rx.borrow_and_update();
                    if next != period {
                        period = next;
                        ticker = sweep_ticker(period);
                        info!(interval_ms = period.as_millis() as u64, "reconciler interval updated");
                    }
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = self.service.reconcile_once() => {}
                    }
                }
            }
        }

        info!("delivery reconciler stopped");
    }
}

fn sweep_ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl DeliveryService {
    /// Run one sweep: replay up to `batch_size` due entries.
    ///
    /// Entries whose payload cannot be decoded are skipped and stay due.
    pub async fn reconcile_once(&self) -> SweepSummary {
        let cfg = self.config().await;
        let mut summary = SweepSummary::default();

        let limit = cfg.batch_size.max(1);
        let due = match self.journal().due_entries(Utc::now(), limit).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "reconciler scan failed");
                summary.errors += 1;
                return summary;
            }
        };

        summary.scanned = due.len();
        if due.is_empty() {
            self.metrics().inc_sweeps();
            return summary;
        }

        for entry in due {
            let message = match CoreMessage::decode(&entry.payload) {
                Ok(message) => message,
                Err(err) => {
                    error!(
                        command_id = %entry.command_id,
                        error = %err,
                        "failed to decode delivery payload"
                    );
                    self.metrics().inc_decode_failures();
                    summary.decode_failures += 1;
                    continue;
                }
            };

            let command_id = entry.command_id.clone();
            match self.dispatch(entry, &message).await {
                Ok(()) => summary.dispatched += 1,
                Err(err) => {
                    warn!(command_id = %command_id, error = %err, "reconciler dispatch failed");
                    summary.errors += 1;
                }
            }
        }

        self.metrics().inc_sweeps();
        debug!(
            scanned = summary.scanned,
            dispatched = summary.dispatched,
            decode_failures = summary.decode_failures,
            errors = summary.errors,
            "reconciler sweep complete"
        );
        summary
    }
}
