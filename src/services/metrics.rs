use crate::domain::{AckResult, AckStage};
use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Key for per-attempt outcome counters
type AttemptKey = (String, AckStage, AckResult);

#[derive(Debug, Default)]
struct AgeBucket {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

/// Metrics collector for delivery observability
#[derive(Default)]
pub struct DeliveryMetrics {
    /// Attempt outcomes by (agent, stage, result)
    attempts: DashMap<AttemptKey, u64>,
    /// Time from schedule to acknowledgement, per final stage
    pending_age: DashMap<AckStage, AgeBucket>,
    /// Acknowledgements applied to the journal
    pub acks_processed: AtomicU64,
    /// Acknowledgements for commands the journal does not know
    pub unknown_acks: AtomicU64,
    /// Journal payloads that failed to decode during a sweep
    pub decode_failures: AtomicU64,
    /// Completed reconciliation sweeps
    pub sweeps: AtomicU64,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one delivery attempt outcome
    pub fn record_attempt(&self, agent_id: &str, stage: AckStage, result: AckResult) {
        *self
            .attempts
            .entry((agent_id.to_string(), stage, result))
            .or_insert(0) += 1;
    }

    /// Observe how long a command took to reach a terminal acknowledgement
    pub fn record_pending_age(&self, stage: AckStage, age: chrono::Duration) {
        let ms = age.num_milliseconds().max(0) as u64;
        let mut bucket = self.pending_age.entry(stage).or_default();
        bucket.count += 1;
        bucket.total_ms += ms;
        bucket.max_ms = bucket.max_ms.max(ms);
    }

    pub fn inc_acks_processed(&self) {
        self.acks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unknown_acks(&self) {
        self.unknown_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sweeps(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt_count(&self, agent_id: &str, stage: AckStage, result: AckResult) -> u64 {
        self.attempts
            .get(&(agent_id.to_string(), stage, result))
            .map_or(0, |count| *count)
    }

    /// Number of pending-age observations for a stage
    pub fn pending_age_samples(&self, stage: AckStage) -> u64 {
        self.pending_age.get(&stage).map_or(0, |bucket| bucket.count)
    }

    /// Get current metrics as a formatted string
    pub fn summary(&self) -> String {
        let (ok, failed) = self.attempts.iter().fold((0u64, 0u64), |(ok, failed), entry| {
            match entry.key().2 {
                AckResult::Failed => (ok, failed + *entry.value()),
                _ => (ok + *entry.value(), failed),
            }
        });

        format!(
            "deliveries ok={} failed={} | acks={} unknown={} | sweeps={} decode_failures={}",
            ok,
            failed,
            self.acks_processed.load(Ordering::Relaxed),
            self.unknown_acks.load(Ordering::Relaxed),
            self.sweeps.load(Ordering::Relaxed),
            self.decode_failures.load(Ordering::Relaxed),
        )
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP copyrelay_delivery_attempts_total Delivery attempt outcomes\n");
        out.push_str("# TYPE copyrelay_delivery_attempts_total counter\n");
        let mut attempts: Vec<(AttemptKey, u64)> = self
            .attempts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        attempts.sort_by(|a, b| a.0 .0.cmp(&b.0 .0).then(a.0 .1.cmp(&b.0 .1)));
        for ((agent, stage, result), count) in attempts {
            let _ = writeln!(
                out,
                "copyrelay_delivery_attempts_total{{agent=\"{}\",stage=\"{}\",result=\"{}\"}} {}",
                agent, stage, result, count
            );
        }

        out.push_str("\n# HELP copyrelay_delivery_pending_age_ms Schedule to terminal ack latency\n");
        out.push_str("# TYPE copyrelay_delivery_pending_age_ms summary\n");
        let mut ages: Vec<(AckStage, u64, u64, u64)> = self
            .pending_age
            .iter()
            .map(|entry| {
                let bucket = entry.value();
                (*entry.key(), bucket.count, bucket.total_ms, bucket.max_ms)
            })
            .collect();
        ages.sort_by_key(|(stage, ..)| *stage);
        for (stage, count, total_ms, max_ms) in ages {
            let _ = writeln!(out, "copyrelay_delivery_pending_age_ms_count{{stage=\"{}\"}} {}", stage, count);
            let _ = writeln!(out, "copyrelay_delivery_pending_age_ms_sum{{stage=\"{}\"}} {}", stage, total_ms);
            let _ = writeln!(out, "copyrelay_delivery_pending_age_ms_max{{stage=\"{}\"}} {}", stage, max_ms);
        }

        let _ = write!(
            out,
            r#"
# HELP copyrelay_acks_processed_total Acknowledgements applied
# TYPE copyrelay_acks_processed_total counter
copyrelay_acks_processed_total {}

# HELP copyrelay_unknown_acks_total Acknowledgements for unknown commands
# TYPE copyrelay_unknown_acks_total counter
copyrelay_unknown_acks_total {}

# HELP copyrelay_reconciler_sweeps_total Completed reconciliation sweeps
# TYPE copyrelay_reconciler_sweeps_total counter
copyrelay_reconciler_sweeps_total {}

# HELP copyrelay_payload_decode_failures_total Undecodable journal payloads
# TYPE copyrelay_payload_decode_failures_total counter
copyrelay_payload_decode_failures_total {}
"#,
            self.acks_processed.load(Ordering::Relaxed),
            self.unknown_acks.load(Ordering::Relaxed),
            self.sweeps.load(Ordering::Relaxed),
            self.decode_failures.load(Ordering::Relaxed),
        );

        out
    }

    /// Log periodic status
    pub fn log_status(&self) {
        info!("{}", self.summary());
    }
}
