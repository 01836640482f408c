use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::command::{AckResult, AckStage};

/// Agent id stored while a command has no known owner
pub const PENDING_AGENT: &str = "$pending";

/// Delivery lifecycle state of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Waiting for (re)dispatch
    Pending,
    /// Sent, waiting for acknowledgement
    Inflight,
    /// Confirmed by the executor
    Acked,
    /// Gave up: rejected or attempt ceiling reached
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Inflight => "inflight",
            DeliveryStatus::Acked => "acked",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Acked | DeliveryStatus::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "inflight" => Ok(DeliveryStatus::Inflight),
            "acked" => Ok(DeliveryStatus::Acked),
            "failed" => Ok(DeliveryStatus::Failed),
            _ => Err(format!("Unknown delivery status: {}", raw)),
        }
    }
}

/// Kind of command carried in the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Execute,
    Close,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Execute => "execute",
            CommandType::Close => "close",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CommandType {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "execute" => Ok(CommandType::Execute),
            "close" => Ok(CommandType::Close),
            _ => Err(format!("Unknown command type: {}", raw)),
        }
    }
}

/// Durable delivery state of one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub command_id: String,
    pub trade_id: String,
    pub agent_id: String,
    pub target_account_id: String,
    pub command_type: CommandType,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub stage: AckStage,
    pub status: DeliveryStatus,
    pub attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Whether the entry still needs an owner resolved before sending
    pub fn needs_owner(&self) -> bool {
        self.agent_id.is_empty() || self.agent_id == PENDING_AGENT
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_retry_at.map_or(false, |at| at <= now)
    }
}

/// Status transition applied to an existing journal row
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub stage: AckStage,
    pub status: DeliveryStatus,
    pub attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Append-only audit record of one delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEvent {
    pub command_id: String,
    pub stage: AckStage,
    pub result: AckResult,
    pub attempt: u32,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}
