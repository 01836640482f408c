//! Output formatting for `copyrelay journal` commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::domain::{DeliveryStatus, JournalEntry, RetryEvent};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Print a single Serialize item as pretty JSON.
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

pub fn print_success(msg: &str) {
    println!("\x1b[32m{msg}\x1b[0m");
}

pub fn print_error(msg: &str) {
    eprintln!("\x1b[31m{msg}\x1b[0m");
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

/// One journal row as shown to operators
#[derive(Debug, Tabled, Serialize)]
pub struct JournalRow {
    #[tabled(rename = "Command")]
    pub command_id: String,
    #[tabled(rename = "Type")]
    pub command_type: String,
    #[tabled(rename = "Agent")]
    pub agent_id: String,
    #[tabled(rename = "Account")]
    pub target_account_id: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Stage")]
    pub stage: String,
    #[tabled(rename = "Attempt")]
    pub attempt: u32,
    #[tabled(rename = "Next Retry")]
    pub next_retry_at: String,
    #[tabled(rename = "Last Error")]
    pub last_error: String,
}

impl From<&JournalEntry> for JournalRow {
    fn from(entry: &JournalEntry) -> Self {
        Self {
            command_id: entry.command_id.clone(),
            command_type: entry.command_type.to_string(),
            agent_id: entry.agent_id.clone(),
            target_account_id: entry.target_account_id.clone(),
            status: entry.status.to_string(),
            stage: entry.stage.to_string(),
            attempt: entry.attempt,
            next_retry_at: or_dash(entry.next_retry_at.map(|at| at.to_rfc3339())),
            last_error: or_dash(entry.last_error.clone()),
        }
    }
}

#[derive(Debug, Tabled, Serialize)]
pub struct EventRow {
    #[tabled(rename = "At")]
    pub created_at: String,
    #[tabled(rename = "Attempt")]
    pub attempt: u32,
    #[tabled(rename = "Stage")]
    pub stage: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Duration (ms)")]
    pub duration_ms: i64,
    #[tabled(rename = "Error")]
    pub error: String,
}

impl From<&RetryEvent> for EventRow {
    fn from(event: &RetryEvent) -> Self {
        Self {
            created_at: event.created_at.to_rfc3339(),
            attempt: event.attempt,
            stage: event.stage.to_string(),
            result: event.result.to_string(),
            duration_ms: event.duration_ms,
            error: or_dash(event.error.clone()),
        }
    }
}

#[derive(Debug, Tabled, Serialize)]
pub struct StatusCountRow {
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Entries")]
    pub count: i64,
}

impl From<(DeliveryStatus, i64)> for StatusCountRow {
    fn from((status, count): (DeliveryStatus, i64)) -> Self {
        Self {
            status: status.to_string(),
            count,
        }
    }
}
