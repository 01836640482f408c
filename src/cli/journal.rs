//! Journal inspection commands
//!
//! copyrelay journal show <id>     - One entry with its payload
//! copyrelay journal list          - Entries in a status
//! copyrelay journal stats         - Entry count per status
//! copyrelay journal events <id>   - Recorded attempts for a command

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde_json::json;

use super::output::{self, EventRow, JournalRow, OutputMode, StatusCountRow};
use crate::adapters::PostgresStore;
use crate::config::AppConfig;
use crate::domain::{CoreMessage, DeliveryStatus};
use crate::persistence::DeliveryJournal;

#[derive(Subcommand, Debug)]
pub enum JournalCommands {
    /// Show one journal entry
    Show {
        command_id: String,
        #[arg(long)]
        json: bool,
    },

    /// List entries in a delivery status
    List {
        /// pending, inflight, acked or failed
        #[arg(short, long, default_value = "pending")]
        status: String,
        #[arg(short, long, default_value = "50")]
        limit: i64,
        #[arg(long)]
        json: bool,
    },

    /// Entry count per status
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Retry events recorded for a command
    Events {
        command_id: String,
        #[arg(long)]
        json: bool,
    },
}

impl JournalCommands {
    pub async fn run(self, config: &AppConfig) -> Result<()> {
        if config.dry_run.enabled {
            bail!("dry-run mode has no journal database to inspect");
        }

        let store = PostgresStore::new(&config.database.url, config.database.max_connections)
            .await
            .context("connecting to the journal database")?;

        match self {
            Self::Show { command_id, json } => show_entry(&store, &command_id, json).await,
            Self::List { status, limit, json } => list_entries(&store, &status, limit, json).await,
            Self::Stats { json } => show_stats(&store, json).await,
            Self::Events { command_id, json } => show_events(&store, &command_id, json).await,
        }
    }
}

async fn show_entry(store: &PostgresStore, command_id: &str, json: bool) -> Result<()> {
    let Some(entry) = store.journal().get(command_id).await? else {
        bail!("no journal entry for command {command_id}");
    };

    let payload = match CoreMessage::decode(&entry.payload) {
        Ok(message) => serde_json::to_value(message)?,
        Err(err) => json!({ "undecodable": err.to_string() }),
    };

    if json {
        let mut value = serde_json::to_value(&entry)?;
        value["payload"] = payload;
        return output::print_item(&value);
    }

    output::print_items(&[JournalRow::from(&entry)], OutputMode::Table)?;
    println!("trade: {}  created: {}  updated: {}", entry.trade_id, entry.created_at, entry.updated_at);
    output::print_item(&payload)
}

async fn list_entries(store: &PostgresStore, status: &str, limit: i64, json: bool) -> Result<()> {
    let status: DeliveryStatus = status.parse().map_err(anyhow::Error::msg)?;
    if limit <= 0 {
        bail!("--limit must be positive");
    }

    let entries = store.journal().list_by_status(status, limit).await?;
    let rows: Vec<JournalRow> = entries.iter().map(JournalRow::from).collect();
    output::print_items(&rows, OutputMode::from_json_flag(json))
}

async fn show_stats(store: &PostgresStore, json: bool) -> Result<()> {
    let counts = store.journal().status_counts().await?;
    let rows: Vec<StatusCountRow> = counts.into_iter().map(StatusCountRow::from).collect();
    output::print_items(&rows, OutputMode::from_json_flag(json))
}

async fn show_events(store: &PostgresStore, command_id: &str, json: bool) -> Result<()> {
    let events = store.retry_events().events_for(command_id).await?;
    let rows: Vec<EventRow> = events.iter().map(EventRow::from).collect();
    output::print_items(&rows, OutputMode::from_json_flag(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DeliveryConfig, DryRunConfig, LoggingConfig};

    #[tokio::test]
    async fn test_dry_run_refuses_without_connecting() {
        let config = AppConfig {
            delivery: DeliveryConfig::default(),
            // Unreachable on purpose: the command must fail before dialing
            database: DatabaseConfig {
                url: "postgres://nobody@127.0.0.1:1/copyrelay".to_string(),
                max_connections: 1,
            },
            dry_run: DryRunConfig { enabled: true },
            logging: LoggingConfig::default(),
        };

        let err = JournalCommands::Stats { json: false }
            .run(&config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dry-run"));
    }
}
