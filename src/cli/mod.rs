//! copyrelay operator CLI
//!
//! Commands:
//! - `copyrelay migrate` - Create or upgrade the journal schema
//! - `copyrelay journal` - Inspect durable delivery state
//! - `copyrelay config` - Check the effective configuration

pub mod config;
pub mod journal;
pub mod output;

use clap::{Parser, Subcommand};

/// Reliable command delivery operator tool
#[derive(Parser, Debug)]
#[command(name = "copyrelay")]
#[command(author, version, about = "Journal-backed command delivery for trade copying")]
pub struct Cli {
    /// Directory holding default.toml and environment overrides
    #[arg(long, global = true, default_value = "config", env = "COPYRELAY_CONFIG_DIR")]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run database migrations
    Migrate,

    /// Inspect the delivery journal
    #[command(subcommand)]
    Journal(journal::JournalCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}
