//! Configuration management commands
//!
//! copyrelay config check - Load and validate configuration
//! copyrelay config show  - Print the effective delivery policy

use anyhow::Result;
use clap::Subcommand;

use super::output;
use crate::config::AppConfig;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Load configuration and report every violation
    Check,

    /// Show the effective delivery policy
    Show,
}

impl ConfigCommands {
    pub fn run(self, config: &AppConfig) -> Result<()> {
        match self {
            Self::Check => check(config),
            Self::Show => output::print_item(&config.delivery),
        }
    }
}

fn check(config: &AppConfig) -> Result<()> {
    match config.validate() {
        Ok(()) => {
            output::print_success("✓ configuration is valid");
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                output::print_error(&format!("✗ {error}"));
            }
            anyhow::bail!("{} configuration error(s)", errors.len())
        }
    }
}
