use clap::Parser;
use copyrelay::adapters::PostgresStore;
use copyrelay::cli::{output, Cli, Commands};
use copyrelay::config::AppConfig;
use copyrelay::error::{RelayError, Result};
use tracing::info;

mod main_runtime;
use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;

    match cli.command {
        Commands::Migrate => {
            init_logging(&config.logging);
            if config.dry_run.enabled {
                return Err(RelayError::Validation(
                    "dry-run mode has no database to migrate".to_string(),
                ));
            }
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
            info!("delivery journal schema is up to date");
            output::print_success("✓ migrations applied");
        }
        Commands::Journal(cmd) => {
            init_logging_simple();
            cmd.run(&config).await?;
        }
        Commands::Config(cmd) => {
            init_logging_simple();
            cmd.run(&config)?;
        }
    }

    Ok(())
}
