use tracing::info;

use querypulse::logging::init_logging;
use querypulse::{Config, Result};

mod app_config;
mod commands;

use app_config::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    use clap::Parser;

    let cli = Cli::parse();

    let mut logging = Config::default().logging;
    if cli.verbose {
        logging.level = "debug".to_string();
    } else if let Ok(level) = std::env::var("QUERYPULSE_LOG_LEVEL") {
        logging.level = level;
    }
    init_logging(&logging);

    info!(command = cli.command.name(), "QueryPulse starting");

    match cli.command {
        Commands::Config { file } => {
            commands::config_command(file.as_deref())?;
        }

        Commands::Suggest { sql } => {
            commands::suggest_command(&sql)?;
        }

        Commands::Simulate {
            queries,
            slow_every,
            file,
            json,
            prometheus,
        } => {
            commands::simulate_command(file.as_deref(), queries, slow_every, json, prometheus).await?;
        }
    }

    Ok(())
}
