//! BlueSync - point-to-point clipboard synchronization
//!
//! This is the main entry point for the bluesync command.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluesync::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bluesync={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("BlueSync v{}", bluesync::VERSION);
    debug!(
        "Built {} for {} ({})",
        env!("BUILD_DATE"),
        env!("TARGET"),
        env!("PROFILE")
    );

    let mut handler = CliHandler::new(cli.config)?;
    handler.handle_command(cli.command).await?;

    Ok(())
}
