//! Cobble CLI entry point

use clap::Parser;
use tracing::{error, info};

use cobble_btleplug::BtleplugAdapter;
use cobble_cli::{
    cli::Cli,
    commands::{simulated_adapter, CommandDispatcher},
    config::AppConfig,
    error::Result,
};
use cobble_core::{Central, DeliveryMode};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let mut config = load_configuration(&cli)?;
    if cli.deferred {
        config.core.delivery = DeliveryMode::Deferred;
    }

    let outcome = if cli.simulate {
        info!("Using the simulated adapter");
        let central = Central::new(config.core, simulated_adapter());
        CommandDispatcher::execute(cli.command, &central).await
    } else {
        let adapter = BtleplugAdapter::new(config.btleplug)?;
        let central = Central::new(config.core, adapter);
        CommandDispatcher::execute(cli.command, &central).await
    };

    if let Err(e) = outcome {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        AppConfig::load_from_file(config_path)
    } else {
        Ok(AppConfig::default())
    }
}
