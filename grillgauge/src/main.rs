use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use grillgauge::ble::BtleplugTransport;
use grillgauge::cli::{Cli, Commands, IgnoredCommands, ProbeCommands};
use grillgauge::commands;
use grillgauge::logging::init_logging;
use grillgauge::registry::{EnvFileStore, RegistryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads its env fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = cli.config;

    let (logging, _guard) =
        init_logging(config.log_dir.as_deref()).context("Failed to initialize logging")?;
    if let Some(directive) = &config.log_filter {
        logging.set_filter(directive)?;
    }
    debug!("Log filter: {}", logging.get_filter());

    config.validate()?;

    let store: Arc<dyn RegistryStore> = Arc::new(EnvFileStore::new(&config.registry_file));

    match cli.command {
        Commands::Serve(args) => {
            let transport = Arc::new(
                BtleplugTransport::new(config.probe_profile()?)
                    .await
                    .context("Failed to open the bluetooth adapter")?,
            );

            let token = CancellationToken::new();
            logging.start_retention_cleanup(token.clone());

            let shutdown = token.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Received Ctrl-C, shutting down"),
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
                shutdown.cancel();
            });

            info!(
                "grillgauge {} starting (registry: {})",
                env!("CARGO_PKG_VERSION"),
                config.registry_file.display()
            );
            commands::serve(transport, store, &config, &args, token).await?;
        }

        Commands::Scan { timeout } => {
            let transport = Arc::new(
                BtleplugTransport::new(config.probe_profile()?)
                    .await
                    .context("Failed to open the bluetooth adapter")?,
            );

            let mut discovery = config.discovery_config();
            if let Some(secs) = timeout {
                discovery.scan_timeout = std::time::Duration::from_secs(secs);
            }

            let report = commands::scan(transport, store, discovery).await?;
            print!("{}", commands::render_report(&report));
        }

        Commands::Probes(ProbeCommands::List) => {
            print!("{}", commands::list_probes(store.as_ref()).await?);
        }
        Commands::Probes(ProbeCommands::Add { address, name }) => {
            let identity = commands::add_probe(store.as_ref(), &address, &name).await?;
            println!("registered {}", identity);
        }
        Commands::Probes(ProbeCommands::Remove { address }) => {
            let removed = commands::remove_probe(store.as_ref(), &address).await?;
            println!("removed {}", removed.identity);
        }

        Commands::Ignored(IgnoredCommands::List) => {
            print!("{}", commands::list_ignored(store.as_ref()).await?);
        }
        Commands::Ignored(IgnoredCommands::Remove { address }) => {
            commands::unignore(store.as_ref(), &address).await?;
            println!("{} will be classified again on the next scan", address.trim());
        }
    }

    Ok(())
}
