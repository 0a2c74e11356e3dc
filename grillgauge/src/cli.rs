//! Command line interface.

use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "grillgauge")]
#[command(version)]
#[command(about = "Prometheus exporter for BLE meat and grill probes")]
#[command(long_about = "Prometheus exporter for BLE meat and grill probes

EXAMPLES:
    grillgauge serve                       Discover probes, then poll and serve /metrics
    grillgauge serve --skip-discovery      Poll only the probes already registered
    grillgauge scan --timeout 20           Run one discovery pass and print the result
    grillgauge probes list                 List registered probes
    grillgauge probes add AA:BB:CC:DD:EE:FF Brisket
    grillgauge ignored remove AA:BB:CC:DD:EE:FF

ENVIRONMENT VARIABLES:
    RUST_LOG                      Log filter (default grillgauge=info,btleplug=warn)
    GRILLGAUGE_HOST               HTTP bind address
    GRILLGAUGE_PORT               HTTP port
    GRILLGAUGE_REGISTRY_FILE      Probe registry file")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub config: AppConfig,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Poll registered probes and serve /metrics and /health
    Serve(ServeArgs),

    /// Run one discovery pass and print what changed
    Scan {
        /// Seconds to listen for advertisements (overrides the configured scan timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Registered probe management
    #[command(subcommand)]
    Probes(ProbeCommands),

    /// Ignore list management
    #[command(subcommand)]
    Ignored(IgnoredCommands),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// HTTP bind address
    #[arg(long, env = "GRILLGAUGE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port
    #[arg(long, env = "GRILLGAUGE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Skip the discovery pass that normally runs before polling starts
    #[arg(long)]
    pub skip_discovery: bool,
}

#[derive(Debug, Subcommand)]
pub enum ProbeCommands {
    /// List registered probes
    List,
    /// Register a probe by address
    Add {
        /// Bluetooth address, e.g. AA:BB:CC:DD:EE:FF
        address: String,
        /// Display name
        name: String,
    },
    /// Unregister a probe
    Remove {
        address: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum IgnoredCommands {
    /// List ignored addresses
    List,
    /// Remove an address from the ignore list so the next scan classifies it again
    Remove {
        address: String,
    },
}
