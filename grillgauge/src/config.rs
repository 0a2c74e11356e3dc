//! Runtime configuration.
//!
//! Every setting is a CLI flag with a `GRILLGAUGE_*` environment fallback.
//! `.env` is loaded before parsing, so the registry file can also carry
//! settings.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use uuid::Uuid;

use crate::ble::ProbeProfile;
use crate::discovery::DiscoveryConfig;
use crate::poller::PollerConfig;
use crate::probe::{CollectorConfig, LinkConfig};
use crate::{Error, Result};

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct AppConfig {
    /// Key=value file holding the probe registry
    #[arg(long, env = "GRILLGAUGE_REGISTRY_FILE", default_value = ".env", global = true)]
    pub registry_file: PathBuf,

    /// Directory for daily rolling log files (console only when unset)
    #[arg(long, env = "GRILLGAUGE_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log filter directive replacing the default, e.g. `grillgauge=debug`
    #[arg(long, env = "GRILLGAUGE_LOG_FILTER", global = true)]
    pub log_filter: Option<String>,

    /// Seconds between polling cycles
    #[arg(long, env = "GRILLGAUGE_POLL_INTERVAL_SECS", default_value_t = 10, global = true)]
    pub poll_interval_secs: u64,

    /// Upper bound in seconds on connect plus read for one probe
    #[arg(long, env = "GRILLGAUGE_PROBE_DEADLINE_SECS", default_value_t = 8, global = true)]
    pub probe_deadline_secs: u64,

    /// Seconds allowed for one connect attempt
    #[arg(long, env = "GRILLGAUGE_CONNECT_TIMEOUT_SECS", default_value_t = 3, global = true)]
    pub connect_timeout_secs: u64,

    /// Extra connect attempts after a transient failure
    #[arg(long, env = "GRILLGAUGE_CONNECT_RETRIES", default_value_t = 1, global = true)]
    pub connect_retries: u32,

    /// Seconds allowed for one characteristic read
    #[arg(long, env = "GRILLGAUGE_READ_TIMEOUT_SECS", default_value_t = 3, global = true)]
    pub read_timeout_secs: u64,

    /// Seconds to listen for advertisements during discovery
    #[arg(long, env = "GRILLGAUGE_SCAN_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub scan_timeout_secs: u64,

    /// Probe data service UUID
    #[arg(long, env = "GRILLGAUGE_DATA_SERVICE_UUID", global = true)]
    pub data_service_uuid: Option<String>,

    /// Probe temperature characteristic UUID
    #[arg(long, env = "GRILLGAUGE_TEMP_CHARACTERISTIC_UUID", global = true)]
    pub temp_characteristic_uuid: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            registry_file: PathBuf::from(".env"),
            log_dir: None,
            log_filter: None,
            poll_interval_secs: 10,
            probe_deadline_secs: 8,
            connect_timeout_secs: 3,
            connect_retries: 1,
            read_timeout_secs: 3,
            scan_timeout_secs: 10,
            data_service_uuid: None,
            temp_characteristic_uuid: None,
        }
    }
}

impl AppConfig {
    /// Check every setting before anything is started.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect timeout", self.connect_timeout_secs),
            ("read timeout", self.read_timeout_secs),
            ("scan timeout", self.scan_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{} must be greater than zero", name)));
            }
        }

        self.poller_config().validate()?;
        self.probe_profile()?;
        Ok(())
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            collector: CollectorConfig {
                deadline: Duration::from_secs(self.probe_deadline_secs),
                link: LinkConfig {
                    connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                    connect_retries: self.connect_retries,
                    read_timeout: Duration::from_secs(self.read_timeout_secs),
                    ..LinkConfig::default()
                },
            },
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            ..DiscoveryConfig::default()
        }
    }

    /// Probe GATT layout, with configured UUIDs replacing the defaults.
    pub fn probe_profile(&self) -> Result<ProbeProfile> {
        let mut profile = ProbeProfile::default();
        if let Some(raw) = &self.data_service_uuid {
            profile.service = parse_uuid("data service", raw)?;
        }
        if let Some(raw) = &self.temp_characteristic_uuid {
            profile.temperature_characteristic = parse_uuid("temperature characteristic", raw)?;
        }
        Ok(profile)
    }
}

fn parse_uuid(what: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|e| Error::config(format!("invalid {} UUID '{}': {}", what, raw, e)))
}
