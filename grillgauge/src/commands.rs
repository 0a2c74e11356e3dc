//! Subcommand implementations.
//!
//! Everything here is generic over the transport and the registry store so
//! the binary wires real hardware while tests use the mocks.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{ApiServer, ApiServerConfig, AppState};
use crate::ble::BleTransport;
use crate::cli::ServeArgs;
use crate::config::AppConfig;
use crate::discovery::{DiscoveryConfig, DiscoveryReport, DiscoveryScanner};
use crate::domain::{ProbeAddress, ProbeIdentity, ProbeName};
use crate::metrics::{HealthChecker, MetricsStore, PrometheusExporter};
use crate::poller::{POLLER_COMPONENT, PollingLoop};
use crate::registry::{RegisteredProbe, RegistryStore};
use crate::{Error, Result};

// ========== Serve ==========

/// Optional discovery, then polling and the HTTP server until `token` is
/// cancelled.
pub async fn serve<T: BleTransport>(
    transport: Arc<T>,
    store: Arc<dyn RegistryStore>,
    config: &AppConfig,
    args: &ServeArgs,
    token: CancellationToken,
) -> Result<()> {
    if args.skip_discovery {
        info!("Discovery skipped, polling the existing registry");
    } else {
        let scanner =
            DiscoveryScanner::new(transport.clone(), store.clone(), config.discovery_config());
        match scanner.run().await {
            Ok(report) => info!(
                registered = report.registered.len(),
                ignored = report.ignored.len(),
                deferred = report.deferred.len(),
                "Discovery finished"
            ),
            Err(e) => warn!("Discovery failed, polling the existing registry: {}", e),
        }
    }

    let metrics = Arc::new(MetricsStore::new());
    let poller = PollingLoop::new(transport, store, metrics.clone(), config.poller_config())?;
    let exporter = Arc::new(PrometheusExporter::new(metrics, poller.membership()));

    let health_checker = Arc::new(HealthChecker::new());
    let poller_health = poller.health();
    health_checker
        .register(POLLER_COMPONENT, Arc::new(move || poller_health.component()))
        .await;

    let poller_handle = poller.spawn(token.child_token());

    let server = ApiServer::with_cancel_token(
        ApiServerConfig {
            bind_address: args.host.clone(),
            port: args.port,
        },
        AppState::new(exporter, health_checker),
        token.clone(),
    );
    let result = server.run().await;

    token.cancel();
    if let Err(e) = poller_handle.await {
        warn!("Polling task did not shut down cleanly: {}", e);
    }

    result
}

// ========== Scan ==========

/// One discovery pass.
pub async fn scan<T: BleTransport>(
    transport: Arc<T>,
    store: Arc<dyn RegistryStore>,
    config: DiscoveryConfig,
) -> Result<DiscoveryReport> {
    DiscoveryScanner::new(transport, store, config).run().await
}

/// Human readable summary of a discovery pass.
pub fn render_report(report: &DiscoveryReport) -> String {
    let mut out = String::new();
    for identity in &report.registered {
        let _ = writeln!(out, "registered  {}", identity);
    }
    for address in &report.ignored {
        let _ = writeln!(out, "ignored     {}", address);
    }
    for address in &report.deferred {
        let _ = writeln!(out, "deferred    {}", address);
    }
    let _ = writeln!(
        out,
        "{} registered, {} ignored, {} deferred, {} already known",
        report.registered.len(),
        report.ignored.len(),
        report.deferred.len(),
        report.already_known.len()
    );
    out
}

// ========== Registry ==========

pub async fn list_probes(store: &dyn RegistryStore) -> Result<String> {
    let registry = store.load().await?;
    if registry.is_empty() {
        return Ok("no probes registered\n".to_string());
    }

    let mut out = String::new();
    for probe in registry.probes() {
        let last_seen = probe
            .last_seen
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<17}  {:<20}  {}",
            probe.identity.address, probe.identity.name, last_seen
        );
    }
    Ok(out)
}

/// Register a probe by hand.
pub async fn add_probe(
    store: &dyn RegistryStore,
    address: &str,
    name: &str,
) -> Result<ProbeIdentity> {
    let identity = ProbeIdentity::new(ProbeAddress::new(address)?, ProbeName::new(name)?);

    let mut registry = store.load().await?;
    registry.register(identity.clone(), None)?;
    store.save(&registry).await?;

    info!("Registered {}", identity);
    Ok(identity)
}

pub async fn remove_probe(store: &dyn RegistryStore, address: &str) -> Result<RegisteredProbe> {
    let address = ProbeAddress::new(address)?;

    let mut registry = store.load().await?;
    let removed = registry
        .unregister(&address)
        .ok_or_else(|| Error::registry(format!("probe {} is not registered", address)))?;
    store.save(&registry).await?;

    info!("Unregistered {}", removed.identity);
    Ok(removed)
}

pub async fn list_ignored(store: &dyn RegistryStore) -> Result<String> {
    let registry = store.load().await?;
    let mut out = String::new();
    for address in registry.ignored() {
        let _ = writeln!(out, "{}", address);
    }
    if out.is_empty() {
        out.push_str("no ignored devices\n");
    }
    Ok(out)
}

/// Drop an address from the ignore list so the next scan classifies it.
pub async fn unignore(store: &dyn RegistryStore, address: &str) -> Result<()> {
    let address = ProbeAddress::new(address)?;

    let mut registry = store.load().await?;
    if !registry.unignore(&address) {
        return Err(Error::registry(format!("{} is not ignored", address)));
    }
    store.save(&registry).await?;

    info!("Removed {} from the ignore list", address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryStore, ProbeRegistry};

    #[tokio::test]
    async fn test_add_and_remove_probe() {
        let store = MemoryStore::new(ProbeRegistry::new());

        let identity = add_probe(&store, "aa:bb:cc:dd:ee:01", "Brisket").await.unwrap();
        assert_eq!(identity.address.as_str(), "AA:BB:CC:DD:EE:01");
        assert_eq!(store.current().len(), 1);

        let listing = list_probes(&store).await.unwrap();
        assert!(listing.contains("AA:BB:CC:DD:EE:01"));
        assert!(listing.contains("Brisket"));

        let err = add_probe(&store, "AA:BB:CC:DD:EE:01", "Other").await.unwrap_err();
        assert!(matches!(err, Error::Registry(_)));

        remove_probe(&store, "AA:BB:CC:DD:EE:01").await.unwrap();
        assert!(store.current().is_empty());
        assert!(remove_probe(&store, "AA:BB:CC:DD:EE:01").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_before_saving() {
        let store = MemoryStore::new(ProbeRegistry::new());

        assert!(add_probe(&store, "", "Brisket").await.is_err());
        assert!(add_probe(&store, "AA:BB", "bad,name").await.is_err());
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_unignore() {
        let mut registry = ProbeRegistry::new();
        registry.ignore(ProbeAddress::new("11:22:33:44:55:66").unwrap());
        let store = MemoryStore::new(registry);

        assert!(list_ignored(&store).await.unwrap().contains("11:22:33:44:55:66"));

        unignore(&store, "11:22:33:44:55:66").await.unwrap();
        assert_eq!(store.current().ignored().count(), 0);
        assert!(unignore(&store, "11:22:33:44:55:66").await.is_err());
        assert_eq!(list_ignored(&store).await.unwrap(), "no ignored devices\n");
    }

    #[test]
    fn test_render_report() {
        let report = DiscoveryReport {
            deferred: vec![ProbeAddress::new("AA:AA:AA:AA:AA:AA").unwrap()],
            ..DiscoveryReport::default()
        };
        let text = render_report(&report);
        assert!(text.contains("deferred    AA:AA:AA:AA:AA:AA"));
        assert!(text.ends_with("0 registered, 0 ignored, 1 deferred, 0 already known\n"));
    }
}
