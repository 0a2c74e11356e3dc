//! Periodic polling of registered probes.
//!
//! One driver task ticks at a fixed interval. Every cycle it reloads the
//! registry, fans out one collector task per probe and applies each result
//! to the [`MetricsStore`] as soon as it arrives. A cycle always waits for
//! all of its tasks; because every task is bounded by a deadline shorter
//! than the interval, two attempts for the same probe never overlap.

mod health;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ble::BleTransport;
use crate::domain::ProbeIdentity;
use crate::metrics::{Membership, MetricsStore, Transition};
use crate::probe::{CollectorConfig, Failure, FailureKind, SampleCollector, SampleOutcome};
use crate::registry::{ProbeRegistry, RegistryStore};
use crate::{Error, Result};

pub use health::{POLLER_COMPONENT, PollerHealth};

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between cycle starts.
    pub interval: Duration,
    pub collector: CollectorConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            collector: CollectorConfig::default(),
        }
    }
}

impl PollerConfig {
    /// Reject configurations that would let cycles overlap.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.collector.deadline.is_zero() {
            return Err(Error::config("probe deadline must be greater than zero"));
        }
        if self.collector.deadline >= self.interval {
            return Err(Error::config(format!(
                "probe deadline ({:?}) must be shorter than the poll interval ({:?})",
                self.collector.deadline, self.interval
            )));
        }
        Ok(())
    }
}

/// Summary of one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probes: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// The registry could not be reloaded; the previous snapshot was used.
    pub registry_stale: bool,
    pub duration: Duration,
}

/// The polling driver.
pub struct PollingLoop<T: BleTransport> {
    collector: SampleCollector<T>,
    registry: Arc<dyn RegistryStore>,
    metrics: Arc<MetricsStore>,
    health: Arc<PollerHealth>,
    membership: watch::Sender<Membership>,
    last_registry: ProbeRegistry,
    config: PollerConfig,
}

impl<T: BleTransport> PollingLoop<T> {
    /// Create a new polling loop.
    pub fn new(
        transport: Arc<T>,
        registry: Arc<dyn RegistryStore>,
        metrics: Arc<MetricsStore>,
        config: PollerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (membership, _) = watch::channel(Membership::default());

        Ok(Self {
            collector: SampleCollector::new(transport, config.collector.clone()),
            registry,
            metrics,
            health: Arc::new(PollerHealth::new(config.interval)),
            membership,
            last_registry: ProbeRegistry::new(),
            config,
        })
    }

    pub fn health(&self) -> Arc<PollerHealth> {
        self.health.clone()
    }

    /// Receiver for the registry membership published each cycle.
    pub fn membership(&self) -> watch::Receiver<Membership> {
        self.membership.subscribe()
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Run cycles until cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.health.record_running();
        info!(
            "Polling loop started (interval: {:?}, deadline: {:?})",
            self.config.interval, self.config.collector.deadline
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Polling loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.duration > self.config.interval {
                        warn!(
                            "Polling cycle took {:?}, longer than the {:?} interval",
                            report.duration, self.config.interval
                        );
                    }
                }
            }
        }
    }

    /// Spawn the driver.
    ///
    /// When the driver task ends for any reason the health state records
    /// why, so `/health` stops reporting healthy.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        let health = self.health.clone();

        tokio::spawn(async move {
            match AssertUnwindSafe(self.run(token)).catch_unwind().await {
                Ok(()) => health.record_stopped("polling loop stopped"),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Polling loop panicked: {}", message);
                    health.record_stopped(format!("polling loop panicked: {}", message));
                }
            }
        })
    }

    /// Run a single cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.health.record_cycle_started();
        let started = Instant::now();
        let mut report = CycleReport::default();

        match self.registry.load().await {
            Ok(registry) => self.last_registry = registry,
            Err(e) => {
                warn!("Failed to reload registry, using previous snapshot: {}", e);
                report.registry_stale = true;
            }
        }

        let identities = self.last_registry.identities();
        self.membership
            .send_replace(Arc::new(self.last_registry.membership()));
        report.probes = identities.len();

        let mut tasks = JoinSet::new();
        for identity in identities {
            let collector = self.collector.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(collector.collect(&identity))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(Failure::new(
                            identity.clone(),
                            FailureKind::Internal,
                            format!("collector panicked: {}", panic_message(panic.as_ref())),
                        ))
                    });
                (identity, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((identity, outcome)) => {
                    if outcome.is_ok() {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                    }
                    self.apply(&identity, &outcome);
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Collector task failed: {}", e);
                }
            }
        }

        report.duration = started.elapsed();
        self.health.record_cycle_completed();
        debug!(
            "Polling cycle finished: {}/{} probes ok in {:?}",
            report.succeeded, report.probes, report.duration
        );
        report
    }

    fn apply(&self, identity: &ProbeIdentity, outcome: &SampleOutcome) {
        let (state, transition) = self.metrics.apply_result(identity, outcome);

        match (outcome, transition) {
            (Ok(_), Transition::CameOnline) => info!("{} is online", identity),
            (Err(failure), Transition::WentOffline) => {
                warn!("{} is offline: {}", identity, failure.message)
            }
            (Err(failure), _) => debug!(
                "{} still offline ({} consecutive failures): {}",
                identity, state.consecutive_failures, failure.message
            ),
            (Ok(sample), _) => debug!(
                "{} meat={:?} grill={:?}",
                identity, sample.meat_temperature, sample.grill_temperature
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
