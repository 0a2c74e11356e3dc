//! Durable registry of known probes and ignored devices.
//!
//! [`ProbeRegistry`] is a plain value; persistence goes through a
//! [`RegistryStore`]. Discovery and the CLI mutate a copy and save it back,
//! the polling loop only ever reads snapshots.

mod store;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ProbeAddress, ProbeIdentity, ProbeName};
use crate::{Error, Result};

pub use store::{EnvFileStore, MemoryStore, RegistryStore};

/// A registered probe together with when it was last seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredProbe {
    pub identity: ProbeIdentity,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Known probes plus the ignore list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeRegistry {
    probes: Vec<RegisteredProbe>,
    ignored: BTreeSet<ProbeAddress>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered probes in registration order.
    pub fn probes(&self) -> &[RegisteredProbe] {
        &self.probes
    }

    pub fn identities(&self) -> Vec<ProbeIdentity> {
        self.probes.iter().map(|p| p.identity.clone()).collect()
    }

    /// Identity set used to filter rendered metrics.
    pub fn membership(&self) -> BTreeSet<ProbeIdentity> {
        self.probes.iter().map(|p| p.identity.clone()).collect()
    }

    pub fn ignored(&self) -> impl Iterator<Item = &ProbeAddress> {
        self.ignored.iter()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn get(&self, address: &ProbeAddress) -> Option<&RegisteredProbe> {
        self.probes.iter().find(|p| &p.identity.address == address)
    }

    pub fn is_registered(&self, address: &ProbeAddress) -> bool {
        self.get(address).is_some()
    }

    pub fn is_ignored(&self, address: &ProbeAddress) -> bool {
        self.ignored.contains(address)
    }

    /// Whether the address is either registered or ignored.
    pub fn is_known(&self, address: &ProbeAddress) -> bool {
        self.is_registered(address) || self.is_ignored(address)
    }

    /// Register a probe.
    ///
    /// An address that was on the ignore list is removed from it.
    pub fn register(
        &mut self,
        identity: ProbeIdentity,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if self.is_registered(&identity.address) {
            return Err(Error::registry(format!(
                "probe {} is already registered",
                identity.address
            )));
        }

        self.ignored.remove(&identity.address);
        self.probes.push(RegisteredProbe {
            identity,
            last_seen,
        });
        Ok(())
    }

    /// Remove a probe, returning its entry.
    pub fn unregister(&mut self, address: &ProbeAddress) -> Option<RegisteredProbe> {
        let index = self
            .probes
            .iter()
            .position(|p| &p.identity.address == address)?;
        Some(self.probes.remove(index))
    }

    /// Add an address to the ignore list.
    ///
    /// Returns false if the address is registered or already ignored.
    pub fn ignore(&mut self, address: ProbeAddress) -> bool {
        if self.is_registered(&address) {
            return false;
        }
        self.ignored.insert(address)
    }

    pub fn unignore(&mut self, address: &ProbeAddress) -> bool {
        self.ignored.remove(address)
    }

    /// First `ProbeN` name not used by any registered probe.
    pub fn next_probe_name(&self) -> ProbeName {
        (1u32..)
            .map(ProbeName::numbered)
            .find(|candidate| self.probes.iter().all(|p| &p.identity.name != candidate))
            .unwrap_or_else(|| ProbeName::numbered(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(address: &str, name: &str) -> ProbeIdentity {
        ProbeIdentity::new(
            ProbeAddress::new(address).unwrap(),
            ProbeName::new(name).unwrap(),
        )
    }

    #[test]
    fn test_register_and_unregister() {
        let mut registry = ProbeRegistry::new();
        registry
            .register(identity("AA:00:00:00:00:01", "Probe1"), None)
            .unwrap();

        let address = ProbeAddress::new("aa:00:00:00:00:01").unwrap();
        assert!(registry.is_registered(&address));
        assert!(registry.register(identity("AA:00:00:00:00:01", "Other"), None).is_err());

        let removed = registry.unregister(&address).unwrap();
        assert_eq!(removed.identity.name.as_str(), "Probe1");
        assert!(registry.is_empty());
        assert!(registry.unregister(&address).is_none());
    }

    #[test]
    fn test_next_probe_name_fills_gaps() {
        let mut registry = ProbeRegistry::new();
        assert_eq!(registry.next_probe_name().as_str(), "Probe1");

        registry
            .register(identity("AA:00:00:00:00:01", "Probe1"), None)
            .unwrap();
        registry
            .register(identity("AA:00:00:00:00:03", "Probe3"), None)
            .unwrap();
        assert_eq!(registry.next_probe_name().as_str(), "Probe2");

        registry
            .register(identity("AA:00:00:00:00:02", "Brisket"), None)
            .unwrap();
        assert_eq!(registry.next_probe_name().as_str(), "Probe2");
    }

    #[test]
    fn test_ignore_list() {
        let mut registry = ProbeRegistry::new();
        let speaker = ProbeAddress::new("BB:00:00:00:00:01").unwrap();

        assert!(registry.ignore(speaker.clone()));
        assert!(!registry.ignore(speaker.clone()));
        assert!(registry.is_known(&speaker));
        assert!(!registry.is_registered(&speaker));

        registry
            .register(identity("BB:00:00:00:00:01", "Probe1"), None)
            .unwrap();
        assert!(!registry.is_ignored(&speaker));
        assert!(!registry.ignore(speaker.clone()));

        registry.unregister(&speaker);
        assert!(!registry.is_known(&speaker));
    }

    #[test]
    fn test_membership() {
        let mut registry = ProbeRegistry::new();
        registry
            .register(identity("AA:00:00:00:00:02", "Probe2"), None)
            .unwrap();
        registry
            .register(identity("AA:00:00:00:00:01", "Probe1"), None)
            .unwrap();

        let membership = registry.membership();
        assert_eq!(membership.len(), 2);
        assert!(membership.contains(&identity("AA:00:00:00:00:01", "Probe1")));
        assert!(!membership.contains(&identity("AA:00:00:00:00:01", "Renamed")));
    }
}
