//! Probe discovery.
//!
//! Discovery runs once before polling starts (or on demand through the
//! `scan` command). It never touches devices that are already registered
//! or ignored.

mod classifier;
mod scanner;

pub use classifier::{Classification, DeviceClassifier, EnumerationError};
pub use scanner::{DiscoveryConfig, DiscoveryReport, DiscoveryScanner};
