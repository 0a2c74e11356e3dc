//! Per-probe sampling.
//!
//! [`ProbeLink`] owns one connection to one probe and drives it through
//! connect, read and disconnect. [`SampleCollector`] wraps a link in the
//! per-probe deadline and turns every outcome into a [`Sample`] or a
//! [`Failure`].

mod collector;
mod link;

use std::fmt;

use serde::Serialize;

use crate::domain::{ProbeIdentity, Sample};

pub use collector::{CollectorConfig, SampleCollector};
pub use link::{LinkConfig, LinkState, ProbeError, ProbeLink};

/// Result of one sampling attempt.
pub type SampleOutcome = std::result::Result<Sample, Failure>;

/// Classification of a failed sampling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Could not establish a connection.
    Connection,
    /// Connected but the read failed or returned garbage.
    Read,
    /// The probe reported a value outside the physical range.
    ImplausibleReading,
    /// The attempt did not finish within the per-probe deadline.
    DeadlineExceeded,
    /// The sampling task itself failed.
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Read => "read",
            Self::ImplausibleReading => "implausible_reading",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed sampling attempt for one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub identity: ProbeIdentity,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(identity: ProbeIdentity, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            identity,
            kind,
            message: message.into(),
        }
    }

    /// Map a link error onto the failure taxonomy.
    pub fn from_probe_error(identity: ProbeIdentity, error: ProbeError) -> Self {
        let kind = match &error {
            ProbeError::Connection { .. } => FailureKind::Connection,
            ProbeError::Read(_) => FailureKind::Read,
            ProbeError::ImplausibleReading(_) => FailureKind::ImplausibleReading,
            ProbeError::InvalidState(_) => FailureKind::Internal,
        };
        Self::new(identity, kind, error.to_string())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.identity, self.kind, self.message)
    }
}
