//! Per-probe metrics state.
//!
//! One map entry per identity; writers for different probes never contend
//! on a shared lock. Readers always get copies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::domain::{ProbeIdentity, Sample};
use crate::probe::{FailureKind, SampleOutcome};

/// State held for one probe.
///
/// When offline, `last_good_sample` still holds the last real reading (or
/// nothing if the probe never answered). It is never replaced by a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeState {
    pub last_good_sample: Option<Sample>,
    pub is_online: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<FailureKind>,
    /// Total attempts applied, successful or not.
    pub attempts: u64,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Online status change caused by applying a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    CameOnline,
    WentOffline,
}

/// In-memory store of [`ProbeState`] keyed by identity.
#[derive(Debug, Default)]
pub struct MetricsStore {
    states: DashMap<ProbeIdentity, ProbeState>,
}

impl MetricsStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one sampling outcome.
    ///
    /// Success replaces the sample and resets the failure counter; failure
    /// only flips the status and counts. Returns the resulting state and
    /// the status transition.
    pub fn apply_result(
        &self,
        identity: &ProbeIdentity,
        outcome: &SampleOutcome,
    ) -> (ProbeState, Transition) {
        let mut state = self.states.entry(identity.clone()).or_default();

        let previous = (state.attempts > 0).then_some(state.is_online);

        state.attempts += 1;
        state.last_attempt_at = Some(Utc::now());

        match outcome {
            Ok(sample) => {
                state.last_good_sample = Some(*sample);
                state.is_online = true;
                state.consecutive_failures = 0;
            }
            Err(failure) => {
                state.is_online = false;
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_failure = Some(failure.kind);
            }
        }

        let transition = match (previous, state.is_online) {
            (None | Some(false), true) => Transition::CameOnline,
            (None | Some(true), false) => Transition::WentOffline,
            _ => Transition::Unchanged,
        };

        (state.clone(), transition)
    }

    /// Copy of a single probe's state.
    pub fn get(&self, identity: &ProbeIdentity) -> Option<ProbeState> {
        self.states.get(identity).map(|s| s.clone())
    }

    /// Point-in-time copy of every state.
    pub fn snapshot(&self) -> BTreeMap<ProbeIdentity, ProbeState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProbeAddress, ProbeName};
    use crate::probe::Failure;

    fn identity() -> ProbeIdentity {
        ProbeIdentity::new(
            ProbeAddress::new("AA:00:00:00:00:01").unwrap(),
            ProbeName::new("Probe1").unwrap(),
        )
    }

    fn success(meat: f64, grill: f64) -> SampleOutcome {
        Ok(Sample::new(Some(meat), Some(grill), Utc::now()))
    }

    fn failure(kind: FailureKind) -> SampleOutcome {
        Err(Failure::new(identity(), kind, "boom"))
    }

    #[test]
    fn test_success_sets_online() {
        let store = MetricsStore::new();
        let (state, transition) = store.apply_result(&identity(), &success(55.0, 180.0));

        assert!(state.is_online);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(transition, Transition::CameOnline);
        assert_eq!(
            state.last_good_sample.and_then(|s| s.meat_temperature),
            Some(55.0)
        );
    }

    #[test]
    fn test_failure_keeps_last_good_sample() {
        let store = MetricsStore::new();
        store.apply_result(&identity(), &success(55.0, 180.0));

        let (state, transition) =
            store.apply_result(&identity(), &failure(FailureKind::Connection));
        assert_eq!(transition, Transition::WentOffline);

        let (state_after, transition) =
            store.apply_result(&identity(), &failure(FailureKind::DeadlineExceeded));
        assert_eq!(transition, Transition::Unchanged);

        assert!(!state.is_online);
        assert!(!state_after.is_online);
        assert_eq!(state_after.consecutive_failures, 2);
        assert_eq!(state_after.last_failure, Some(FailureKind::DeadlineExceeded));
        let sample = state_after.last_good_sample.unwrap();
        assert_eq!(sample.meat_temperature, Some(55.0));
        assert_eq!(sample.grill_temperature, Some(180.0));
    }

    #[test]
    fn test_first_failure_has_no_sample() {
        let store = MetricsStore::new();
        let (state, transition) = store.apply_result(&identity(), &failure(FailureKind::Read));

        assert_eq!(transition, Transition::WentOffline);
        assert!(state.last_good_sample.is_none());
        assert_eq!(state.attempts, 1);
    }

    #[test]
    fn test_last_good_sample_tracks_most_recent_success() {
        let store = MetricsStore::new();
        let outcomes = [
            success(20.0, 100.0),
            failure(FailureKind::Connection),
            success(30.0, 110.0),
            failure(FailureKind::ImplausibleReading),
            failure(FailureKind::Read),
        ];

        let mut expected = None;
        for outcome in &outcomes {
            if let Ok(sample) = outcome {
                expected = Some(*sample);
            }
            let (state, _) = store.apply_result(&identity(), outcome);
            assert_eq!(state.last_good_sample, expected);
            assert_eq!(state.is_online, outcome.is_ok());
        }

        let state = store.get(&identity()).unwrap();
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.attempts, 5);
    }

    #[test]
    fn test_recovery_resets_failures() {
        let store = MetricsStore::new();
        store.apply_result(&identity(), &failure(FailureKind::Connection));
        store.apply_result(&identity(), &failure(FailureKind::Connection));

        let (state, transition) = store.apply_result(&identity(), &success(40.0, 150.0));
        assert_eq!(transition, Transition::CameOnline);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.is_online);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = MetricsStore::new();
        store.apply_result(&identity(), &success(55.0, 180.0));

        let snapshot = store.snapshot();
        store.apply_result(&identity(), &failure(FailureKind::Connection));

        assert!(snapshot[&identity()].is_online);
        assert!(!store.get(&identity()).unwrap().is_online);
        assert_eq!(store.len(), 1);
    }
}
