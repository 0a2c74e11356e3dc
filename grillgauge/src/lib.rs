//! grillgauge library crate.
//!
//! Polls BLE meat/grill probes and exposes their last known temperatures as
//! Prometheus metrics. This module exposes the core functionality for
//! integration testing.

pub mod api;
pub mod ble;
pub mod cli;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod probe;
pub mod registry;

pub use error::{Error, Result};
