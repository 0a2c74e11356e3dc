//! Domain value objects shared by discovery, polling and metrics.

mod probe;
mod sample;

pub use probe::{ProbeAddress, ProbeIdentity, ProbeName, slugify};
pub use sample::Sample;
