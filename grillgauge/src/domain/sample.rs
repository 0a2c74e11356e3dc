//! Temperature sample value object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A temperature reading captured by one successful probe read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Meat probe temperature in degrees Celsius.
    pub meat_temperature: Option<f64>,
    /// Ambient (grill) temperature in degrees Celsius.
    pub grill_temperature: Option<f64>,
    /// When the reading was taken.
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(
        meat_temperature: Option<f64>,
        grill_temperature: Option<f64>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            meat_temperature,
            grill_temperature,
            captured_at,
        }
    }

    /// Iterate over the temperatures that are present.
    pub fn temperatures(&self) -> impl Iterator<Item = f64> {
        self.meat_temperature
            .into_iter()
            .chain(self.grill_temperature)
    }
}
