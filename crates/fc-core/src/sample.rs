//! Location samples delivered by the location provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::types::ValidationError;

/// A single position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub position: Coordinate,
    /// Reported horizontal uncertainty in meters, 0 when unknown.
    #[serde(default)]
    pub accuracy_m: f64,
}

impl LocationSample {
    /// Builds a sample from raw provider values.
    ///
    /// Coordinates are validated; a negative or non-finite accuracy is
    /// treated as unknown.
    pub fn new(
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
        accuracy_m: f64,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            timestamp,
            position: Coordinate::new(lat, lon)?,
            accuracy_m: normalize_accuracy(accuracy_m),
        })
    }
}

fn normalize_accuracy(accuracy_m: f64) -> f64 {
    if accuracy_m.is_finite() && accuracy_m > 0.0 {
        accuracy_m
    } else {
        0.0
    }
}
