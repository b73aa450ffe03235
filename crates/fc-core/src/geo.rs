//! Great-circle distance on a spherical Earth.

use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A validated WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Creates a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::LatitudeOutOfRange { value: lat });
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(ValidationError::LongitudeOutOfRange { value: lon });
        }
        Ok(Self { lat, lon })
    }

    /// Distance to another coordinate in meters.
    pub fn distance_to(&self, other: &Self) -> f64 {
        distance(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Haversine distance between two points, in meters.
///
/// # Panics
///
/// Panics if any input is NaN or infinite. Coordinates reaching this function
/// have already been validated, so a non-finite value is a logic error.
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    assert!(
        lat1.is_finite() && lon1.is_finite() && lat2.is_finite() && lon2.is_finite(),
        "non-finite coordinate passed to distance: ({lat1}, {lon1}) -> ({lat2}, {lon2})"
    );

    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1.0 for antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Meters spanned by one degree of latitude on the model sphere.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
