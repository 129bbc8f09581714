//! Haversine travel-time provider (fallback when no routing service is
//! available).
//!
//! Uses great-circle distance to estimate travel time. Less accurate
//! than a road-network provider (ignores roads) but always available,
//! never fails, and makes no network calls.

use crate::cache::{LegCost, unix_now};
use crate::stop::Stop;
use crate::traits::{ProviderClient, ProviderError};

/// Average driving speed assumption for time estimation.
const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle travel-time provider.
///
/// Estimates leg duration from straight-line distance and an assumed
/// speed. Useful as a fallback and for deterministic offline planning.
#[derive(Debug, Clone)]
pub struct HaversineProvider {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl Default for HaversineProvider {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineProvider {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    /// Calculate haversine distance between two points in kilometers.
    fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
        let (lat1, lng1) = from;
        let (lat2, lng2) = to;

        let lat1_rad = lat1.to_radians();
        let lat2_rad = lat2.to_radians();
        let delta_lat = (lat2 - lat1).to_radians();
        let delta_lng = (lng2 - lng1).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }

    /// Convert distance in km to travel time in seconds.
    fn km_to_seconds(&self, km: f64) -> i64 {
        let hours = km / self.speed_kmh;
        (hours * 3600.0).round() as i64
    }
}

impl ProviderClient for HaversineProvider {
    fn compute_leg(&self, origin: &Stop, destination: &Stop) -> Result<LegCost, ProviderError> {
        let km = Self::haversine_km(origin.location(), destination.location());
        Ok(LegCost::new(
            self.km_to_seconds(km),
            km * 1000.0,
            unix_now(),
        ))
    }
}
