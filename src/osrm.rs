//! OSRM HTTP adapter for per-leg travel times.
//!
//! Thin transport layer: the planner core only ever sees the
//! [`ProviderClient`] trait and the transient/permanent failure split.

use serde::Deserialize;

use crate::cache::{LegCost, unix_now};
use crate::stop::Stop;
use crate::traits::{ProviderClient, ProviderError};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    /// OSRM expects `lng,lat` pairs, not `lat,lng`.
    fn route_url(&self, origin: &Stop, destination: &Stop) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=false",
            self.config.base_url, self.config.profile, origin.lon, origin.lat, destination.lon,
            destination.lat
        )
    }
}

/// Maps transport-level errors onto the retry taxonomy: timeouts and
/// connection failures are worth retrying, a garbled body is not.
fn classify(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::Permanent(format!("unreadable response: {err}"))
    } else {
        ProviderError::Transient(err.to_string())
    }
}

impl ProviderClient for OsrmClient {
    fn compute_leg(&self, origin: &Stop, destination: &Stop) -> Result<LegCost, ProviderError> {
        let url = self.route_url(origin, destination);
        let response = self.client.get(url).send().map_err(classify)?;

        let status = response.status();
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            return Err(ProviderError::Transient(format!("http {status}")));
        }
        if !status.is_success() {
            // 4xx from OSRM covers NoRoute / invalid coordinates; a retry
            // cannot change the answer.
            return Err(ProviderError::Permanent(format!("http {status}")));
        }

        let body: OsrmRouteResponse = response.json().map_err(classify)?;
        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Permanent("no route found".to_string()))?;

        Ok(LegCost::new(
            route.duration.round() as i64,
            route.distance,
            unix_now(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    duration: f64,
    distance: f64,
}
