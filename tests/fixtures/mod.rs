//! Shared test fixtures for itinerary-planner.
//!
//! Provides a deterministic grid-world provider (1 coordinate unit =
//! 1 minute of travel) plus small helpers for building trips.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use itinerary_planner::cache::LegCost;
use itinerary_planner::executor::CancelToken;
use itinerary_planner::stop::Stop;
use itinerary_planner::traits::{ProviderClient, ProviderError};

pub fn minutes(m: i64) -> i64 {
    m * 60
}

/// Manhattan-distance provider: predictable, deterministic, offline.
///
/// Travel time between stops is their manhattan distance in coordinate
/// units, one minute per unit. Specific directed legs can be configured
/// to fail permanently (as if no road connects the pair).
#[derive(Debug, Default)]
pub struct GridProvider {
    no_route: HashSet<(String, String)>,
    calls: AtomicUsize,
}

impl GridProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the directed leg `from -> to` fail with a permanent error.
    pub fn without_route(mut self, from: &str, to: &str) -> Self {
        self.no_route.insert((from.to_string(), to.to_string()));
        self
    }

    /// Total provider invocations, across retries.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderClient for GridProvider {
    fn compute_leg(&self, origin: &Stop, destination: &Stop) -> Result<LegCost, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let leg = (origin.key.clone(), destination.key.clone());
        if self.no_route.contains(&leg) {
            return Err(ProviderError::Permanent("no route found".to_string()));
        }

        let blocks =
            (origin.lat - destination.lat).abs() + (origin.lon - destination.lon).abs();
        Ok(LegCost::new(
            (blocks * 60.0).round() as i64,
            blocks * 1000.0,
            0,
        ))
    }
}

/// Wrapper that fires a cancel token once a number of provider calls
/// have completed, to interrupt a plan mid-search.
pub struct CancelAfter<P> {
    inner: P,
    after: usize,
    calls: AtomicUsize,
    token: CancelToken,
}

impl<P> CancelAfter<P> {
    pub fn new(inner: P, after: usize, token: CancelToken) -> Self {
        Self {
            inner,
            after,
            calls: AtomicUsize::new(0),
            token,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<P: ProviderClient> ProviderClient for CancelAfter<P> {
    fn compute_leg(&self, origin: &Stop, destination: &Stop) -> Result<LegCost, ProviderError> {
        let result = self.inner.compute_leg(origin, destination);
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
        result
    }
}
