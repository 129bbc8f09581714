//! Top-level planning entry point.
//!
//! Validates the trip, wires up a per-run cache and executor, drives the
//! solver, and shapes the result. Partial failure is not an error here:
//! a plan that drops stops still succeeds and says which stops were
//! dropped and why.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cache::TravelTimeCache;
use crate::executor::{CancelToken, ExecutorOptions, RouteQueryExecutor};
use crate::solver::{self, SolveOptions, SolveOutcome, StopTiming, UnscheduledReason};
use crate::stop::TripSpec;
use crate::traits::ProviderClient;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Malformed trip; nothing was attempted against the provider.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Not even a degenerate origin-only itinerary was possible.
    #[error("planning failed: {0}")]
    PlanningFailed(String),
    /// The caller aborted the run.
    #[error("planning cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub executor: ExecutorOptions,
    pub solve: SolveOptions,
}

/// One visited stop in the final itinerary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledStop {
    pub key: String,
    /// Arrival time, unix seconds (after any wait for the window).
    pub arrival: i64,
    /// Arrival plus service duration.
    pub departure: i64,
    /// Slack spent waiting for the stop's window to open.
    pub wait_secs: i64,
}

/// A stop the planner could not fit, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscheduledStop {
    pub key: String,
    pub reason: UnscheduledReason,
}

/// Final planning result, owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    /// Visiting order: origin first, terminus last when it was placed.
    pub stops: Vec<ScheduledStop>,
    pub unscheduled: Vec<UnscheduledStop>,
    /// Departure to final departure, in seconds.
    pub total_duration_secs: i64,
    pub total_wait_secs: i64,
}

/// Plans an itinerary with a cache and executor scoped to this call.
///
/// Unrelated planning calls never share travel-time state. To reuse
/// already-fetched legs (for example when retrying a cancelled run),
/// build the executor once and call [`plan_with_executor`].
pub fn plan(
    trip: &TripSpec,
    provider: Arc<dyn ProviderClient>,
    options: &PlanOptions,
    cancel: &CancelToken,
) -> Result<Itinerary, PlanError> {
    let cache = Arc::new(TravelTimeCache::new());
    let executor =
        RouteQueryExecutor::new(provider, cache, options.executor.clone(), cancel.clone())
            .map_err(|err| PlanError::PlanningFailed(format!("worker pool: {err}")))?;

    plan_with_executor(trip, &executor, options, cancel)
}

/// Plans an itinerary against a caller-managed executor, reusing
/// whatever legs its cache already holds.
pub fn plan_with_executor(
    trip: &TripSpec,
    executor: &RouteQueryExecutor,
    options: &PlanOptions,
    cancel: &CancelToken,
) -> Result<Itinerary, PlanError> {
    validate(trip)?;

    let outcome = solver::solve(trip, executor, cancel, &options.solve)?;
    let itinerary = assemble(trip, outcome);

    info!(
        scheduled = itinerary.stops.len(),
        unscheduled = itinerary.unscheduled.len(),
        total_duration_secs = itinerary.total_duration_secs,
        "plan complete"
    );
    Ok(itinerary)
}

/// Fail-fast input checks; runs before any provider query.
fn validate(trip: &TripSpec) -> Result<(), PlanError> {
    let mut keys: HashSet<&str> = HashSet::new();
    for stop in trip.all_stops() {
        if !keys.insert(stop.key.as_str()) {
            return Err(PlanError::InvalidInput(format!(
                "duplicate stop key '{}'",
                stop.key
            )));
        }
        if let Some(window) = stop.window {
            if !window.is_well_formed() {
                return Err(PlanError::InvalidInput(format!(
                    "stop '{}' has an inverted time window",
                    stop.key
                )));
            }
        }
    }
    Ok(())
}

fn scheduled(key: &str, timing: StopTiming) -> ScheduledStop {
    ScheduledStop {
        key: key.to_string(),
        arrival: timing.arrival,
        departure: timing.departure,
        wait_secs: timing.wait_secs,
    }
}

fn assemble(trip: &TripSpec, outcome: SolveOutcome) -> Itinerary {
    let best = &outcome.best;

    let mut stops = Vec::with_capacity(best.sequence.len() + 2);
    stops.push(scheduled(&trip.origin.key, best.origin));
    for (position, &index) in best.sequence.iter().enumerate() {
        stops.push(scheduled(
            &trip.destinations[index].key,
            best.timings[position],
        ));
    }
    if let (Some(terminus), Some(timing)) = (&trip.terminus, best.terminus) {
        stops.push(scheduled(&terminus.key, timing));
    }

    let mut unscheduled: Vec<UnscheduledStop> = outcome
        .unscheduled
        .iter()
        .map(|&(index, reason)| UnscheduledStop {
            key: trip.destinations[index].key.clone(),
            reason,
        })
        .collect();
    if let (Some(terminus), Some(reason)) = (&trip.terminus, outcome.terminus_unscheduled) {
        unscheduled.push(UnscheduledStop {
            key: terminus.key.clone(),
            reason,
        });
    }

    let final_departure = stops.last().map_or(trip.depart_at, |stop| stop.departure);

    Itinerary {
        stops,
        unscheduled,
        total_duration_secs: final_departure - trip.depart_at,
        total_wait_secs: best.total_wait_secs,
    }
}
