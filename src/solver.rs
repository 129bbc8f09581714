//! Itinerary solver: bounded best-first sequencing under time windows.
//!
//! Exact time-window sequencing is exponential, so the solver builds
//! orderings incrementally and keeps only the `beam_width` cheapest
//! partial candidates per round. This bounds search time at the cost of
//! guaranteed optimality.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::cache::LegKey;
use crate::executor::{CancelToken, QueryOutcome, RouteQueryExecutor};
use crate::planner::PlanError;
use crate::stop::{Stop, TripSpec};

#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Partial candidates retained after each expansion round.
    pub beam_width: usize,
    /// Cost added per second spent waiting for a window to open,
    /// on top of the second itself. Tunable; there is no universally
    /// right ratio between driving and standing still.
    pub wait_penalty: i64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            beam_width: 16,
            wait_penalty: 1,
        }
    }
}

/// Why a stop is absent from the final ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnscheduledReason {
    /// The window cannot be met from the departure time even with zero
    /// travel. Detected before any provider query.
    WindowUnsatisfiable,
    /// Every explored ordering arrives after the window closes.
    NoFeasibleOrdering,
    /// Every queried leg into the stop failed permanently.
    NoRoute,
}

/// Arrival bookkeeping for one scheduled stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTiming {
    /// Effective arrival, after any wait for the window to open.
    pub arrival: i64,
    /// Arrival plus the stop's service duration.
    pub departure: i64,
    /// Seconds spent waiting for `earliest` before the visit starts.
    pub wait_secs: i64,
}

/// An ordered (possibly partial) visiting sequence with its schedule.
///
/// Candidates are transient: the search creates and discards them
/// freely, and only the winning one survives into the final itinerary.
#[derive(Debug, Clone)]
pub struct ItineraryCandidate {
    /// Indices into `TripSpec::destinations`, in visiting order.
    pub sequence: Vec<usize>,
    pub origin: StopTiming,
    /// Parallel to `sequence`.
    pub timings: Vec<StopTiming>,
    /// Set when the trip's terminus was reachable within its window.
    pub terminus: Option<StopTiming>,
    pub total_wait_secs: i64,
}

impl ItineraryCandidate {
    fn seed(origin: StopTiming) -> Self {
        Self {
            sequence: Vec::new(),
            origin,
            timings: Vec::new(),
            terminus: None,
            total_wait_secs: origin.wait_secs,
        }
    }

    fn last_departure(&self) -> i64 {
        self.terminus
            .as_ref()
            .or_else(|| self.timings.last())
            .map_or(self.origin.departure, |timing| timing.departure)
    }

    fn last_stop<'t>(&self, trip: &'t TripSpec) -> &'t Stop {
        match self.sequence.last() {
            Some(&index) => &trip.destinations[index],
            None => &trip.origin,
        }
    }

    fn contains(&self, index: usize) -> bool {
        self.sequence.contains(&index)
    }

    fn placed_count(&self) -> usize {
        self.sequence.len() + usize::from(self.terminus.is_some())
    }

    /// Ranking cost: elapsed time plus the weighted waiting penalty.
    fn cost(&self, options: &SolveOptions) -> i64 {
        self.last_departure() + options.wait_penalty * self.total_wait_secs
    }

    fn extend(&self, index: usize, timing: StopTiming) -> Self {
        let mut next = self.clone();
        next.sequence.push(index);
        next.total_wait_secs += timing.wait_secs;
        next.timings.push(timing);
        next
    }

    fn key_sequence<'a>(&'a self, trip: &'a TripSpec) -> impl Iterator<Item = &'a str> + 'a {
        self.sequence
            .iter()
            .map(move |&index| trip.destinations[index].key.as_str())
    }
}

/// Result of a solve: the winning candidate plus every stop that could
/// not be fit, with the reason.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub best: ItineraryCandidate,
    /// Destination indices absent from `best`.
    pub unscheduled: Vec<(usize, UnscheduledReason)>,
    /// Whether a requested terminus failed to fit, and why.
    pub terminus_unscheduled: Option<UnscheduledReason>,
}

/// Computes the arrival timing for reaching `stop` at `raw_arrival`,
/// or `None` when the window has already closed.
fn admit(stop: &Stop, raw_arrival: i64) -> Option<StopTiming> {
    let (arrival, wait_secs) = match stop.window {
        Some(window) => {
            if raw_arrival > window.latest {
                return None;
            }
            let arrival = raw_arrival.max(window.earliest);
            (arrival, arrival - raw_arrival)
        }
        None => (raw_arrival, 0),
    };

    Some(StopTiming {
        arrival,
        departure: arrival + stop.service_secs,
        wait_secs,
    })
}

/// Finds a near-optimal visiting order for the trip.
///
/// Leg costs are fetched lazily through the executor as the search
/// explores pairs; the cache deduplicates repeated probes across
/// candidate branches. Permanent per-leg failures prune only the
/// branches that need the leg.
pub fn solve(
    trip: &TripSpec,
    executor: &RouteQueryExecutor,
    cancel: &CancelToken,
    options: &SolveOptions,
) -> Result<SolveOutcome, PlanError> {
    let origin = admit(&trip.origin, trip.depart_at).ok_or_else(|| {
        PlanError::PlanningFailed(format!(
            "origin '{}' cannot be visited at the departure time",
            trip.origin.key
        ))
    })?;

    // Up-front rejection of windows no ordering could satisfy: cheaper
    // than discovering the same thing through provider queries.
    let mut unscheduled: Vec<(usize, UnscheduledReason)> = Vec::new();
    let mut eligible: Vec<usize> = Vec::new();
    for (index, stop) in trip.destinations.iter().enumerate() {
        match stop.window {
            Some(window) if window.latest < origin.departure => {
                unscheduled.push((index, UnscheduledReason::WindowUnsatisfiable));
            }
            _ => eligible.push(index),
        }
    }

    let mut frontier = vec![ItineraryCandidate::seed(origin)];
    let mut completed: Vec<ItineraryCandidate> = Vec::new();

    // Per-destination evidence for attributing a reason to unplaced stops.
    let mut reachable: HashSet<usize> = HashSet::new();
    let mut route_failed: HashSet<usize> = HashSet::new();

    while !frontier.is_empty() {
        if cancel.is_cancelled() {
            return Err(PlanError::Cancelled);
        }

        let legs = prefetch_round(trip, executor, &frontier, &eligible);

        let mut successors: Vec<ItineraryCandidate> = Vec::new();
        for candidate in std::mem::take(&mut frontier) {
            let mut expanded = false;
            let from = candidate.last_stop(trip);

            for &index in &eligible {
                if candidate.contains(index) {
                    continue;
                }
                let next = &trip.destinations[index];
                let key = LegKey::new(&from.key, &next.key);
                let cost = match legs.get(&key) {
                    Some(QueryOutcome::Success(cost)) => {
                        reachable.insert(index);
                        *cost
                    }
                    _ => {
                        route_failed.insert(index);
                        continue;
                    }
                };

                let raw_arrival = candidate.last_departure() + cost.duration_secs;
                if let Some(timing) = admit(next, raw_arrival) {
                    successors.push(candidate.extend(index, timing));
                    expanded = true;
                }
            }

            if !expanded {
                completed.push(candidate);
            }
        }

        successors.sort_by(|a, b| {
            a.cost(options)
                .cmp(&b.cost(options))
                .then_with(|| a.key_sequence(trip).cmp(b.key_sequence(trip)))
        });
        let width = options.beam_width.max(1);
        if successors.len() > width {
            debug!(kept = width, dropped = successors.len() - width, "pruning frontier");
            successors.truncate(width);
        }
        frontier = successors;
    }

    if cancel.is_cancelled() {
        return Err(PlanError::Cancelled);
    }

    let terminus_evidence = match &trip.terminus {
        Some(terminus) => attach_terminus(trip, terminus, executor, &mut completed, origin),
        None => None,
    };

    completed.sort_by(|a, b| {
        b.placed_count()
            .cmp(&a.placed_count())
            .then_with(|| a.cost(options).cmp(&b.cost(options)))
            .then_with(|| a.key_sequence(trip).cmp(b.key_sequence(trip)))
    });

    let best = completed
        .into_iter()
        .next()
        .ok_or_else(|| PlanError::PlanningFailed("search produced no candidate".to_string()))?;

    // The reason is only reported when the winning candidate itself
    // lacks the terminus.
    let terminus_unscheduled = match (&trip.terminus, &best.terminus) {
        (Some(_), None) => Some(terminus_evidence.unwrap_or(UnscheduledReason::NoFeasibleOrdering)),
        _ => None,
    };

    for &index in &eligible {
        if best.contains(index) {
            continue;
        }
        let reason = if route_failed.contains(&index) && !reachable.contains(&index) {
            UnscheduledReason::NoRoute
        } else {
            UnscheduledReason::NoFeasibleOrdering
        };
        unscheduled.push((index, reason));
    }
    unscheduled.sort_by_key(|(index, _)| *index);

    Ok(SolveOutcome {
        best,
        unscheduled,
        terminus_unscheduled,
    })
}

/// Collects the distinct frontier edges for this round and resolves them
/// through the executor in one parallel batch.
fn prefetch_round(
    trip: &TripSpec,
    executor: &RouteQueryExecutor,
    frontier: &[ItineraryCandidate],
    eligible: &[usize],
) -> HashMap<LegKey, QueryOutcome> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut pairs: Vec<(&Stop, &Stop)> = Vec::new();

    for candidate in frontier {
        let from = candidate.last_stop(trip);
        for &index in eligible {
            if candidate.contains(index) {
                continue;
            }
            let to = &trip.destinations[index];
            if seen.insert((from.key.as_str(), to.key.as_str())) {
                pairs.push((from, to));
            }
        }
    }

    executor.fetch_batch(&pairs)
}

/// Extends each completed candidate with the final leg to the terminus.
/// Returns the reason the terminus stayed unplaced, if it did everywhere.
fn attach_terminus(
    trip: &TripSpec,
    terminus: &Stop,
    executor: &RouteQueryExecutor,
    completed: &mut [ItineraryCandidate],
    origin: StopTiming,
) -> Option<UnscheduledReason> {
    // Same up-front check as for destinations: don't query legs for a
    // window nothing can satisfy.
    if let Some(window) = terminus.window {
        if window.latest < origin.departure {
            return Some(UnscheduledReason::WindowUnsatisfiable);
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut pairs: Vec<(&Stop, &Stop)> = Vec::new();
    for candidate in completed.iter() {
        let from = candidate.last_stop(trip);
        if seen.insert(from.key.as_str()) {
            pairs.push((from, terminus));
        }
    }
    let legs = executor.fetch_batch(&pairs);

    let mut any_route = false;
    let mut placed_anywhere = false;
    for candidate in completed.iter_mut() {
        let from = candidate.last_stop(trip);
        let key = LegKey::new(&from.key, &terminus.key);
        let Some(QueryOutcome::Success(cost)) = legs.get(&key) else {
            continue;
        };
        any_route = true;
        let raw_arrival = candidate.last_departure() + cost.duration_secs;
        if let Some(timing) = admit(terminus, raw_arrival) {
            candidate.total_wait_secs += timing.wait_secs;
            candidate.terminus = Some(timing);
            placed_anywhere = true;
        }
    }

    if placed_anywhere {
        None
    } else if any_route {
        Some(UnscheduledReason::NoFeasibleOrdering)
    } else {
        Some(UnscheduledReason::NoRoute)
    }
}
