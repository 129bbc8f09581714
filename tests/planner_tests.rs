//! Orchestrator-level tests: validation, trivial plans, determinism,
//! and cancellation behavior.

mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use fixtures::{CancelAfter, GridProvider, minutes};
use itinerary_planner::cache::TravelTimeCache;
use itinerary_planner::executor::{CancelToken, ExecutorOptions, RouteQueryExecutor};
use itinerary_planner::planner::{PlanError, PlanOptions, plan, plan_with_executor};
use itinerary_planner::solver::{SolveOptions, UnscheduledReason};
use itinerary_planner::stop::{Stop, TripSpec};

// ============================================================================
// Helpers
// ============================================================================

fn options() -> PlanOptions {
    PlanOptions {
        executor: ExecutorOptions {
            max_concurrency: 2,
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        solve: SolveOptions::default(),
    }
}

fn keys(itinerary: &itinerary_planner::planner::Itinerary) -> Vec<&str> {
    itinerary.stops.iter().map(|s| s.key.as_str()).collect()
}

// ============================================================================
// Trivial Trips
// ============================================================================

#[test]
fn test_origin_only_trip_needs_no_provider() {
    let provider = Arc::new(GridProvider::new());
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0).with_service_secs(minutes(10)), 1000);

    let itinerary = plan(&trip, provider.clone(), &options(), &CancelToken::new()).unwrap();

    assert_eq!(keys(&itinerary), vec!["home"]);
    assert!(itinerary.unscheduled.is_empty());
    assert_eq!(itinerary.total_duration_secs, minutes(10));
    assert_eq!(provider.calls(), 0, "trivial plan must not query the provider");
}

#[test]
fn test_single_destination() {
    let provider = Arc::new(GridProvider::new());
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), 0)
        .with_destinations(vec![Stop::new("a", 0.0, 5.0)]);

    let itinerary = plan(&trip, provider.clone(), &options(), &CancelToken::new()).unwrap();

    assert_eq!(keys(&itinerary), vec!["home", "a"]);
    assert_eq!(itinerary.stops[1].arrival, minutes(5));
    assert!(itinerary.unscheduled.is_empty());
    assert_eq!(provider.calls(), 1);
}

// ============================================================================
// Input Validation
// ============================================================================

#[test]
fn test_inverted_window_rejected_before_any_query() {
    let provider = Arc::new(GridProvider::new());
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), 0)
        .with_destinations(vec![Stop::new("a", 0.0, 5.0).with_window(minutes(10), minutes(5))]);

    let err = plan(&trip, provider.clone(), &options(), &CancelToken::new()).unwrap_err();

    assert!(matches!(err, PlanError::InvalidInput(_)));
    assert_eq!(provider.calls(), 0);
}

#[test]
fn test_duplicate_stop_keys_rejected() {
    let provider = Arc::new(GridProvider::new());
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), 0)
        .with_destinations(vec![Stop::new("a", 0.0, 5.0), Stop::new("a", 5.0, 0.0)]);

    let err = plan(&trip, provider, &options(), &CancelToken::new()).unwrap_err();

    assert!(matches!(err, PlanError::InvalidInput(_)));
}

#[test]
fn test_unsatisfiable_window_rejected_without_queries() {
    let provider = Arc::new(GridProvider::new());
    // Departure is at t=100min; the stop's window closed at t=20min.
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), minutes(100)).with_destinations(vec![
        Stop::new("late", 0.0, 5.0).with_window(minutes(10), minutes(20)),
    ]);

    let itinerary = plan(&trip, provider.clone(), &options(), &CancelToken::new()).unwrap();

    assert_eq!(keys(&itinerary), vec!["home"]);
    assert_eq!(itinerary.unscheduled.len(), 1);
    assert_eq!(itinerary.unscheduled[0].key, "late");
    assert_eq!(
        itinerary.unscheduled[0].reason,
        UnscheduledReason::WindowUnsatisfiable
    );
    assert_eq!(provider.calls(), 0, "hopeless windows must not burn provider quota");
}

#[test]
fn test_origin_past_its_own_window_is_planning_failed() {
    let provider = Arc::new(GridProvider::new());
    let trip = TripSpec::new(
        Stop::new("home", 0.0, 0.0).with_window(0, minutes(5)),
        minutes(10),
    );

    let err = plan(&trip, provider, &options(), &CancelToken::new()).unwrap_err();

    assert!(matches!(err, PlanError::PlanningFailed(_)));
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_identical_inputs_give_identical_itineraries() {
    let provider = Arc::new(GridProvider::new());
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), 0).with_destinations(vec![
        Stop::new("a", 0.0, 5.0),
        Stop::new("b", 3.0, 2.0),
        Stop::new("c", 7.0, 1.0).with_window(minutes(20), minutes(90)),
    ]);

    let first = plan(&trip, provider.clone(), &options(), &CancelToken::new()).unwrap();
    let second = plan(&trip, provider.clone(), &options(), &CancelToken::new()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_equal_cost_orders_break_ties_lexicographically() {
    let provider = Arc::new(GridProvider::new());
    // "x" and "y" are symmetric around the origin: either visiting order
    // costs the same, so the key-lexicographic order must win.
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), 0)
        .with_destinations(vec![Stop::new("y", 5.0, 0.0), Stop::new("x", 0.0, 5.0)]);

    let itinerary = plan(&trip, provider, &options(), &CancelToken::new()).unwrap();

    assert_eq!(keys(&itinerary), vec!["home", "x", "y"]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancelled_run_keeps_computed_legs_for_reuse() {
    let token = CancelToken::new();
    let provider = Arc::new(CancelAfter::new(GridProvider::new(), 2, token.clone()));
    let cache = Arc::new(TravelTimeCache::new());
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), 0)
        .with_destinations(vec![Stop::new("a", 0.0, 5.0), Stop::new("b", 5.0, 0.0)]);

    let executor = RouteQueryExecutor::new(
        provider.clone(),
        cache.clone(),
        options().executor,
        token.clone(),
    )
    .unwrap();

    let err = plan_with_executor(&trip, &executor, &options(), &token).unwrap_err();
    assert_eq!(err, PlanError::Cancelled);
    assert_eq!(
        cache.len(),
        2,
        "legs computed before cancellation must stay cached"
    );
    assert_eq!(provider.calls(), 2);

    // A retry sharing the executor's cache only fetches the missing legs.
    let fresh_token = CancelToken::new();
    let executor = RouteQueryExecutor::new(
        provider.clone(),
        cache.clone(),
        options().executor,
        fresh_token.clone(),
    )
    .unwrap();

    let itinerary = plan_with_executor(&trip, &executor, &options(), &fresh_token).unwrap();
    assert_eq!(keys(&itinerary), vec!["home", "a", "b"]);
    assert_eq!(
        provider.calls(),
        4,
        "the origin legs must come from the warm cache"
    );
}

// ============================================================================
// Schedule Shape
// ============================================================================

#[test]
fn test_itinerary_times_are_monotonic() {
    let provider = Arc::new(GridProvider::new());
    let trip = TripSpec::new(Stop::new("home", 0.0, 0.0), 0).with_destinations(vec![
        Stop::new("a", 0.0, 4.0).with_service_secs(minutes(15)),
        Stop::new("b", 4.0, 4.0).with_window(minutes(45), minutes(200)),
        Stop::new("c", 4.0, 0.0).with_service_secs(minutes(5)),
    ]);

    let itinerary = plan(&trip, provider, &options(), &CancelToken::new()).unwrap();

    assert!(itinerary.unscheduled.is_empty());
    for window in itinerary.stops.windows(2) {
        assert!(
            window[1].arrival >= window[0].departure,
            "arrival at {} precedes departure from {}",
            window[1].key,
            window[0].key
        );
    }
    for stop in &itinerary.stops {
        assert!(stop.departure >= stop.arrival);
    }
}
