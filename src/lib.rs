//! itinerary-planner core
//!
//! Plans multi-stop itineraries: given stops with optional time windows,
//! finds a visiting order and schedule that minimizes travel and wait
//! time, fetching pairwise travel times from a routing provider through
//! a bounded, retrying, deduplicating query layer.

pub mod cache;
pub mod executor;
pub mod haversine;
pub mod osrm;
pub mod planner;
pub mod solver;
pub mod stop;
pub mod traits;
