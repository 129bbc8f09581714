//! Input model: stops, time windows, and the trip request.

use serde::{Deserialize, Serialize};

/// Acceptable arrival interval at a stop, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: i64,
    pub latest: i64,
}

impl TimeWindow {
    pub fn new(earliest: i64, latest: i64) -> Self {
        Self { earliest, latest }
    }

    /// A window is well-formed when it is non-inverted.
    pub fn is_well_formed(&self) -> bool {
        self.earliest <= self.latest
    }
}

/// A single location to visit.
///
/// Stops are immutable once constructed. The solver refers to them by
/// index into the trip's destination list; the `key` is the stable
/// identity used in results and cache keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Stable caller-supplied identity, unique within a trip.
    pub key: String,
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Acceptable arrival window, if any.
    pub window: Option<TimeWindow>,
    /// Fixed time spent at the stop before departing.
    pub service_secs: i64,
}

impl Stop {
    pub fn new(key: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            key: key.into(),
            lat,
            lon,
            window: None,
            service_secs: 0,
        }
    }

    pub fn with_window(mut self, earliest: i64, latest: i64) -> Self {
        self.window = Some(TimeWindow::new(earliest, latest));
        self
    }

    pub fn with_service_secs(mut self, secs: i64) -> Self {
        self.service_secs = secs;
        self
    }

    pub fn location(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}

/// A trip to plan: where it starts, which stops to fit in, and
/// optionally where it must end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSpec {
    /// Designated trip start. The itinerary always begins here.
    pub origin: Stop,
    /// Stops to sequence. Order is not significant; the solver decides.
    pub destinations: Vec<Stop>,
    /// Optional designated trip end, appended after all placed stops.
    pub terminus: Option<Stop>,
    /// Departure time from the origin, unix seconds.
    pub depart_at: i64,
}

impl TripSpec {
    pub fn new(origin: Stop, depart_at: i64) -> Self {
        Self {
            origin,
            destinations: Vec::new(),
            terminus: None,
            depart_at,
        }
    }

    pub fn with_destinations(mut self, destinations: Vec<Stop>) -> Self {
        self.destinations = destinations;
        self
    }

    pub fn with_terminus(mut self, terminus: Stop) -> Self {
        self.terminus = Some(terminus);
        self
    }

    /// All stops in the trip: origin, destinations, then terminus.
    pub fn all_stops(&self) -> impl Iterator<Item = &Stop> {
        std::iter::once(&self.origin)
            .chain(self.destinations.iter())
            .chain(self.terminus.iter())
    }
}
