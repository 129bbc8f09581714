//! Provider abstraction for travel-time lookups.
//!
//! The planner core depends only on this narrow interface. Concrete
//! adapters (OSRM, haversine fallback) live in their own modules and
//! never leak transport details past it.

use thiserror::Error;

use crate::cache::LegCost;
use crate::stop::Stop;

/// Classified failure from a routing provider.
///
/// The split decides retry eligibility: transient failures (timeouts,
/// rate limiting, 5xx-equivalent signals) may be retried; permanent
/// failures (invalid location, no route exists) never are.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Transient(String),
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            ProviderError::Transient(reason) | ProviderError::Permanent(reason) => reason,
        }
    }
}

/// Computes the cost of a directed leg between two stops.
///
/// Implementations must be safe to call from multiple worker threads;
/// the executor bounds how many calls are outstanding at once.
pub trait ProviderClient: Send + Sync {
    fn compute_leg(&self, origin: &Stop, destination: &Stop) -> Result<LegCost, ProviderError>;
}
