//! Concurrent route-query execution with retry, backoff, and
//! cache-aware deduplication.
//!
//! All provider traffic funnels through a dedicated worker pool sized to
//! the configured concurrency limit; excess requests queue rather than
//! firing unboundedly. Transient provider failures are absorbed here and
//! never reach the solver.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cache::{LegCost, LegKey, TravelTimeCache};
use crate::stop::Stop;
use crate::traits::{ProviderClient, ProviderError};

/// Cooperative cancellation flag shared between the caller, the planner,
/// and the executor.
///
/// Cancellation is observed between provider attempts and at solver
/// round boundaries; a provider call already in flight is allowed to
/// complete so its result still lands in the cache.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum provider calls in flight at once.
    pub max_concurrency: usize,
    /// Attempt ceiling per leg, including the first try.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub base_backoff: Duration,
    /// Upper bound on the exponential backoff, before jitter.
    pub max_backoff: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Terminal result of one leg query, after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Success(LegCost),
    /// Retryable failure. `fetch` absorbs these internally and never
    /// returns this variant; it appears only when classifying raw
    /// provider results.
    TransientFailure(String),
    PermanentFailure(String),
}

impl QueryOutcome {
    pub fn cost(&self) -> Option<LegCost> {
        match self {
            QueryOutcome::Success(cost) => Some(*cost),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success(_))
    }

    fn from_result(result: Result<LegCost, ProviderError>) -> Self {
        match result {
            Ok(cost) => QueryOutcome::Success(cost),
            Err(ProviderError::Transient(reason)) => QueryOutcome::TransientFailure(reason),
            Err(ProviderError::Permanent(reason)) => QueryOutcome::PermanentFailure(reason),
        }
    }
}

/// Issues pairwise travel-time requests with bounded concurrency.
///
/// Every successful leg is written to the cache through its
/// deduplicating compute path before being returned, so concurrent
/// probes for the same pair share a single provider call.
pub struct RouteQueryExecutor {
    provider: Arc<dyn ProviderClient>,
    cache: Arc<TravelTimeCache>,
    pool: rayon::ThreadPool,
    options: ExecutorOptions,
    cancel: CancelToken,
}

impl RouteQueryExecutor {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        cache: Arc<TravelTimeCache>,
        options: ExecutorOptions,
        cancel: CancelToken,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_concurrency.max(1))
            .build()?;

        Ok(Self {
            provider,
            cache,
            pool,
            options,
            cancel,
        })
    }

    pub fn cache(&self) -> &Arc<TravelTimeCache> {
        &self.cache
    }

    /// Fetches one leg, consulting the cache first.
    ///
    /// Never returns `TransientFailure`: retryable failures are retried
    /// up to the attempt ceiling and then escalated to a terminal
    /// `PermanentFailure("exhausted retries")` so callers deal with one
    /// failure vocabulary.
    pub fn fetch(&self, origin: &Stop, destination: &Stop) -> QueryOutcome {
        let key = LegKey::new(&origin.key, &destination.key);
        if let Some(cost) = self.cache.get(&key) {
            return QueryOutcome::Success(cost);
        }

        self.pool.install(|| {
            let result = self
                .cache
                .get_or_compute(&key, || self.query_with_retry(&key, origin, destination));
            QueryOutcome::from_result(result)
        })
    }

    /// Fetches a set of legs in parallel on the bounded pool.
    pub fn fetch_batch(&self, pairs: &[(&Stop, &Stop)]) -> HashMap<LegKey, QueryOutcome> {
        self.pool.install(|| {
            pairs
                .par_iter()
                .map(|(origin, destination)| {
                    let key = LegKey::new(&origin.key, &destination.key);
                    let outcome = self.fetch(origin, destination);
                    (key, outcome)
                })
                .collect()
        })
    }

    /// Bulk pre-fetch of every ordered pair among `stops`.
    pub fn fetch_matrix(&self, stops: &[Stop]) -> HashMap<LegKey, QueryOutcome> {
        let mut pairs = Vec::new();
        for origin in stops {
            for destination in stops {
                if origin.key != destination.key {
                    pairs.push((origin, destination));
                }
            }
        }
        self.fetch_batch(&pairs)
    }

    fn query_with_retry(
        &self,
        key: &LegKey,
        origin: &Stop,
        destination: &Stop,
    ) -> Result<LegCost, ProviderError> {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ProviderError::Permanent("cancelled".to_string()));
            }

            attempt += 1;
            match self.provider.compute_leg(origin, destination) {
                Ok(cost) => {
                    debug!(
                        origin = %key.origin,
                        destination = %key.destination,
                        duration_secs = cost.duration_secs,
                        attempt,
                        "leg resolved"
                    );
                    return Ok(cost);
                }
                Err(err @ ProviderError::Permanent(_)) => {
                    warn!(
                        origin = %key.origin,
                        destination = %key.destination,
                        reason = err.reason(),
                        "permanent provider failure"
                    );
                    return Err(err);
                }
                Err(ProviderError::Transient(reason)) => {
                    if attempt >= self.options.max_attempts {
                        warn!(
                            origin = %key.origin,
                            destination = %key.destination,
                            attempts = attempt,
                            %reason,
                            "retries exhausted"
                        );
                        return Err(ProviderError::Permanent("exhausted retries".to_string()));
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        origin = %key.origin,
                        destination = %key.destination,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        %reason,
                        "transient provider failure, backing off"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    /// Exponential backoff capped at `max_backoff`, plus up to 50% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = (attempt - 1).min(16);
        let exponential = self.options.base_backoff.saturating_mul(1 << shift);
        let capped = exponential.min(self.options.max_backoff);
        let jitter_ceiling = (capped.as_millis() as u64) / 2;
        let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
        capped + Duration::from_millis(jitter)
    }
}
