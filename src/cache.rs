//! Per-run memoization of pairwise leg costs.
//!
//! The cache is the single source of truth for travel times within one
//! planning run: two identical keys never observe different costs. It is
//! scoped to a planning invocation and discarded afterwards, so results
//! from unrelated trips never bleed into each other.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::traits::ProviderError;

/// Result of a pairwise travel query between two stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegCost {
    /// Door-to-door travel duration in seconds.
    pub duration_secs: i64,
    /// Route distance in meters.
    pub distance_meters: f64,
    /// When the provider answered, unix seconds.
    pub computed_at: i64,
}

impl LegCost {
    pub fn new(duration_secs: i64, distance_meters: f64, computed_at: i64) -> Self {
        Self {
            duration_secs,
            distance_meters,
            computed_at,
        }
    }
}

/// Ordered (origin, destination) pair identifying a directed leg.
///
/// Travel time is not assumed symmetric, so `(A, B)` and `(B, A)` are
/// distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LegKey {
    pub origin: String,
    pub destination: String,
}

impl LegKey {
    pub fn new(origin: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug)]
enum SlotState {
    /// Computation in flight; waiters block on the condvar.
    Pending,
    Ready(LegCost),
    Failed(ProviderError),
}

#[derive(Debug)]
struct Slot {
    state: Mutex<SlotState>,
    settled: Condvar,
}

impl Slot {
    fn pending() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            settled: Condvar::new(),
        }
    }

    fn ready(cost: LegCost) -> Self {
        Self {
            state: Mutex::new(SlotState::Ready(cost)),
            settled: Condvar::new(),
        }
    }
}

/// Memoizing travel-time store with single-flight computation.
///
/// Concurrent `get_or_compute` calls for the same key share one supplier
/// invocation: the first caller computes, the rest wait and receive the
/// same result. Successes are kept for the lifetime of the run (trip
/// sizes are bounded, so there is no eviction); failures are never
/// stored, so a later probe may retry the pair.
#[derive(Debug, Default)]
pub struct TravelTimeCache {
    slots: Mutex<HashMap<LegKey, Arc<Slot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl TravelTimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached cost for a leg, if a computation has settled
    /// successfully. Never blocks on an in-flight computation.
    pub fn get(&self, key: &LegKey) -> Option<LegCost> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let state = lock(&slot.state);
        match *state {
            SlotState::Ready(cost) => Some(cost),
            _ => None,
        }
    }

    /// Stores a known-good leg cost, replacing any previous entry.
    pub fn put(&self, key: LegKey, cost: LegCost) {
        lock(&self.slots).insert(key, Arc::new(Slot::ready(cost)));
    }

    /// Number of legs with a settled successful cost.
    pub fn len(&self) -> usize {
        let slots = lock(&self.slots);
        slots
            .values()
            .filter(|slot| matches!(*lock(&slot.state), SlotState::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cost for a leg, invoking `supplier` at most once per
    /// key across all concurrent callers.
    ///
    /// On supplier failure the error is handed to every waiter for the
    /// in-flight computation and the entry is dropped, leaving the pair
    /// eligible for a fresh attempt later.
    pub fn get_or_compute<F>(&self, key: &LegKey, supplier: F) -> Result<LegCost, ProviderError>
    where
        F: FnOnce() -> Result<LegCost, ProviderError>,
    {
        let (slot, is_owner) = {
            let mut slots = lock(&self.slots);
            match slots.get(key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let slot = Arc::new(Slot::pending());
                    slots.insert(key.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if is_owner {
            self.run_supplier(key, &slot, supplier)
        } else {
            Self::await_settled(&slot)
        }
    }

    fn run_supplier<F>(
        &self,
        key: &LegKey,
        slot: &Arc<Slot>,
        supplier: F,
    ) -> Result<LegCost, ProviderError>
    where
        F: FnOnce() -> Result<LegCost, ProviderError>,
    {
        let result = supplier();

        {
            let mut state = lock(&slot.state);
            *state = match &result {
                Ok(cost) => SlotState::Ready(*cost),
                Err(err) => SlotState::Failed(err.clone()),
            };
        }
        slot.settled.notify_all();

        if result.is_err() {
            let mut slots = lock(&self.slots);
            if let Some(current) = slots.get(key) {
                if Arc::ptr_eq(current, slot) {
                    slots.remove(key);
                }
            }
        }

        result
    }

    fn await_settled(slot: &Arc<Slot>) -> Result<LegCost, ProviderError> {
        let mut state = lock(&slot.state);
        loop {
            match &*state {
                SlotState::Ready(cost) => return Ok(*cost),
                SlotState::Failed(err) => return Err(err.clone()),
                SlotState::Pending => {
                    state = match slot.settled.wait(state) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn leg(duration: i64) -> LegCost {
        LegCost::new(duration, 1000.0, 0)
    }

    #[test]
    fn test_get_miss_then_put() {
        let cache = TravelTimeCache::new();
        let key = LegKey::new("a", "b");

        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), leg(120));
        assert_eq!(cache.get(&key).unwrap().duration_secs, 120);
    }

    #[test]
    fn test_directed_keys_are_distinct() {
        let cache = TravelTimeCache::new();
        cache.put(LegKey::new("a", "b"), leg(100));

        assert!(cache.get(&LegKey::new("b", "a")).is_none());
    }

    #[test]
    fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(TravelTimeCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    cache.get_or_compute(&LegKey::new("a", "b"), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(leg(300))
                    })
                })
            })
            .collect();

        for handle in handles {
            let cost = handle.join().unwrap().unwrap();
            assert_eq!(cost.duration_secs, 300);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "supplier ran more than once");
    }

    #[test]
    fn test_failure_reaches_waiter_and_is_not_cached() {
        let cache = Arc::new(TravelTimeCache::new());
        let key = LegKey::new("a", "b");
        let rendezvous = Arc::new(Barrier::new(2));

        let owner = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            let rendezvous = Arc::clone(&rendezvous);
            thread::spawn(move || {
                cache.get_or_compute(&key, || {
                    rendezvous.wait();
                    thread::sleep(Duration::from_millis(200));
                    Err(ProviderError::Transient("timeout".into()))
                })
            })
        };

        rendezvous.wait();
        let waiter = cache.get_or_compute(&key, || {
            panic!("waiter must not start a second computation while one is in flight")
        });

        assert!(owner.join().unwrap().is_err());
        assert!(waiter.is_err(), "failure was not propagated to the waiter");

        // Failed entries are dropped, so a later probe retries.
        let retried = cache.get_or_compute(&key, || Ok(leg(42)));
        assert_eq!(retried.unwrap().duration_secs, 42);
    }
}
