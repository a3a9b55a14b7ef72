//! Memoization of precomputed exponentials.
//!
//! The exponential terms of an intake computation depend only on the interval
//! duration, the resolved parameter values and the number of points. Two
//! intakes sharing those three factors reuse one computation. The cache is a
//! pure memoization layer: disabling it (see [NoCache]) must not change any
//! computed concentration, only the recomputation cost.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::data::ParameterSetEvent;
use crate::simulator::PrecomputedExponentials;

/// Fingerprint of the three factors an exponential computation depends on.
///
/// The hash is taken over the bit patterns of the interval duration, of every
/// parameter value in id order, and of the point count. Equality is over
/// values, never object identity: two parameter sets built independently but
/// carrying equal values produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    /// Fingerprint an (interval, parameters, nb_points) triple.
    pub fn new(interval: f64, parameters: &ParameterSetEvent, nb_points: usize) -> Self {
        let mut hasher = DefaultHasher::new();
        hash_value(interval, &mut hasher);
        for parameter in parameters.iter() {
            hash_value(parameter.value(), &mut hasher);
        }
        nb_points.hash(&mut hasher);
        CacheKey(hasher.finish())
    }
}

/// Normalize -0.0 to 0.0 so equal values always hash alike.
fn hash_value(value: f64, hasher: &mut DefaultHasher) {
    let bits = if value == 0.0 { 0u64 } else { value.to_bits() };
    bits.hash(hasher);
}

/// Storage interface of the exponential memoization layer.
///
/// The cache is an explicit dependency of the calculator, injected at
/// construction. Single-owner and thread-shared implementations are provided;
/// both must uphold the memoization invariant (a hit returns exactly what was
/// inserted for that key).
pub trait ExponentialCache {
    /// Look up the exponentials for a key. `None` means the caller must
    /// compute and [insert](ExponentialCache::insert) them.
    fn get(&mut self, key: &CacheKey) -> Option<PrecomputedExponentials>;

    /// Store (or overwrite) the exponentials for a key.
    fn insert(&mut self, key: CacheKey, exponentials: PrecomputedExponentials);
}

/// Single-owner cache backed by a [HashMap], with hit/miss counters.
///
/// This is the default cache of an
/// [IntakeIntervalCalculator](crate::simulator::calculator::IntakeIntervalCalculator).
/// It is owned by exactly one calculator and needs no synchronization.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: HashMap<CacheKey, PrecomputedExponentials>,
    hits: u64,
    misses: u64,
}

impl LocalCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        LocalCache::default()
    }

    /// Number of lookups that found an entry.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of lookups that found nothing.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExponentialCache for LocalCache {
    fn get(&mut self, key: &CacheKey) -> Option<PrecomputedExponentials> {
        match self.entries.get(key) {
            Some(exponentials) => {
                self.hits += 1;
                Some(exponentials.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: CacheKey, exponentials: PrecomputedExponentials) {
        self.entries.insert(key, exponentials);
    }
}

/// Thread-shared cache backed by a [DashMap].
///
/// Clones share the same underlying storage, so one cache can be pooled
/// across calculators running on different threads. Two threads missing the
/// same key concurrently may both compute it; the last insert wins, which is
/// harmless since both computed the same values.
#[derive(Debug, Clone, Default)]
pub struct SharedCache {
    entries: Arc<DashMap<CacheKey, PrecomputedExponentials>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl SharedCache {
    /// Create an empty shared cache.
    pub fn new() -> Self {
        SharedCache::default()
    }

    /// Number of lookups that found an entry, over all handles.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that found nothing, over all handles.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExponentialCache for SharedCache {
    fn get(&mut self, key: &CacheKey) -> Option<PrecomputedExponentials> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn insert(&mut self, key: CacheKey, exponentials: PrecomputedExponentials) {
        self.entries.insert(key, exponentials);
    }
}

/// A cache that never stores anything: every lookup misses.
///
/// Running a calculator with [NoCache] is the reference against which the
/// memoization invariant is verified: results must be bit-identical to a
/// cached run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ExponentialCache for NoCache {
    fn get(&mut self, _key: &CacheKey) -> Option<PrecomputedExponentials> {
        None
    }

    fn insert(&mut self, _key: CacheKey, _exponentials: PrecomputedExponentials) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ParameterId;
    use nalgebra::dvector;

    fn parameters() -> ParameterSetEvent {
        ParameterSetEvent::new([(ParameterId::CL, 2.0), (ParameterId::V, 40.0)])
    }

    fn exponentials() -> PrecomputedExponentials {
        let mut exp = PrecomputedExponentials::new(1);
        exp.set(0, dvector![1.0, 0.5, 0.25]);
        exp
    }

    #[test]
    fn key_is_value_based() {
        let a = ParameterSetEvent::new([(ParameterId::CL, 2.0), (ParameterId::V, 40.0)]);
        let b = ParameterSetEvent::new([(ParameterId::V, 40.0), (ParameterId::CL, 2.0)]);
        assert_eq!(CacheKey::new(12.0, &a, 7), CacheKey::new(12.0, &b, 7));
    }

    #[test]
    fn key_discriminates_each_factor() {
        let p = parameters();
        let base = CacheKey::new(12.0, &p, 7);
        assert_ne!(base, CacheKey::new(24.0, &p, 7));
        assert_ne!(base, CacheKey::new(12.0, &p, 8));
        let other = ParameterSetEvent::new([(ParameterId::CL, 2.5), (ParameterId::V, 40.0)]);
        assert_ne!(base, CacheKey::new(12.0, &other, 7));
    }

    #[test]
    fn key_normalizes_negative_zero() {
        let a = ParameterSetEvent::new([(ParameterId::TestR, 0.0)]);
        let b = ParameterSetEvent::new([(ParameterId::TestR, -0.0)]);
        assert_eq!(CacheKey::new(12.0, &a, 3), CacheKey::new(12.0, &b, 3));
    }

    #[test]
    fn local_cache_counts_hits_and_misses() {
        let mut cache = LocalCache::new();
        let key = CacheKey::new(12.0, &parameters(), 3);
        assert!(cache.get(&key).is_none());
        cache.insert(key, exponentials());
        assert_eq!(cache.get(&key), Some(exponentials()));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn shared_cache_handles_share_storage() {
        let mut a = SharedCache::new();
        let mut b = a.clone();
        let key = CacheKey::new(6.0, &parameters(), 5);
        a.insert(key, exponentials());
        assert_eq!(b.get(&key), Some(exponentials()));
        assert_eq!(a.hits(), 1);
    }

    #[test]
    fn no_cache_always_misses() {
        let mut cache = NoCache;
        let key = CacheKey::new(12.0, &parameters(), 3);
        cache.insert(key, exponentials());
        assert!(cache.get(&key).is_none());
    }
}
