use crate::config::DeviceId;
use crate::generator::ValueSet;
use crate::registers::RegisterSpace;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    values: ValueSet,
    produced_at: Instant,
}

struct CacheInner {
    entries: HashMap<DeviceId, CacheEntry>,
    last_sweep: Instant,
}

/// Short-lived memo of the last generated ValueSet per device. Decouples the
/// protocol endpoint's read cadence from value generation: readers landing
/// within the TTL window reuse one generation instead of triggering several.
///
/// All operations take `now` explicitly so callers (and tests) own the clock.
pub struct SimulationCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    sweep_interval: Duration,
}

impl SimulationCache {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            ttl,
            sweep_interval,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached set while its age is strictly below the TTL. An
    /// entry exactly TTL old counts as expired. Lazy expiry: `get` never
    /// deletes, stale entries wait for `sweep`.
    pub fn get(&self, device: DeviceId, now: Instant) -> Option<ValueSet> {
        let inner = self.lock();
        let entry = inner.entries.get(&device)?;
        if now.duration_since(entry.produced_at) < self.ttl {
            Some(entry.values.clone())
        } else {
            None
        }
    }

    /// Store a fresh set, overwriting any prior entry for the device.
    pub fn put(&self, device: DeviceId, values: ValueSet, now: Instant) {
        let mut inner = self.lock();
        inner.entries.insert(
            device,
            CacheEntry {
                values,
                produced_at: now,
            },
        );
    }

    /// Drop expired entries. Rate-limited: runs at most once per sweep
    /// interval no matter how often it is called, to bound CPU cost under
    /// high-frequency callers.
    pub fn sweep(&self, now: Instant) {
        let mut inner = self.lock();
        if now.duration_since(inner.last_sweep) < self.sweep_interval {
            return;
        }
        let ttl = self.ttl;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.produced_at) < ttl);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(removed, "cache sweep dropped expired entries");
        }
        inner.last_sweep = now;
    }

    /// Rewrite one cached triple in place after an external register write,
    /// so a cache hit on the next engine cycle republishes the written value
    /// instead of reverting it. The entry's age is left untouched.
    pub fn patch(&self, device: DeviceId, space: RegisterSpace, address: u16, value: u16) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(&device) {
            if let Some(item) = entry
                .values
                .iter_mut()
                .find(|v| v.space == space && v.address == address)
            {
                item.value = value;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::RegisterValue;

    fn sample() -> ValueSet {
        vec![RegisterValue::new(RegisterSpace::InputRegister, 0, 42)]
    }

    #[test]
    fn hit_within_ttl_returns_identical_set() {
        let cache = SimulationCache::new(Duration::from_secs(5), Duration::from_secs(300));
        let t0 = Instant::now();
        cache.put(1, sample(), t0);

        let hit = cache.get(1, t0 + Duration::from_secs(4)).unwrap();
        assert_eq!(hit, sample());
    }

    #[test]
    fn entry_exactly_ttl_old_is_expired() {
        let ttl = Duration::from_secs(5);
        let cache = SimulationCache::new(ttl, Duration::from_secs(300));
        let t0 = Instant::now();
        cache.put(1, sample(), t0);

        assert!(cache.get(1, t0 + ttl).is_none());
        assert!(cache.get(1, t0 + ttl - Duration::from_millis(1)).is_some());
    }

    #[test]
    fn get_does_not_delete_stale_entries() {
        let cache = SimulationCache::new(Duration::from_secs(1), Duration::from_secs(300));
        let t0 = Instant::now();
        cache.put(1, sample(), t0);

        assert!(cache.get(1, t0 + Duration::from_secs(2)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_is_rate_limited() {
        let cache = SimulationCache::new(Duration::from_secs(1), Duration::from_secs(60));
        let t0 = Instant::now();
        cache.put(1, sample(), t0);

        // Entry is stale, but the sweep interval has not elapsed since
        // construction, so nothing is purged.
        cache.sweep(t0 + Duration::from_secs(5));
        assert_eq!(cache.len(), 1);

        cache.sweep(t0 + Duration::from_secs(120));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn put_overwrites_prior_entry() {
        let cache = SimulationCache::new(Duration::from_secs(5), Duration::from_secs(300));
        let t0 = Instant::now();
        cache.put(1, sample(), t0);

        let newer = vec![RegisterValue::new(RegisterSpace::InputRegister, 0, 99)];
        cache.put(1, newer.clone(), t0 + Duration::from_secs(1));
        assert_eq!(cache.get(1, t0 + Duration::from_secs(2)).unwrap(), newer);
    }

    #[test]
    fn patch_rewrites_matching_triple_only() {
        let cache = SimulationCache::new(Duration::from_secs(5), Duration::from_secs(300));
        let t0 = Instant::now();
        cache.put(
            6,
            vec![
                RegisterValue::new(RegisterSpace::Coil, 0, 1),
                RegisterValue::new(RegisterSpace::HoldingRegister, 0, 50),
            ],
            t0,
        );

        cache.patch(6, RegisterSpace::HoldingRegister, 0, 80);
        let set = cache.get(6, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(set[0].value, 1);
        assert_eq!(set[1].value, 80);

        // Unknown address: no-op.
        cache.patch(6, RegisterSpace::HoldingRegister, 42, 7);
        assert_eq!(cache.get(6, t0 + Duration::from_secs(1)).unwrap().len(), 2);
    }
}
