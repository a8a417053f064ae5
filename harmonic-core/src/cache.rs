//! # Rate-Limited Cache
//!
//! A throttle-and-memoize layer that sits in front of every engine call.
//! Whatever rate the display layer polls at, each key reaches the engine at
//! most once per throttle window; in between, the last computed value is
//! served from here.
//!
//! A single map backs every region and every strike field, so keys are typed
//! and namespaced: two regions can never read each other's entries.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::clock::Clock;

/// Per-region cached fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionField {
    Data,
    Metadata,
}

/// Strike-related cached fields. All of these are dropped on reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrikeField {
    State,
    Measurement,
    Frequency,
    Magnitude,
    Confidence,
    Timestamp,
    IsValid,
}

/// Throttled engine setters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingField {
    StrikeTrigger,
    RequiredDecayingClusters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    RegionCount,
    Region(usize, RegionField),
    Strike(StrikeField),
    Setting(SettingField),
}

#[derive(Default)]
struct Entry {
    last_update: Option<Duration>,
    value: Option<Box<dyn Any>>,
}

pub struct RateLimitedCache {
    ttl: Duration,
    clock: Rc<dyn Clock>,
    entries: HashMap<CacheKey, Entry>,
}

impl RateLimitedCache {
    pub fn new(ttl: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` at most once per throttle window for `key`, and starts
    /// a new window when it does.
    pub fn should_update(&mut self, key: CacheKey) -> bool {
        let now = self.clock.now();
        let entry = self.entries.entry(key).or_default();
        match entry.last_update {
            Some(last) if now.saturating_sub(last) < self.ttl => false,
            _ => {
                entry.last_update = Some(now);
                true
            }
        }
    }

    /// The last value stored under `key`, if it was stored with type `T`.
    pub fn get_value<T: Clone + 'static>(&self, key: CacheKey) -> Option<T> {
        self.entries
            .get(&key)
            .and_then(|entry| entry.value.as_ref())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn set_value<T: 'static>(&mut self, key: CacheKey, value: T) {
        self.entries.entry(key).or_default().value = Some(Box::new(value));
    }

    /// Drops both the value and the throttle window for `key`, so the next
    /// `should_update` returns `true`.
    pub fn invalidate(&mut self, key: CacheKey) {
        self.entries.remove(&key);
    }

    pub fn invalidate_strike_entries(&mut self) {
        self.entries.retain(|key, _| !matches!(key, CacheKey::Strike(_)));
    }

    pub fn invalidate_strike_entries_except(&mut self, keep: CacheKey) {
        self.entries
            .retain(|key, _| *key == keep || !matches!(key, CacheKey::Strike(_)));
    }

    pub fn invalidate_region(&mut self, index: usize) {
        self.entries
            .retain(|key, _| !matches!(key, CacheKey::Region(i, _) if *i == index));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Rc<ManualClock>, RateLimitedCache) {
        let clock = Rc::new(ManualClock::new());
        let cache = RateLimitedCache::new(Duration::from_millis(8), clock.clone());
        (clock, cache)
    }

    #[test]
    fn throttles_per_window() {
        let (clock, mut cache) = cache();
        let key = CacheKey::Strike(StrikeField::State);
        assert!(cache.should_update(key));
        assert!(!cache.should_update(key));
        clock.advance_ms(7);
        assert!(!cache.should_update(key));
        clock.advance_ms(1);
        assert!(cache.should_update(key));
        assert!(!cache.should_update(key));
    }

    #[test]
    fn regions_are_namespaced() {
        let (_clock, mut cache) = cache();
        let a = CacheKey::Region(0, RegionField::Metadata);
        let b = CacheKey::Region(1, RegionField::Metadata);
        assert!(cache.should_update(a));
        assert!(cache.should_update(b));
        cache.set_value(a, 1.5_f32);
        cache.set_value(b, 2.5_f32);
        assert_eq!(cache.get_value::<f32>(a), Some(1.5));
        assert_eq!(cache.get_value::<f32>(b), Some(2.5));
        assert_eq!(cache.get_value::<f32>(CacheKey::Region(0, RegionField::Data)), None);
    }

    #[test]
    fn wrong_type_reads_as_missing() {
        let (_clock, mut cache) = cache();
        let key = CacheKey::Strike(StrikeField::Frequency);
        cache.set_value(key, 440.0_f32);
        assert_eq!(cache.get_value::<u32>(key), None);
    }

    #[test]
    fn strike_invalidation_keeps_region_entries() {
        let (_clock, mut cache) = cache();
        let region = CacheKey::Region(3, RegionField::Metadata);
        let state = CacheKey::Strike(StrikeField::State);
        assert!(cache.should_update(region));
        assert!(cache.should_update(state));
        cache.set_value(region, 7_u32);
        cache.set_value(state, 9_u32);

        cache.invalidate_strike_entries();

        assert_eq!(cache.get_value::<u32>(state), None);
        assert!(cache.should_update(state));
        assert_eq!(cache.get_value::<u32>(region), Some(7));
        assert!(!cache.should_update(region));
    }
}
