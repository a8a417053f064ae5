//! # Region Metadata Store
//!
//! One batched engine call returns every peak and envelope field of a region.
//! Values are sanitised before they are cached or handed out, so consumers
//! can rely on `envelope_min < envelope_max` and `envelope_max > 0` no matter
//! what the engine reported.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, RegionField};
use crate::context::TunerContext;

/// A continuously tracked frequency band.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegionMetadata {
    pub id: usize,
    pub start_frequency: f32,
    pub end_frequency: f32,
    pub frequency_per_bin: f32,
    pub bin_count: usize,
    pub envelope_min: f32,
    pub envelope_max: f32,
    pub peak_bin: usize,
    pub peak_frequency: f32,
    pub peak_magnitude: f32,
    pub peak_confidence: f32,
}

impl RegionMetadata {
    /// Clamps the envelope bounds into a usable range.
    pub fn sanitized(mut self) -> Self {
        if !self.envelope_max.is_finite() || self.envelope_max <= 0.0 {
            self.envelope_max = 1.0;
        }
        if self.envelope_min.is_nan() || self.envelope_min < 0.0 {
            self.envelope_min = 0.0;
        }
        if self.envelope_min >= self.envelope_max {
            self.envelope_min = (self.envelope_max * 0.1).max(0.0);
        }
        self
    }

    /// `peak_magnitude` mapped onto the envelope, clamped to `[0, 1]`.
    pub fn normalized_peak(&self) -> f32 {
        let span = self.envelope_max - self.envelope_min;
        if span <= 0.0 {
            return 0.0;
        }
        ((self.peak_magnitude - self.envelope_min) / span).clamp(0.0, 1.0)
    }
}

impl TunerContext {
    /// Number of regions the attached engine tracks, 0 without an engine.
    pub fn region_count(&mut self) -> usize {
        let Some(engine) = self.engine.as_deref() else {
            return 0;
        };
        let key = CacheKey::RegionCount;
        if !self.cache.should_update(key) {
            if let Some(cached) = self.cache.get_value::<usize>(key) {
                return cached;
            }
        }
        let fresh = engine.region_count();
        self.cache.set_value(key, fresh);
        fresh
    }

    /// Peak and envelope metadata of region `index`; `None` without an engine.
    pub fn region_metadata(&mut self, index: usize) -> Option<RegionMetadata> {
        let engine = self.engine.as_deref()?;
        let key = CacheKey::Region(index, RegionField::Metadata);
        if !self.cache.should_update(key) {
            if let Some(cached) = self.cache.get_value::<Option<RegionMetadata>>(key) {
                return cached;
            }
        }
        let fresh = engine.region_metadata(index).map(RegionMetadata::sanitized);
        self.cache.set_value(key, fresh);
        fresh
    }

    pub fn set_region_frequency(&mut self, index: usize, frequency: f32, is_display_region: bool) {
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.set_region_frequency(index, frequency, is_display_region);
            self.cache.invalidate_region(index);
        }
    }

    pub fn set_region_envelope_max(&mut self, index: usize, value: f32) {
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.set_region_envelope_max(index, value);
            self.cache.invalidate(CacheKey::Region(index, RegionField::Metadata));
        }
    }

    pub fn set_region_envelope_min(&mut self, index: usize, value: f32) {
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.set_region_envelope_min(index, value);
            self.cache.invalidate(CacheKey::Region(index, RegionField::Metadata));
        }
    }

    pub fn reset_region_envelope_max(&mut self, index: usize) {
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.reset_region_envelope_max(index);
            self.cache.invalidate(CacheKey::Region(index, RegionField::Metadata));
        }
    }

    pub fn reset_region_envelope_min(&mut self, index: usize) {
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.reset_region_envelope_min(index);
            self.cache.invalidate(CacheKey::Region(index, RegionField::Metadata));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_envelope(min: f32, max: f32) -> RegionMetadata {
        RegionMetadata {
            envelope_min: min,
            envelope_max: max,
            ..Default::default()
        }
    }

    #[test]
    fn sanitizes_pathological_envelopes() {
        let cases = [
            (f32::NAN, f32::NAN),
            (-1.0, -1.0),
            (0.0, 0.0),
            (5.0, 2.0),
            (2.0, 2.0),
            (f32::NAN, 0.5),
            (-3.0, f32::INFINITY),
            (f32::INFINITY, f32::INFINITY),
            (f32::INFINITY, 4.0),
        ];
        for (min, max) in cases {
            let clean = with_envelope(min, max).sanitized();
            assert!(clean.envelope_max > 0.0, "max for ({min}, {max})");
            assert!(clean.envelope_min < clean.envelope_max, "order for ({min}, {max})");
            assert!(clean.envelope_min >= 0.0, "min for ({min}, {max})");
        }
    }

    #[test]
    fn specific_clamps() {
        assert_eq!(with_envelope(0.2, f32::NAN).sanitized().envelope_max, 1.0);
        assert_eq!(with_envelope(-0.5, 2.0).sanitized().envelope_min, 0.0);
        let inverted = with_envelope(3.0, 2.0).sanitized();
        assert!((inverted.envelope_min - 0.2).abs() < 1e-6);
    }

    #[test]
    fn valid_envelopes_are_untouched() {
        let clean = with_envelope(0.1, 0.8).sanitized();
        assert_eq!(clean.envelope_min, 0.1);
        assert_eq!(clean.envelope_max, 0.8);
    }

    #[test]
    fn normalized_peak_is_clamped() {
        let mut meta = with_envelope(0.0, 2.0);
        meta.peak_magnitude = 1.0;
        assert_eq!(meta.normalized_peak(), 0.5);
        meta.peak_magnitude = 5.0;
        assert_eq!(meta.normalized_peak(), 1.0);
    }
}
