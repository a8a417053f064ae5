//! # Strike State Machine
//!
//! The lifecycle itself runs inside the engine (see
//! [`StrikeDetector`](crate::strike_detector::StrikeDetector)). This module is
//! the polling side: throttled, cached reads of the state and of the latest
//! measurement, throttled setters, and the reset that must never leave a
//! stale strike value behind.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, SettingField, StrikeField};
use crate::context::TunerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrikeState {
    #[default]
    Waiting,
    Attack,
    Monitoring,
}

impl fmt::Display for StrikeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrikeState::Waiting => "WAITING",
            StrikeState::Attack => "ATTACK",
            StrikeState::Monitoring => "MONITORING",
        };
        f.write_str(name)
    }
}

/// What the engine measured for the most recent strike.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StrikeMeasurement {
    pub frequency: f32,
    pub magnitude: f32,
    pub confidence: f32,
    /// Engine time in seconds.
    pub timestamp: f64,
    pub is_valid: bool,
}

/// Setter values waiting for their throttle window to open.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PendingSettings {
    pub(crate) trigger: Option<f32>,
    pub(crate) clusters: Option<u32>,
}

impl TunerContext {
    /// Current strike state, polled at most once per throttle window.
    /// `Waiting` when no engine is attached.
    pub fn strike_state(&mut self) -> StrikeState {
        let Some(engine) = self.engine.as_deref() else {
            return StrikeState::Waiting;
        };
        let key = CacheKey::Strike(StrikeField::State);
        if !self.cache.should_update(key) {
            if let Some(state) = self.cache.get_value::<StrikeState>(key) {
                return state;
            }
        }
        let state = engine.strike_state();
        self.cache.set_value(key, state);
        state
    }

    pub fn strike_measurement(&mut self) -> Option<StrikeMeasurement> {
        let engine = self.engine.as_deref()?;
        let key = CacheKey::Strike(StrikeField::Measurement);
        if !self.cache.should_update(key) {
            if let Some(cached) = self.cache.get_value::<Option<StrikeMeasurement>>(key) {
                return cached;
            }
        }
        let measurement = engine.strike_measurement();
        self.cache.set_value(key, measurement);
        measurement
    }

    /// Measured frequency of the latest strike, `0.0` if none.
    pub fn strike_measurement_frequency(&mut self) -> f32 {
        self.measurement_field(StrikeField::Frequency, 0.0, |m| m.frequency)
    }

    pub fn strike_measurement_magnitude(&mut self) -> f32 {
        self.measurement_field(StrikeField::Magnitude, 0.0, |m| m.magnitude)
    }

    pub fn strike_measurement_confidence(&mut self) -> f32 {
        self.measurement_field(StrikeField::Confidence, 0.0, |m| m.confidence)
    }

    pub fn strike_measurement_timestamp(&mut self) -> f64 {
        self.measurement_field(StrikeField::Timestamp, 0.0, |m| m.timestamp)
    }

    pub fn strike_measurement_is_valid(&mut self) -> bool {
        self.measurement_field(StrikeField::IsValid, false, |m| m.is_valid)
    }

    fn measurement_field<T: Copy + 'static>(
        &mut self,
        field: StrikeField,
        default: T,
        extract: impl Fn(&StrikeMeasurement) -> T,
    ) -> T {
        let Some(engine) = self.engine.as_deref() else {
            return default;
        };
        let key = CacheKey::Strike(field);
        if !self.cache.should_update(key) {
            if let Some(value) = self.cache.get_value::<T>(key) {
                return value;
            }
        }
        let value = engine.strike_measurement().map_or(default, |m| extract(&m));
        self.cache.set_value(key, value);
        value
    }

    /// Forces `Waiting` and drops every cached strike value.
    pub fn reset_strike_detection(&mut self) {
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.reset_strike_detection();
        }
        self.cache.invalidate_strike_entries();
        self.cache
            .set_value(CacheKey::Strike(StrikeField::State), StrikeState::Waiting);
        log::debug!("[STRIKE] Detection reset");
    }

    /// Discards the held measurement, engine-side and cached.
    pub fn clear_strike_measurement(&mut self) {
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.clear_strike_measurement();
        }
        self.cache
            .invalidate_strike_entries_except(CacheKey::Strike(StrikeField::State));
    }

    /// Minimum magnitude that starts an attack.
    pub fn set_strike_detection_trigger(&mut self, min_magnitude: f32) {
        self.strike_settings.trigger = min_magnitude;
        self.pending.trigger = Some(min_magnitude);
        self.flush_pending_settings();
    }

    /// Consecutive above-trigger samples an attack needs to become a strike.
    pub fn set_required_decaying_clusters(&mut self, clusters: u32) {
        self.strike_settings.clusters = clusters;
        self.pending.clusters = Some(clusters);
        self.flush_pending_settings();
    }

    pub fn strike_detection_trigger(&self) -> f32 {
        self.strike_settings.trigger
    }

    pub fn required_decaying_clusters(&self) -> u32 {
        self.strike_settings.clusters
    }

    /// Pushes pending setter values whose throttle window is open.
    pub(crate) fn flush_pending_settings(&mut self) {
        let Some(engine) = self.engine.as_deref_mut() else {
            return;
        };
        if let Some(trigger) = self.pending.trigger {
            if self.cache.should_update(CacheKey::Setting(SettingField::StrikeTrigger)) {
                engine.set_strike_detection_trigger(trigger);
                self.pending.trigger = None;
            }
        }
        if let Some(clusters) = self.pending.clusters {
            if self
                .cache
                .should_update(CacheKey::Setting(SettingField::RequiredDecayingClusters))
            {
                engine.set_required_decaying_clusters(clusters);
                self.pending.clusters = None;
            }
        }
    }
}
