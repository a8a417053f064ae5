//! # Configuration Module
//!
//! Tunables for the measurement core and the reference engine. Every field
//! has a default, so a TOML file only needs to name what it overrides:
//!
//! ```toml
//! strike_trigger = 0.25
//!
//! [engine]
//! sample_rate = 48000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What the engine tick does when its input staging buffer cannot be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingFailurePolicy {
    /// Raise [`Error::StagingAllocation`] for the failing call.
    #[default]
    Fail,
    /// Log and skip the frame.
    DropFrame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Throttle window of the rate-limited cache, in milliseconds.
    pub throttle_ms: u64,
    /// Magnitude a region must exceed to leave `Waiting`.
    pub strike_trigger: f32,
    /// Consecutive above-trigger samples needed to reach `Monitoring`.
    pub required_decaying_clusters: u32,
    /// Number of recent captures kept per (session, note).
    pub capture_window: usize,
    /// Rank whose score becomes the quality threshold.
    pub quality_rank: usize,
    /// Captures required before a best approximation is reported.
    pub min_captures: usize,
    /// Highest harmonic tracked.
    pub max_harmonics: usize,
    pub staging_failure_policy: StagingFailurePolicy,
    pub engine: SpectralEngineConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 8,
            strike_trigger: 0.3,
            required_decaying_clusters: 3,
            capture_window: 25,
            quality_rank: 5,
            min_captures: 3,
            max_harmonics: 8,
            staging_failure_policy: StagingFailurePolicy::Fail,
            engine: SpectralEngineConfig::default(),
        }
    }
}

/// Settings for the reference [`SpectralEngine`](crate::engine::SpectralEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralEngineConfig {
    pub sample_rate: u32,
    /// Samples per FFT frame.
    pub frame_size: usize,
    /// Half width of each region around its centre frequency, in cents.
    pub region_half_width_cents: f32,
    /// Per-frame decay factor applied to the auto-ranging envelope maximum.
    pub envelope_decay: f32,
    /// Fraction of the trigger below which `Monitoring` ends.
    pub release_ratio: f32,
}

impl Default for SpectralEngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 2048,
            region_half_width_cents: 60.0,
            envelope_decay: 0.995,
            release_ratio: 0.5,
        }
    }
}

impl CoreConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&source)?;
        log::info!("[CONFIG] Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.strike_trigger.is_finite() && self.strike_trigger > 0.0) {
            return Err(Error::Config(format!(
                "strike_trigger must be positive, got {}",
                self.strike_trigger
            )));
        }
        if self.required_decaying_clusters == 0 {
            return Err(Error::Config("required_decaying_clusters must be at least 1".into()));
        }
        if self.quality_rank == 0 || self.capture_window == 0 {
            return Err(Error::Config("quality_rank and capture_window must be at least 1".into()));
        }
        if self.max_harmonics == 0 {
            return Err(Error::Config("max_harmonics must be at least 1".into()));
        }
        if self.engine.sample_rate == 0 {
            return Err(Error::Config("engine.sample_rate must be positive".into()));
        }
        if self.engine.frame_size < 16 || !self.engine.frame_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "engine.frame_size must be a power of two >= 16, got {}",
                self.engine.frame_size
            )));
        }
        if !(0.0..1.0).contains(&self.engine.release_ratio) {
            return Err(Error::Config("engine.release_ratio must be in [0, 1)".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.throttle(), Duration::from_millis(8));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let source = "strike_trigger = 0.25\n\
                      staging_failure_policy = \"drop_frame\"\n\
                      [engine]\n\
                      sample_rate = 48000\n";
        let config = CoreConfig::from_toml_str(source).unwrap();
        assert_eq!(config.strike_trigger, 0.25);
        assert_eq!(config.staging_failure_policy, StagingFailurePolicy::DropFrame);
        assert_eq!(config.engine.sample_rate, 48000);
        assert_eq!(config.engine.frame_size, 2048);
        assert_eq!(config.capture_window, 25);
    }

    #[test]
    fn rejects_zero_cluster_requirement() {
        let err = CoreConfig::from_toml_str("required_decaying_clusters = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_non_power_of_two_frames() {
        let err = CoreConfig::from_toml_str("[engine]\nframe_size = 1000").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_zero_sample_rate() {
        let err = CoreConfig::from_toml_str("[engine]\nsample_rate = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let mut config = CoreConfig::default();
        config.engine.sample_rate = 0;
        assert!(config.validate().is_err());
    }
}
