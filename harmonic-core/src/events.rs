//! Events raised by the engine during a tick.

use serde::{Deserialize, Serialize};

use crate::capture::HarmonicStats;

/// Raised once per transition into `Monitoring`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeStartEvent {
    /// Engine time of the transition, in seconds.
    pub timestamp: f64,
    /// Peak frequency of the display region at the transition, in Hz.
    pub frequency: f32,
    /// Harmonic number the display region is tracking.
    pub selected_partial: u32,
    /// Region index of the display region.
    pub display_region_harmonic_index: usize,
    /// Monotonically increasing per engine.
    pub strike_id: u64,
}

/// Per-harmonic statistics collected while a strike was being monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicCaptureEvent {
    pub strike_id: u64,
    pub timestamp: f64,
    /// `(harmonic number, statistics)`, lowest harmonic first.
    pub harmonics: Vec<(u32, HarmonicStats)>,
}
