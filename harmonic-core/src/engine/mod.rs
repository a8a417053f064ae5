//! # Engine Boundary
//!
//! [`NativeEngine`] is the narrow, typed capability interface the core
//! consumes. The spectral estimation and strike classification behind it are
//! the engine's business; the core only polls, caches and fans out.
//!
//! Two implementations ship with the crate:
//! - [`SpectralEngine`], a reference engine on top of `rustfft`
//! - [`ScriptedEngine`], a deterministic fake for tests

mod scripted;
mod spectral;

pub use scripted::{CallCounts, ScriptedEngine, ScriptedHandle};
pub use spectral::SpectralEngine;

use std::rc::Rc;

use crate::Result;
use crate::bridge::LinearMemory;
use crate::dispatcher::EngineHook;
use crate::events::{HarmonicCaptureEvent, StrikeStartEvent};
use crate::region::RegionMetadata;
use crate::strike::{StrikeMeasurement, StrikeState};

/// Location of a region's magnitude bins inside the engine's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBufferInfo {
    /// Offset of the first bin; `None` is a null pointer.
    pub data_ptr: Option<usize>,
    /// Number of bins.
    pub length: usize,
}

impl RegionBufferInfo {
    pub const NULL: RegionBufferInfo = RegionBufferInfo {
        data_ptr: None,
        length: 0,
    };
}

pub trait NativeEngine {
    /// The linear memory all region views point into.
    fn memory(&self) -> Rc<LinearMemory>;

    fn region_count(&self) -> usize;

    fn region_data_view(&self, region: usize) -> RegionBufferInfo;

    /// All peak and envelope fields of one region in a single call.
    fn region_metadata(&self, region: usize) -> Option<RegionMetadata>;

    fn strike_state(&self) -> StrikeState;

    /// The measurement of the most recent strike, if one is held.
    fn strike_measurement(&self) -> Option<StrikeMeasurement>;

    fn clear_strike_measurement(&mut self);

    fn reset_strike_detection(&mut self);

    fn set_strike_detection_trigger(&mut self, min_magnitude: f32);

    fn set_required_decaying_clusters(&mut self, clusters: u32);

    fn set_region_frequency(&mut self, region: usize, frequency: f32, is_display_region: bool);

    fn set_region_envelope_max(&mut self, region: usize, value: f32);

    fn set_region_envelope_min(&mut self, region: usize, value: f32);

    /// Hands the envelope maximum back to auto-ranging.
    fn reset_region_envelope_max(&mut self, region: usize);

    fn reset_region_envelope_min(&mut self, region: usize);

    /// Replaces the strike-start callback.
    fn install_strike_start_callback(&mut self, hook: EngineHook<StrikeStartEvent>);

    /// Replaces the harmonic-capture completion callback.
    fn install_harmonic_capture_callback(&mut self, hook: EngineHook<HarmonicCaptureEvent>);

    /// Runs one tick over a frame of input samples.
    fn process(&mut self, samples: &[f32]) -> Result<()>;
}
