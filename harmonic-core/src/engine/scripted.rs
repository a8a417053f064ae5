//! A deterministic engine for tests and offline runs.
//!
//! Everything a test wants to control or observe lives in shared state behind
//! a [`ScriptedHandle`], so the engine itself can be handed to a
//! [`TunerContext`](crate::TunerContext) while the test keeps steering it.

use std::cell::RefCell;
use std::rc::Rc;

use crate::Result;
use crate::bridge::LinearMemory;
use crate::capture::HarmonicStats;
use crate::dispatcher::EngineHook;
use crate::events::{HarmonicCaptureEvent, StrikeStartEvent};
use crate::region::RegionMetadata;
use crate::strike::{StrikeMeasurement, StrikeState};
use crate::strike_detector::{StrikeDetector, StrikeSample, StrikeTransition};

use super::{NativeEngine, RegionBufferInfo};

/// Seconds of audio one `process` call stands for.
const TICK_SECONDS: f64 = 0.01;

/// How often each engine entry point was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub region_metadata: usize,
    pub region_count: usize,
    pub region_data_view: usize,
    pub strike_state: usize,
    pub strike_measurement: usize,
    pub clear_strike_measurement: usize,
    pub reset_strike_detection: usize,
    pub set_trigger: usize,
    pub set_clusters: usize,
    pub set_region_frequency: usize,
    pub envelope_writes: usize,
    pub process: usize,
}

#[derive(Debug, Clone, Default)]
struct ScriptedRegion {
    meta: RegionMetadata,
    buffer: Option<(usize, usize)>,
    tuned: Option<(f32, bool)>,
}

#[derive(Debug)]
struct ScriptedState {
    memory: Rc<LinearMemory>,
    regions: Vec<ScriptedRegion>,
    detector: StrikeDetector,
    measurement: Option<StrikeMeasurement>,
    strike_frequency: f32,
    ticks: u64,
    calls: CallCounts,
}

/// Test-side controls of a [`ScriptedEngine`].
#[derive(Debug, Clone)]
pub struct ScriptedHandle {
    state: Rc<RefCell<ScriptedState>>,
}

impl ScriptedHandle {
    pub fn calls(&self) -> CallCounts {
        self.state.borrow().calls
    }

    pub fn reset_calls(&self) {
        self.state.borrow_mut().calls = CallCounts::default();
    }

    /// Replaces a region's raw metadata as the engine reports it.
    pub fn set_metadata(&self, region: usize, meta: RegionMetadata) {
        if let Some(slot) = self.state.borrow_mut().regions.get_mut(region) {
            slot.meta = meta;
        }
    }

    pub fn metadata(&self, region: usize) -> Option<RegionMetadata> {
        self.state.borrow().regions.get(region).map(|slot| slot.meta)
    }

    /// Sets the peak a region reports.
    pub fn set_peak(&self, region: usize, frequency: f32, magnitude: f32, confidence: f32) {
        if let Some(slot) = self.state.borrow_mut().regions.get_mut(region) {
            slot.meta.peak_frequency = frequency;
            slot.meta.peak_magnitude = magnitude;
            slot.meta.peak_confidence = confidence;
        }
    }

    /// Writes a region's bins in place, allocating on first use or growth.
    pub fn set_bins(&self, region: usize, bins: &[f32]) {
        let mut state = self.state.borrow_mut();
        let memory = Rc::clone(&state.memory);
        let Some(slot) = state.regions.get_mut(region) else {
            return;
        };
        let offset = match slot.buffer {
            Some((offset, capacity)) if capacity >= bins.len() => offset,
            _ => memory.allocate(bins.len()),
        };
        memory.write(offset, bins);
        slot.buffer = Some((offset, bins.len().max(slot.buffer.map_or(0, |(_, c)| c))));
        slot.meta.bin_count = bins.len();
    }

    /// Moves a region's bins to a fresh allocation, as a retune would.
    pub fn reallocate(&self, region: usize) {
        let mut state = self.state.borrow_mut();
        let memory = Rc::clone(&state.memory);
        let Some(slot) = state.regions.get_mut(region) else {
            return;
        };
        let Some((old_offset, capacity)) = slot.buffer else {
            return;
        };
        let len = slot.meta.bin_count;
        let bins: Vec<f32> = memory
            .read(old_offset, len)
            .map(|bins| bins.to_vec())
            .unwrap_or_default();
        let offset = memory.allocate(capacity);
        memory.write(offset, &bins);
        slot.buffer = Some((offset, capacity));
    }

    /// Frequency reported by the next strike.
    pub fn set_strike_frequency(&self, frequency: f32) {
        self.state.borrow_mut().strike_frequency = frequency;
    }

    /// Overrides the held strike measurement.
    pub fn set_measurement(&self, measurement: Option<StrikeMeasurement>) {
        self.state.borrow_mut().measurement = measurement;
    }

    pub fn trigger(&self) -> f32 {
        self.state.borrow().detector.trigger()
    }

    pub fn required_clusters(&self) -> u32 {
        self.state.borrow().detector.required_clusters()
    }

    /// Last `(frequency, is_display_region)` the region was tuned to.
    pub fn tuned(&self, region: usize) -> Option<(f32, bool)> {
        self.state.borrow().regions.get(region).and_then(|slot| slot.tuned)
    }
}

pub struct ScriptedEngine {
    state: Rc<RefCell<ScriptedState>>,
    strike_hook: Option<EngineHook<StrikeStartEvent>>,
    capture_hook: Option<EngineHook<HarmonicCaptureEvent>>,
}

impl ScriptedEngine {
    /// An engine with `region_count` regions, each reporting an envelope of
    /// `[0, 1]` and no peak.
    pub fn new(region_count: usize) -> (Self, ScriptedHandle) {
        let regions = (0..region_count)
            .map(|id| ScriptedRegion {
                meta: RegionMetadata {
                    id,
                    envelope_max: 1.0,
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect();
        let state = Rc::new(RefCell::new(ScriptedState {
            memory: Rc::new(LinearMemory::new()),
            regions,
            detector: StrikeDetector::new(0.0, 1, 0.5),
            measurement: None,
            strike_frequency: 0.0,
            ticks: 0,
            calls: CallCounts::default(),
        }));
        let engine = Self {
            state: Rc::clone(&state),
            strike_hook: None,
            capture_hook: None,
        };
        (engine, ScriptedHandle { state })
    }
}

fn capture_event(state: &ScriptedState, strike_id: u64, timestamp: f64) -> HarmonicCaptureEvent {
    let fundamental = state
        .regions
        .first()
        .map(|slot| slot.meta.peak_frequency)
        .filter(|f| *f > 0.0);
    let harmonics = state
        .regions
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| {
            let f0 = fundamental?;
            if slot.meta.peak_frequency <= 0.0 {
                return None;
            }
            let stats = HarmonicStats {
                ratio_mean: slot.meta.peak_frequency / f0,
                ratio_std: 0.0,
                magnitude_median: slot.meta.peak_magnitude,
                is_valid: true,
            };
            Some((index as u32 + 1, stats))
        })
        .collect();
    HarmonicCaptureEvent {
        strike_id,
        timestamp,
        harmonics,
    }
}

impl NativeEngine for ScriptedEngine {
    fn memory(&self) -> Rc<LinearMemory> {
        Rc::clone(&self.state.borrow().memory)
    }

    fn region_count(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.calls.region_count += 1;
        state.regions.len()
    }

    fn region_data_view(&self, region: usize) -> RegionBufferInfo {
        let mut state = self.state.borrow_mut();
        state.calls.region_data_view += 1;
        match state.regions.get(region) {
            Some(ScriptedRegion {
                buffer: Some((offset, _)),
                meta,
                ..
            }) => RegionBufferInfo {
                data_ptr: Some(*offset),
                length: meta.bin_count,
            },
            _ => RegionBufferInfo::NULL,
        }
    }

    fn region_metadata(&self, region: usize) -> Option<RegionMetadata> {
        let mut state = self.state.borrow_mut();
        state.calls.region_metadata += 1;
        state.regions.get(region).map(|slot| slot.meta)
    }

    fn strike_state(&self) -> StrikeState {
        let mut state = self.state.borrow_mut();
        state.calls.strike_state += 1;
        state.detector.state()
    }

    fn strike_measurement(&self) -> Option<StrikeMeasurement> {
        let mut state = self.state.borrow_mut();
        state.calls.strike_measurement += 1;
        state.measurement
    }

    fn clear_strike_measurement(&mut self) {
        let mut state = self.state.borrow_mut();
        state.calls.clear_strike_measurement += 1;
        state.measurement = None;
    }

    fn reset_strike_detection(&mut self) {
        let mut state = self.state.borrow_mut();
        state.calls.reset_strike_detection += 1;
        state.detector.reset();
        state.measurement = None;
    }

    fn set_strike_detection_trigger(&mut self, min_magnitude: f32) {
        let mut state = self.state.borrow_mut();
        state.calls.set_trigger += 1;
        state.detector.set_trigger(min_magnitude);
    }

    fn set_required_decaying_clusters(&mut self, clusters: u32) {
        let mut state = self.state.borrow_mut();
        state.calls.set_clusters += 1;
        state.detector.set_required_clusters(clusters);
    }

    fn set_region_frequency(&mut self, region: usize, frequency: f32, is_display_region: bool) {
        let mut state = self.state.borrow_mut();
        state.calls.set_region_frequency += 1;
        if let Some(slot) = state.regions.get_mut(region) {
            slot.tuned = Some((frequency, is_display_region));
        }
    }

    fn set_region_envelope_max(&mut self, region: usize, value: f32) {
        let mut state = self.state.borrow_mut();
        state.calls.envelope_writes += 1;
        if let Some(slot) = state.regions.get_mut(region) {
            slot.meta.envelope_max = value;
        }
    }

    fn set_region_envelope_min(&mut self, region: usize, value: f32) {
        let mut state = self.state.borrow_mut();
        state.calls.envelope_writes += 1;
        if let Some(slot) = state.regions.get_mut(region) {
            slot.meta.envelope_min = value;
        }
    }

    fn reset_region_envelope_max(&mut self, region: usize) {
        self.set_region_envelope_max(region, 1.0);
    }

    fn reset_region_envelope_min(&mut self, region: usize) {
        self.set_region_envelope_min(region, 0.0);
    }

    fn install_strike_start_callback(&mut self, hook: EngineHook<StrikeStartEvent>) {
        self.strike_hook = Some(hook);
    }

    fn install_harmonic_capture_callback(&mut self, hook: EngineHook<HarmonicCaptureEvent>) {
        self.capture_hook = Some(hook);
    }

    /// The frame's peak absolute sample is the strike magnitude.
    fn process(&mut self, samples: &[f32]) -> Result<()> {
        let (strike, capture) = {
            let mut state = self.state.borrow_mut();
            state.calls.process += 1;
            state.ticks += 1;
            let sample = StrikeSample {
                timestamp: state.ticks as f64 * TICK_SECONDS,
                magnitude: samples.iter().fold(0.0_f32, |m, s| m.max(s.abs())),
                frequency: state.strike_frequency,
                confidence: 1.0,
            };
            match state.detector.feed(&sample) {
                Some(StrikeTransition::Monitoring { strike_id }) => {
                    state.measurement = Some(StrikeMeasurement {
                        frequency: sample.frequency,
                        magnitude: sample.magnitude,
                        confidence: sample.confidence,
                        timestamp: sample.timestamp,
                        is_valid: sample.frequency > 0.0,
                    });
                    let event = StrikeStartEvent {
                        timestamp: sample.timestamp,
                        frequency: sample.frequency,
                        selected_partial: 1,
                        display_region_harmonic_index: 0,
                        strike_id,
                    };
                    (Some(event), None)
                }
                Some(StrikeTransition::Released { strike_id }) => {
                    (None, Some(capture_event(&state, strike_id, sample.timestamp)))
                }
                _ => (None, None),
            }
        };

        // Hooks run with the shared state released so listeners may inspect it.
        if let (Some(event), Some(hook)) = (strike, self.strike_hook.as_mut()) {
            hook(&event);
        }
        if let (Some(event), Some(hook)) = (capture, self.capture_hook.as_mut()) {
            hook(&event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strike_follows_the_detector() {
        let (mut engine, handle) = ScriptedEngine::new(2);
        engine.set_strike_detection_trigger(0.3);
        engine.set_required_decaying_clusters(2);
        handle.set_strike_frequency(220.0);

        let strikes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&strikes);
        engine.install_strike_start_callback(Box::new(move |e: &StrikeStartEvent| {
            sink.borrow_mut().push(e.strike_id)
        }));

        engine.process(&[0.5]).unwrap();
        assert_eq!(engine.strike_state(), StrikeState::Attack);
        engine.process(&[-0.6]).unwrap();
        assert_eq!(engine.strike_state(), StrikeState::Monitoring);
        assert_eq!(*strikes.borrow(), vec![1]);
        assert_eq!(engine.strike_measurement().unwrap().frequency, 220.0);
        assert_eq!(handle.calls().set_trigger, 1);
        assert_eq!(handle.calls().process, 2);
    }

    #[test]
    fn reallocation_moves_the_pointer_and_keeps_bins() {
        let (engine, handle) = ScriptedEngine::new(1);
        assert_eq!(engine.region_data_view(0), RegionBufferInfo::NULL);
        handle.set_bins(0, &[1.0, 2.0, 3.0]);
        let first = engine.region_data_view(0);
        handle.set_bins(0, &[4.0, 5.0, 6.0]);
        assert_eq!(engine.region_data_view(0), first);

        handle.reallocate(0);
        let moved = engine.region_data_view(0);
        assert_ne!(moved.data_ptr, first.data_ptr);
        let memory = engine.memory();
        let bins = memory.read(moved.data_ptr.unwrap(), moved.length).unwrap();
        assert_eq!(&*bins, &[4.0, 5.0, 6.0]);
    }
}
