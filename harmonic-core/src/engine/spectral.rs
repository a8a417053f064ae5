//! Reference engine: FFT magnitudes, per-region peak tracking with
//! auto-ranging envelopes, and the strike lifecycle.
//!
//! Region `i` tracks harmonic `i + 1` of the note being tuned. Its bins are
//! written into linear memory every tick; when a retune needs more bins than
//! the region's slot holds, a new slot is allocated and the region's pointer
//! moves.

use std::rc::Rc;

use crate::Result;
use crate::bridge::LinearMemory;
use crate::capture::HarmonicStats;
use crate::config::{CoreConfig, SpectralEngineConfig};
use crate::dispatcher::EngineHook;
use crate::events::{HarmonicCaptureEvent, StrikeStartEvent};
use crate::fft::{SpectrumAnalyzer, interpolate_peak};
use crate::region::RegionMetadata;
use crate::strike::{StrikeMeasurement, StrikeState};
use crate::strike_detector::{StrikeDetector, StrikeSample, StrikeTransition};

use super::{NativeEngine, RegionBufferInfo};

const DEFAULT_ENVELOPE_MAX: f32 = 1.0;
const DEFAULT_ENVELOPE_MIN: f32 = 0.0;
const ENVELOPE_FLOOR: f32 = 1e-4;

#[derive(Debug, Clone, Default)]
struct RegionSlot {
    meta: RegionMetadata,
    offset: usize,
    capacity: usize,
    first_bin: usize,
    is_display: bool,
    manual_max: bool,
    manual_min: bool,
    /// `(peak frequency, peak magnitude)` per tick while monitoring.
    monitored: Vec<(f32, f32)>,
}

pub struct SpectralEngine {
    config: SpectralEngineConfig,
    analyzer: SpectrumAnalyzer,
    spectrum: Vec<f32>,
    memory: Rc<LinearMemory>,
    regions: Vec<RegionSlot>,
    detector: StrikeDetector,
    measurement: Option<StrikeMeasurement>,
    monitoring_strike: Option<u64>,
    frames: u64,
    strike_hook: Option<EngineHook<StrikeStartEvent>>,
    capture_hook: Option<EngineHook<HarmonicCaptureEvent>>,
}

impl SpectralEngine {
    pub fn new(config: &CoreConfig, region_count: usize) -> Self {
        let engine_config = config.engine.clone();
        let regions = (0..region_count)
            .map(|id| RegionSlot {
                meta: RegionMetadata {
                    id,
                    envelope_min: DEFAULT_ENVELOPE_MIN,
                    envelope_max: DEFAULT_ENVELOPE_MAX,
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect();
        Self {
            analyzer: SpectrumAnalyzer::new(engine_config.frame_size),
            spectrum: Vec::with_capacity(engine_config.frame_size / 2),
            memory: Rc::new(LinearMemory::new()),
            regions,
            detector: StrikeDetector::new(
                config.strike_trigger,
                config.required_decaying_clusters,
                engine_config.release_ratio,
            ),
            measurement: None,
            monitoring_strike: None,
            frames: 0,
            strike_hook: None,
            capture_hook: None,
            config: engine_config,
        }
    }

    fn bin_hz(&self) -> f32 {
        self.config.sample_rate as f32 / self.config.frame_size as f32
    }

    fn timestamp(&self) -> f64 {
        self.frames as f64 * self.config.frame_size as f64 / self.config.sample_rate as f64
    }

    fn display_region(&self) -> usize {
        self.regions.iter().position(|r| r.is_display).unwrap_or(0)
    }

    fn update_region(&mut self, index: usize) {
        let decay = self.config.envelope_decay;
        let bin_hz = self.bin_hz();
        let slot = &mut self.regions[index];
        let len = slot.meta.bin_count;
        if len == 0 || slot.first_bin + len > self.spectrum.len() {
            return;
        }
        let bins = &self.spectrum[slot.first_bin..slot.first_bin + len];
        self.memory.write(slot.offset, bins);

        let (peak_offset, peak_magnitude) = bins
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, m)| if m > best.1 { (i, m) } else { best });
        let mean = bins.iter().sum::<f32>() / len as f32;
        let peak_bin = slot.first_bin + peak_offset;

        slot.meta.peak_bin = peak_offset;
        slot.meta.peak_magnitude = peak_magnitude;
        if peak_magnitude > 0.0 {
            slot.meta.peak_frequency = interpolate_peak(&self.spectrum, peak_bin) * bin_hz;
            slot.meta.peak_confidence = ((peak_magnitude - mean) / peak_magnitude).clamp(0.0, 1.0);
        } else {
            slot.meta.peak_frequency = 0.0;
            slot.meta.peak_confidence = 0.0;
        }
        if !slot.manual_max {
            slot.meta.envelope_max = (slot.meta.envelope_max * decay)
                .max(peak_magnitude)
                .max(ENVELOPE_FLOOR);
        }
        if !slot.manual_min {
            slot.meta.envelope_min = (mean * 0.5).min(slot.meta.envelope_max * 0.5);
        }
    }

    fn finish_capture(&mut self, strike_id: u64) {
        let fundamental_track = std::mem::take(&mut self.regions[0].monitored);
        let mut harmonics = Vec::with_capacity(self.regions.len());
        for (index, slot) in self.regions.iter_mut().enumerate() {
            let track = if index == 0 {
                fundamental_track.clone()
            } else {
                std::mem::take(&mut slot.monitored)
            };
            let ratios: Vec<f32> = track
                .iter()
                .zip(&fundamental_track)
                .filter(|((f, _), (f0, _))| *f > 0.0 && *f0 > 0.0)
                .map(|((f, _), (f0, _))| f / f0)
                .collect();
            let mut magnitudes: Vec<f32> = track.iter().map(|(_, m)| *m).collect();
            // A region that never saw a peak alongside the fundamental is left out.
            if let Some(stats) = summarize(&ratios, &mut magnitudes) {
                harmonics.push((index as u32 + 1, stats));
            }
        }

        let event = HarmonicCaptureEvent {
            strike_id,
            timestamp: self.timestamp(),
            harmonics,
        };
        log::debug!("[ENGINE] Strike {} released, harmonic capture complete", strike_id);
        if let Some(hook) = self.capture_hook.as_mut() {
            hook(&event);
        }
    }
}

fn summarize(ratios: &[f32], magnitudes: &mut [f32]) -> Option<HarmonicStats> {
    if ratios.is_empty() {
        return None;
    }
    let n = ratios.len() as f32;
    let mean = ratios.iter().sum::<f32>() / n;
    let variance = ratios.iter().map(|r| (r - mean) * (r - mean)).sum::<f32>() / n;
    magnitudes.sort_by(f32::total_cmp);
    let median = magnitudes.get(magnitudes.len() / 2).copied().unwrap_or(0.0);
    Some(HarmonicStats {
        ratio_mean: mean,
        ratio_std: variance.sqrt(),
        magnitude_median: median,
        is_valid: ratios.len() >= 2,
    })
}

impl NativeEngine for SpectralEngine {
    fn memory(&self) -> Rc<LinearMemory> {
        Rc::clone(&self.memory)
    }

    fn region_count(&self) -> usize {
        self.regions.len()
    }

    fn region_data_view(&self, region: usize) -> RegionBufferInfo {
        match self.regions.get(region) {
            Some(slot) if slot.capacity > 0 => RegionBufferInfo {
                data_ptr: Some(slot.offset),
                length: slot.meta.bin_count,
            },
            _ => RegionBufferInfo::NULL,
        }
    }

    fn region_metadata(&self, region: usize) -> Option<RegionMetadata> {
        self.regions.get(region).map(|slot| slot.meta)
    }

    fn strike_state(&self) -> StrikeState {
        self.detector.state()
    }

    fn strike_measurement(&self) -> Option<StrikeMeasurement> {
        self.measurement
    }

    fn clear_strike_measurement(&mut self) {
        self.measurement = None;
    }

    fn reset_strike_detection(&mut self) {
        self.detector.reset();
        self.measurement = None;
        self.monitoring_strike = None;
        for slot in &mut self.regions {
            slot.monitored.clear();
        }
    }

    fn set_strike_detection_trigger(&mut self, min_magnitude: f32) {
        self.detector.set_trigger(min_magnitude);
    }

    fn set_required_decaying_clusters(&mut self, clusters: u32) {
        self.detector.set_required_clusters(clusters);
    }

    fn set_region_frequency(&mut self, region: usize, frequency: f32, is_display_region: bool) {
        if region >= self.regions.len() || frequency.is_nan() || frequency <= 0.0 {
            return;
        }
        let bin_hz = self.bin_hz();
        let spread = 2.0_f32.powf(self.config.region_half_width_cents / 1200.0);
        let max_bin = self.analyzer.bin_count().saturating_sub(1);
        let first_bin = ((frequency / spread / bin_hz).floor() as usize).min(max_bin);
        let last_bin = ((frequency * spread / bin_hz).ceil() as usize).clamp(first_bin, max_bin);
        let bin_count = last_bin - first_bin + 1;

        if is_display_region {
            for slot in &mut self.regions {
                slot.is_display = false;
            }
        }
        let slot = &mut self.regions[region];
        if bin_count > slot.capacity {
            slot.offset = self.memory.allocate(bin_count);
            slot.capacity = bin_count;
        }
        slot.first_bin = first_bin;
        slot.is_display = is_display_region;
        slot.meta.start_frequency = first_bin as f32 * bin_hz;
        slot.meta.end_frequency = last_bin as f32 * bin_hz;
        slot.meta.frequency_per_bin = bin_hz;
        slot.meta.bin_count = bin_count;
        slot.meta.peak_bin = 0;
        slot.meta.peak_frequency = 0.0;
        slot.meta.peak_magnitude = 0.0;
        slot.meta.peak_confidence = 0.0;
    }

    fn set_region_envelope_max(&mut self, region: usize, value: f32) {
        if let Some(slot) = self.regions.get_mut(region) {
            slot.meta.envelope_max = value;
            slot.manual_max = true;
        }
    }

    fn set_region_envelope_min(&mut self, region: usize, value: f32) {
        if let Some(slot) = self.regions.get_mut(region) {
            slot.meta.envelope_min = value;
            slot.manual_min = true;
        }
    }

    fn reset_region_envelope_max(&mut self, region: usize) {
        if let Some(slot) = self.regions.get_mut(region) {
            slot.meta.envelope_max = DEFAULT_ENVELOPE_MAX;
            slot.manual_max = false;
        }
    }

    fn reset_region_envelope_min(&mut self, region: usize) {
        if let Some(slot) = self.regions.get_mut(region) {
            slot.meta.envelope_min = DEFAULT_ENVELOPE_MIN;
            slot.manual_min = false;
        }
    }

    fn install_strike_start_callback(&mut self, hook: EngineHook<StrikeStartEvent>) {
        self.strike_hook = Some(hook);
    }

    fn install_harmonic_capture_callback(&mut self, hook: EngineHook<HarmonicCaptureEvent>) {
        self.capture_hook = Some(hook);
    }

    fn process(&mut self, samples: &[f32]) -> Result<()> {
        self.analyzer.magnitudes(samples, &mut self.spectrum);
        self.frames += 1;
        for index in 0..self.regions.len() {
            self.update_region(index);
        }
        if self.regions.is_empty() {
            return Ok(());
        }

        let display = self.display_region();
        let display_meta = self.regions[display].meta;
        let sample = StrikeSample {
            timestamp: self.timestamp(),
            magnitude: display_meta.peak_magnitude,
            frequency: display_meta.peak_frequency,
            confidence: display_meta.peak_confidence,
        };

        match self.detector.feed(&sample) {
            Some(StrikeTransition::Monitoring { strike_id }) => {
                self.measurement = Some(StrikeMeasurement {
                    frequency: sample.frequency,
                    magnitude: sample.magnitude,
                    confidence: sample.confidence,
                    timestamp: sample.timestamp,
                    is_valid: sample.frequency > 0.0,
                });
                self.monitoring_strike = Some(strike_id);
                for slot in &mut self.regions {
                    slot.monitored.clear();
                    slot.monitored.push((slot.meta.peak_frequency, slot.meta.peak_magnitude));
                }
                let event = StrikeStartEvent {
                    timestamp: sample.timestamp,
                    frequency: sample.frequency,
                    selected_partial: display as u32 + 1,
                    display_region_harmonic_index: display,
                    strike_id,
                };
                log::debug!(
                    "[ENGINE] Strike {} monitoring at {:.2} Hz",
                    strike_id,
                    sample.frequency
                );
                if let Some(hook) = self.strike_hook.as_mut() {
                    hook(&event);
                }
            }
            Some(StrikeTransition::Released { strike_id }) => {
                self.monitoring_strike = None;
                self.finish_capture(strike_id);
            }
            None if self.monitoring_strike.is_some() => {
                for slot in &mut self.regions {
                    slot.monitored.push((slot.meta.peak_frequency, slot.meta.peak_magnitude));
                }
            }
            Some(StrikeTransition::Attack) | Some(StrikeTransition::Aborted) | None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn tone(freqs: &[(f32, f32)], n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| {
                freqs
                    .iter()
                    .map(|(f, a)| a * (2.0 * std::f32::consts::PI * f * i as f32 / 44100.0).sin())
                    .sum()
            })
            .collect()
    }

    fn engine() -> SpectralEngine {
        let mut engine = SpectralEngine::new(&CoreConfig::default(), 3);
        for h in 1..=3 {
            engine.set_region_frequency(h - 1, 220.0 * h as f32, h == 1);
        }
        engine
    }

    #[test]
    fn regions_track_their_harmonic() {
        let mut engine = engine();
        engine
            .process(&tone(&[(220.0, 0.8), (441.0, 0.4), (662.0, 0.2)], 2048))
            .unwrap();
        let h2 = engine.region_metadata(1).unwrap();
        assert!((h2.peak_frequency - 441.0).abs() < 8.0, "got {}", h2.peak_frequency);
        assert!(h2.peak_magnitude > 0.2);
        let view = engine.region_data_view(1);
        assert_eq!(view.length, h2.bin_count);
        let memory = engine.memory();
        let bins = memory.read(view.data_ptr.unwrap(), view.length).unwrap();
        assert_eq!(bins[h2.peak_bin], h2.peak_magnitude);
    }

    #[test]
    fn unconfigured_region_has_null_pointer() {
        let engine = SpectralEngine::new(&CoreConfig::default(), 2);
        assert_eq!(engine.region_data_view(0), RegionBufferInfo::NULL);
        assert_eq!(engine.region_data_view(5), RegionBufferInfo::NULL);
    }

    #[test]
    fn retune_to_wider_region_moves_pointer() {
        let mut engine = engine();
        let before = engine.region_data_view(0);
        engine.set_region_frequency(0, 2000.0, true);
        let after = engine.region_data_view(0);
        assert_ne!(before.data_ptr, after.data_ptr);
        assert!(after.length > before.length);
    }

    #[test]
    fn sustained_tone_emits_strike_and_capture() {
        let mut engine = engine();
        let strikes = Rc::new(RefCell::new(Vec::new()));
        let captures = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&strikes);
        engine.install_strike_start_callback(Box::new(move |e: &StrikeStartEvent| {
            s.borrow_mut().push(e.clone())
        }));
        let c = Rc::clone(&captures);
        engine.install_harmonic_capture_callback(Box::new(move |e: &HarmonicCaptureEvent| {
            c.borrow_mut().push(e.clone())
        }));

        let loud = tone(&[(220.0, 0.9), (441.0, 0.5)], 2048);
        let silence = vec![0.0; 2048];
        engine.process(&silence).unwrap();
        for _ in 0..2 {
            engine.process(&loud).unwrap();
        }
        assert_eq!(engine.strike_state(), StrikeState::Attack);
        for _ in 0..3 {
            engine.process(&loud).unwrap();
        }
        assert_eq!(engine.strike_state(), StrikeState::Monitoring);
        assert_eq!(strikes.borrow().len(), 1);
        assert!(engine.strike_measurement().unwrap().is_valid);

        engine.process(&silence).unwrap();
        assert_eq!(engine.strike_state(), StrikeState::Waiting);
        let captures = captures.borrow();
        assert_eq!(captures.len(), 1);
        let (number, h2) = captures[0].harmonics[1];
        assert_eq!(number, 2);
        assert!(h2.is_valid);
        assert!((h2.ratio_mean - 2.0).abs() < 0.05, "ratio {}", h2.ratio_mean);
    }

    #[test]
    fn region_without_a_peak_is_left_out_of_the_capture() {
        let mut engine = SpectralEngine::new(&CoreConfig::default(), 3);
        engine.set_region_frequency(0, 220.0, true);
        engine.set_region_frequency(1, 440.0, false);
        let captures = Rc::new(RefCell::new(Vec::new()));
        let c = Rc::clone(&captures);
        engine.install_harmonic_capture_callback(Box::new(move |e: &HarmonicCaptureEvent| {
            c.borrow_mut().push(e.clone())
        }));

        let loud = tone(&[(220.0, 0.9), (441.0, 0.5)], 2048);
        for _ in 0..5 {
            engine.process(&loud).unwrap();
        }
        engine.process(&vec![0.0; 2048]).unwrap();

        let captures = captures.borrow();
        let numbers: Vec<u32> = captures[0].harmonics.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2]);
    }
}
