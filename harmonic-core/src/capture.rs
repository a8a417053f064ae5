//! # Measurement Capture Module
//!
//! Turns a completed strike into a [`Capture`]: one snapshot of every tracked
//! region's peak, keyed by harmonic number.
//!
//! The same measurement is typically visible for several update cycles, so
//! each one is identified by `"{timestamp:.3}-{frequency:.1}"` and only the
//! first sighting produces a capture.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::TunerContext;
use crate::events::{HarmonicCaptureEvent, StrikeStartEvent};

/// Statistics for one harmonic of one strike.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HarmonicStats {
    /// Measured frequency divided by the fundamental.
    pub ratio_mean: f32,
    pub ratio_std: f32,
    pub magnitude_median: f32,
    pub is_valid: bool,
}

/// One complete harmonic snapshot of a single strike.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Capture {
    pub strike_id: u64,
    pub timestamp: f64,
    pub harmonics: BTreeMap<u32, HarmonicStats>,
}

impl Capture {
    pub fn harmonic(&self, number: u32) -> Option<&HarmonicStats> {
        self.harmonics.get(&number)
    }
}

impl From<&HarmonicCaptureEvent> for Capture {
    fn from(event: &HarmonicCaptureEvent) -> Self {
        Self {
            strike_id: event.strike_id,
            timestamp: event.timestamp,
            harmonics: event
                .harmonics
                .iter()
                .filter(|(_, stats)| stats.ratio_mean.is_finite() && stats.ratio_mean > 0.0)
                .copied()
                .collect(),
        }
    }
}

/// Which region tracks which harmonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRegion {
    pub region: usize,
    pub harmonic: u32,
}

#[derive(Debug, Clone)]
pub struct MeasurementCapture {
    tracked: Vec<TrackedRegion>,
    last_measurement_id: Option<String>,
    next_strike_id: u64,
}

impl MeasurementCapture {
    pub fn new(tracked: Vec<TrackedRegion>) -> Self {
        Self {
            tracked,
            last_measurement_id: None,
            next_strike_id: 1,
        }
    }

    /// Region `i` tracks harmonic `i + 1`, for the first `count` regions.
    pub fn for_harmonics(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|region| TrackedRegion {
                    region,
                    harmonic: region as u32 + 1,
                })
                .collect(),
        )
    }

    pub fn measurement_id(timestamp: f64, frequency: f32) -> String {
        format!("{:.3}-{:.1}", timestamp, frequency)
    }

    pub fn last_measurement_id(&self) -> Option<&str> {
        self.last_measurement_id.as_deref()
    }

    /// Forgets the last processed measurement.
    pub fn reset(&mut self) {
        self.last_measurement_id = None;
    }

    /// Polls the strike measurement and captures it if it is new.
    pub fn observe(&mut self, ctx: &mut TunerContext) -> Option<Capture> {
        let measurement = ctx.strike_measurement()?;
        if !measurement.is_valid {
            return None;
        }
        let strike_id = self.next_strike_id;
        self.accept(ctx, measurement.timestamp, measurement.frequency, 1, strike_id)
    }

    /// Captures the strike announced by `event` if it is new.
    pub fn observe_event(
        &mut self,
        ctx: &mut TunerContext,
        event: &StrikeStartEvent,
    ) -> Option<Capture> {
        self.accept(
            ctx,
            event.timestamp,
            event.frequency,
            event.selected_partial.max(1),
            event.strike_id,
        )
    }

    fn accept(
        &mut self,
        ctx: &mut TunerContext,
        timestamp: f64,
        frequency: f32,
        selected_partial: u32,
        strike_id: u64,
    ) -> Option<Capture> {
        let id = Self::measurement_id(timestamp, frequency);
        if self.last_measurement_id.as_deref() == Some(id.as_str()) {
            log::trace!("[CAPTURE] Measurement {} already processed", id);
            return None;
        }
        self.last_measurement_id = Some(id);
        if frequency <= 0.0 {
            return None;
        }

        let snapshot: Vec<_> = self
            .tracked
            .iter()
            .filter_map(|tracked| Some((tracked.harmonic, ctx.region_metadata(tracked.region)?)))
            .filter(|(_, meta)| meta.peak_frequency > 0.0)
            .collect();

        let fundamental = snapshot
            .iter()
            .find(|(harmonic, _)| *harmonic == 1)
            .map(|(_, meta)| meta.peak_frequency)
            .unwrap_or(frequency / selected_partial as f32);

        let harmonics: BTreeMap<u32, HarmonicStats> = snapshot
            .into_iter()
            .map(|(harmonic, meta)| {
                let stats = HarmonicStats {
                    ratio_mean: meta.peak_frequency / fundamental,
                    ratio_std: 0.0,
                    magnitude_median: meta.peak_magnitude,
                    is_valid: meta.peak_confidence > 0.0,
                };
                (harmonic, stats)
            })
            .collect();

        if harmonics.is_empty() {
            log::debug!("[CAPTURE] Strike {} had no region with a peak", strike_id);
            return None;
        }

        self.next_strike_id = strike_id + 1;
        log::info!(
            "[CAPTURE] Strike {} captured at {:.1} Hz with {} harmonics",
            strike_id,
            frequency,
            harmonics.len()
        );
        Some(Capture {
            strike_id,
            timestamp,
            harmonics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurement_id_rounds_like_display() {
        assert_eq!(MeasurementCapture::measurement_id(1.23456, 220.04), "1.235-220.0");
        assert_eq!(MeasurementCapture::measurement_id(0.0, 27.5), "0.000-27.5");
    }

    fn stats(ratio_mean: f32, magnitude_median: f32) -> HarmonicStats {
        HarmonicStats {
            ratio_mean,
            ratio_std: 0.0,
            magnitude_median,
            is_valid: true,
        }
    }

    #[test]
    fn harmonic_capture_event_converts() {
        let event = HarmonicCaptureEvent {
            strike_id: 4,
            timestamp: 2.5,
            harmonics: vec![(1, stats(1.0, 0.9)), (2, stats(2.002, 0.4))],
        };
        let capture = Capture::from(&event);
        assert_eq!(capture.strike_id, 4);
        assert_eq!(capture.harmonic(2).map(|h| h.ratio_mean), Some(2.002));
        assert!(capture.harmonic(3).is_none());
    }

    #[test]
    fn zero_filled_harmonics_are_dropped_on_conversion() {
        let event = HarmonicCaptureEvent {
            strike_id: 7,
            timestamp: 1.0,
            harmonics: vec![
                (1, stats(1.0, 0.9)),
                (2, HarmonicStats::default()),
                (3, stats(f32::NAN, 0.2)),
                (4, stats(4.01, 0.1)),
            ],
        };
        let capture = Capture::from(&event);
        assert_eq!(capture.harmonics.keys().copied().collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn for_harmonics_numbers_from_one() {
        let capture = MeasurementCapture::for_harmonics(3);
        assert_eq!(
            capture.tracked,
            vec![
                TrackedRegion { region: 0, harmonic: 1 },
                TrackedRegion { region: 1, harmonic: 2 },
                TrackedRegion { region: 2, harmonic: 3 },
            ]
        );
    }
}
