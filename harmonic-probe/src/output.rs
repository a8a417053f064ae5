use std::io::Write;

use anyhow::Result;
use harmonic_core::Capture;
use harmonic_core::deviation::{display_cents, inharmonicity_estimate, ratio_cents};
use serde::Serialize;

/// One line of probe output.
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record<'a> {
    /// Snapshot taken when a strike starts being monitored.
    Strike {
        strike_id: u64,
        timestamp: f64,
        frequency: f32,
        note: &'a str,
        harmonics: Vec<HarmonicReading>,
    },
    /// Statistics of a completed strike.
    Capture {
        strike_id: u64,
        note: &'a str,
        score: f32,
        harmonics: Vec<HarmonicReading>,
        inharmonicity: Option<f32>,
    },
    /// Which captures currently count as high quality.
    Partition {
        session: &'a str,
        note: &'a str,
        captures: usize,
        threshold: f32,
        high_quality: Vec<u64>,
        available: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct HarmonicReading {
    pub harmonic: u32,
    pub ratio: f32,
    /// Flat readings clamp to 0.
    pub cents: f32,
    pub magnitude: f32,
    pub valid: bool,
}

pub fn readings(capture: &Capture) -> Vec<HarmonicReading> {
    capture
        .harmonics
        .iter()
        .map(|(&harmonic, stats)| HarmonicReading {
            harmonic,
            ratio: stats.ratio_mean,
            cents: display_cents(ratio_cents(stats.ratio_mean, harmonic)),
            magnitude: stats.magnitude_median,
            valid: stats.is_valid,
        })
        .collect()
}

/// Inharmonicity implied by the valid harmonics of `capture`.
pub fn capture_inharmonicity(capture: &Capture) -> Option<f32> {
    let deviations: Vec<(u32, f32)> = capture
        .harmonics
        .iter()
        .filter(|(_, stats)| stats.is_valid)
        .map(|(&harmonic, stats)| (harmonic, ratio_cents(stats.ratio_mean, harmonic)))
        .collect();
    inharmonicity_estimate(&deviations)
}

pub fn write_record(out: &mut impl Write, record: &Record<'_>) -> Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}
