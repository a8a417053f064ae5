//! # Fast Fourier Transform (FFT) Module
//!
//! Magnitude spectra for the reference engine. A frame is DC-corrected,
//! Hann-windowed and transformed with RustFFT; magnitudes are scaled so a
//! full-scale sine lands near 1.0, which keeps the strike trigger meaningful
//! regardless of frame size.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Reusable FFT plan, window and scratch buffers for one frame size.
pub struct SpectrumAnalyzer {
    frame_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    signal: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(frame_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            frame_size,
            fft: planner.plan_fft_forward(frame_size),
            window: hann_window(frame_size),
            signal: vec![0.0; frame_size],
            buffer: vec![Complex { re: 0.0, im: 0.0 }; frame_size],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of magnitude bins produced per frame.
    pub fn bin_count(&self) -> usize {
        self.frame_size / 2
    }

    /// Computes the magnitude spectrum of the last `frame_size` samples of
    /// `signal` (zero-padded in front when shorter) into `magnitudes`.
    pub fn magnitudes(&mut self, signal: &[f32], magnitudes: &mut Vec<f32>) {
        let take = signal.len().min(self.frame_size);
        let pad = self.frame_size - take;
        self.signal[..pad].fill(0.0);
        self.signal[pad..].copy_from_slice(&signal[signal.len() - take..]);

        remove_dc_offset(&mut self.signal);
        for ((slot, sample), weight) in self.buffer.iter_mut().zip(&self.signal).zip(&self.window) {
            *slot = Complex {
                re: sample * weight,
                im: 0.0,
            };
        }
        self.fft.process(&mut self.buffer);

        // Hann-windowed sine of amplitude A peaks at A·N/4.
        let scale = 4.0 / self.frame_size as f32;
        magnitudes.clear();
        magnitudes.extend(self.buffer.iter().take(self.bin_count()).map(|c| c.norm() * scale));
    }
}

/// Log-parabolic interpolation around `peak_bin`. Returns the fractional bin.
pub fn interpolate_peak(magnitudes: &[f32], peak_bin: usize) -> f32 {
    if peak_bin == 0 || peak_bin + 1 >= magnitudes.len() {
        return peak_bin as f32;
    }
    let y1 = magnitudes[peak_bin - 1].ln();
    let y2 = magnitudes[peak_bin].ln();
    let y3 = magnitudes[peak_bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return peak_bin as f32;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return peak_bin as f32;
    }
    let shift = (y3 - y1) / (2.0 * denominator);
    if shift.is_finite() && shift.abs() <= 0.5 {
        peak_bin as f32 + shift
    } else {
        peak_bin as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, n: usize, amplitude: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn full_scale_sine_is_near_one() {
        let mut analyzer = SpectrumAnalyzer::new(2048);
        let mut mags = Vec::new();
        let bin_hz = 44100.0 / 2048.0;
        analyzer.magnitudes(&sine(bin_hz * 40.0, 44100.0, 2048, 1.0), &mut mags);
        assert_eq!(mags.len(), 1024);
        let peak = mags.iter().cloned().fold(0.0_f32, f32::max);
        assert!((peak - 1.0).abs() < 0.05, "peak {peak}");
        assert!(mags[40] >= peak);
    }

    #[test]
    fn interpolation_lands_between_bins() {
        let mut analyzer = SpectrumAnalyzer::new(4096);
        let mut mags = Vec::new();
        let bin_hz = 44100.0 / 4096.0;
        analyzer.magnitudes(&sine(bin_hz * 50.3, 44100.0, 4096, 0.5), &mut mags);
        let fractional = interpolate_peak(&mags, 50);
        assert!((fractional - 50.3).abs() < 0.1, "got {fractional}");
    }

    #[test]
    fn short_input_is_padded() {
        let mut analyzer = SpectrumAnalyzer::new(64);
        let mut mags = Vec::new();
        analyzer.magnitudes(&[0.0; 10], &mut mags);
        assert_eq!(mags.len(), 32);
        assert!(mags.iter().all(|m| *m == 0.0));
    }
}
