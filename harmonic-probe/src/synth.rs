//! A repeatedly struck, exponentially decaying piano-like tone with stretched
//! partials `f_n = n·f0·√(1 + B·n²)`.

use std::f32::consts::PI;

const STRIKE_PERIOD_SECONDS: f32 = 3.0;
const RING_SECONDS: f32 = 2.5;
const DECAY_SECONDS: f32 = 1.0;
const PEAK_AMPLITUDE: f32 = 0.8;

pub struct SyntheticPiano {
    partials: Vec<(f32, f32)>,
    sample_rate: f32,
    position: usize,
}

impl SyntheticPiano {
    pub fn new(frequency: f32, inharmonicity: f32, sample_rate: u32, harmonics: usize) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let partials = (1..=harmonics)
            .map(|n| {
                let n = n as f32;
                let partial = n * frequency * (1.0 + inharmonicity * n * n).sqrt();
                (partial, PEAK_AMPLITUDE / n)
            })
            .filter(|(partial, _)| *partial < nyquist)
            .collect();
        Self {
            partials,
            sample_rate: sample_rate as f32,
            position: 0,
        }
    }

    pub fn next_frame(&mut self, len: usize) -> Vec<f32> {
        let period = (STRIKE_PERIOD_SECONDS * self.sample_rate) as usize;
        let frame = (self.position..self.position + len)
            .map(|i| {
                let t = (i % period) as f32 / self.sample_rate;
                if t >= RING_SECONDS {
                    return 0.0;
                }
                let envelope = (-t / DECAY_SECONDS).exp();
                self.partials
                    .iter()
                    .map(|(f, a)| a * envelope * (2.0 * PI * f * t).sin())
                    .sum()
            })
            .collect();
        self.position += len;
        frame
    }

    /// Seconds of audio produced so far.
    pub fn elapsed(&self) -> f32 {
        self.position as f32 / self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rings_then_falls_silent() {
        let mut piano = SyntheticPiano::new(440.0, 0.0004, 44100, 8);
        let onset = piano.next_frame(2048);
        assert!(onset.iter().any(|s| s.abs() > 0.3));

        while piano.elapsed() < RING_SECONDS + 0.1 {
            piano.next_frame(2048);
        }
        let silence = piano.next_frame(1024);
        assert!(silence.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn partials_above_nyquist_are_dropped() {
        let piano = SyntheticPiano::new(4000.0, 0.0, 16000, 8);
        assert_eq!(piano.partials.len(), 1);
    }
}
