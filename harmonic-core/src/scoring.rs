//! Capture quality scoring.
//!
//! `score = Σ magnitude_median(h) · (9 − h) − mean ratio_std`
//!
//! Low partials dominate what a tuner hears, so H1 carries weight 8 and H8
//! weight 1. Harmonics above H8 do not contribute. The spread term averages
//! only harmonics marked valid.

use crate::capture::Capture;

pub const SCORED_HARMONICS: u32 = 8;

pub fn harmonic_weight(harmonic: u32) -> f32 {
    if (1..=SCORED_HARMONICS).contains(&harmonic) {
        (SCORED_HARMONICS + 1 - harmonic) as f32
    } else {
        0.0
    }
}

pub fn score(capture: &Capture) -> f32 {
    let weighted_magnitude: f32 = (1..=SCORED_HARMONICS)
        .filter_map(|h| {
            capture
                .harmonic(h)
                .map(|stats| stats.magnitude_median * harmonic_weight(h))
        })
        .sum();

    let (spread_sum, valid) = capture
        .harmonics
        .values()
        .filter(|stats| stats.is_valid)
        .fold((0.0_f32, 0_usize), |(sum, n), stats| (sum + stats.ratio_std, n + 1));
    let avg_ratio_std = if valid == 0 { 0.0 } else { spread_sum / valid as f32 };

    weighted_magnitude - avg_ratio_std
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::HarmonicStats;

    fn capture(harmonics: &[(u32, f32, f32, bool)]) -> Capture {
        Capture {
            harmonics: harmonics
                .iter()
                .map(|&(h, magnitude, std, valid)| {
                    (
                        h,
                        HarmonicStats {
                            ratio_mean: h as f32,
                            ratio_std: std,
                            magnitude_median: magnitude,
                            is_valid: valid,
                        },
                    )
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn weights_run_eight_to_one() {
        assert_eq!(harmonic_weight(1), 8.0);
        assert_eq!(harmonic_weight(8), 1.0);
        assert_eq!(harmonic_weight(9), 0.0);
        assert_eq!(harmonic_weight(0), 0.0);
    }

    #[test]
    fn weighted_sum_minus_average_spread() {
        let c = capture(&[(1, 1.0, 0.02, true), (2, 0.5, 0.04, true), (8, 1.0, 0.5, false)]);
        let expected = 1.0 * 8.0 + 0.5 * 7.0 + 1.0 * 1.0 - 0.03;
        assert!((score(&c) - expected).abs() < 1e-5);
    }

    #[test]
    fn no_valid_harmonics_means_no_penalty() {
        let c = capture(&[(1, 1.0, 0.9, false)]);
        assert_eq!(score(&c), 8.0);
        assert_eq!(score(&Capture::default()), 0.0);
    }

    #[test]
    fn tighter_spread_scores_higher() {
        let tight = capture(&[(1, 0.8, 0.001, true), (3, 0.3, 0.002, true)]);
        let loose = capture(&[(1, 0.8, 0.010, true), (3, 0.3, 0.002, true)]);
        assert!(score(&tight) > score(&loose));
    }
}
