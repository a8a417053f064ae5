//! # Deviation Math
//!
//! Cents and inharmonicity conversions shared by capture scoring and the
//! display layer.
//!
//! Piano partials sit sharp of the ideal integer ratio because of string
//! stiffness. A partial measured *flat* is treated as measurement noise: the
//! display figure clamps it to zero, and it never contributes to the
//! inharmonicity estimate.

use linreg::linear_regression;
use serde::{Deserialize, Serialize};

pub const CENTS_PER_OCTAVE: f32 = 1200.0;

/// Upper bound of a physically plausible piano inharmonicity coefficient.
pub const MAX_PLAUSIBLE_B: f32 = 0.001;

/// Deviation of harmonic `harmonic` from `reference · harmonic`, in cents.
///
/// The fundamental is exactly 0 by definition. Non-positive inputs yield 0.
pub fn cents_deviation(measured_freq: f32, harmonic: u32, reference_freq: f32) -> f32 {
    if harmonic <= 1 || measured_freq <= 0.0 || reference_freq <= 0.0 {
        return 0.0;
    }
    CENTS_PER_OCTAVE * (measured_freq / (reference_freq * harmonic as f32)).log2()
}

/// Same as [`cents_deviation`] for a ratio already relative to the fundamental.
pub fn ratio_cents(ratio: f32, harmonic: u32) -> f32 {
    cents_deviation(ratio, harmonic, 1.0)
}

/// Display convention: flat readings are shown as 0.
pub fn display_cents(cents: f32) -> f32 {
    cents.max(0.0)
}

/// The inharmonicity coefficient implied by one harmonic's deviation, if it
/// is in the plausible piano range `(0, 0.001)`.
pub fn harmonic_inharmonicity(cents: f32, harmonic: u32) -> Option<f32> {
    if harmonic <= 1 || cents.is_nan() || cents <= 0.0 {
        return None;
    }
    let ratio = 2.0_f32.powf(cents / CENTS_PER_OCTAVE);
    let h = harmonic as f32;
    let b = (ratio * ratio - 1.0) / (h * h);
    (b > 0.0 && b < MAX_PLAUSIBLE_B).then_some(b)
}

/// Averages the plausible per-harmonic coefficients of `(harmonic, cents)`
/// pairs. `None` if none was plausible.
pub fn inharmonicity_estimate(deviations: &[(u32, f32)]) -> Option<f32> {
    let accepted: Vec<f32> = deviations
        .iter()
        .filter_map(|&(harmonic, cents)| harmonic_inharmonicity(cents, harmonic))
        .collect();
    if accepted.is_empty() {
        None
    } else {
        Some(accepted.iter().sum::<f32>() / accepted.len() as f32)
    }
}

/// A measured partial of a note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    /// Partial number, 1 for the fundamental.
    pub number: u32,
    pub frequency: f32,
}

/// Least-squares fit of `f_n = n·f0·√(1 + B·n²)` over at least three partials.
///
/// Linear in `x = n²`, `y = (f_n / n)²`: the slope over the intercept is `B`.
pub fn fit_inharmonicity(partials: &[Partial]) -> Option<f32> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = partials
        .iter()
        .filter(|p| p.number > 0 && p.frequency > 0.0)
        .map(|p| {
            let n = p.number as f64;
            let per_partial = p.frequency as f64 / n;
            (n * n, per_partial * per_partial)
        })
        .unzip();
    if xs.len() < 3 {
        return None;
    }

    let (slope, intercept): (f64, f64) = linear_regression(&xs, &ys).ok()?;
    if intercept.abs() > 1e-6 {
        Some((slope / intercept) as f32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fundamental_is_exactly_zero() {
        assert_eq!(cents_deviation(220.0, 1, 220.0), 0.0);
        assert_eq!(cents_deviation(230.0, 1, 220.0), 0.0);
    }

    #[test]
    fn second_harmonic_example() {
        let cents = cents_deviation(440.70, 2, 220.0);
        assert!((cents - 2.7516).abs() < 0.01, "got {cents}");
    }

    #[test]
    fn octave_is_twelve_hundred() {
        assert!((cents_deviation(880.0, 2, 220.0) - 1200.0).abs() < 1e-3);
    }

    #[test]
    fn flat_readings_display_as_zero() {
        let cents = cents_deviation(439.0, 2, 220.0);
        assert!(cents < 0.0);
        assert_eq!(display_cents(cents), 0.0);
        assert_eq!(display_cents(3.5), 3.5);
    }

    #[test]
    fn implausible_coefficients_are_rejected() {
        // 2.75 cents on H2 is B ≈ 0.0008.
        let b = harmonic_inharmonicity(2.75, 2).unwrap();
        assert!(b > 0.0007 && b < 0.0009, "got {b}");
        // 100 cents on H2 is far beyond any piano string.
        assert_eq!(harmonic_inharmonicity(100.0, 2), None);
        assert_eq!(harmonic_inharmonicity(-1.0, 3), None);
        assert_eq!(harmonic_inharmonicity(5.0, 1), None);
    }

    #[test]
    fn estimate_averages_only_accepted() {
        let good_2 = harmonic_inharmonicity(2.75, 2).unwrap();
        let good_3 = harmonic_inharmonicity(4.0, 3).unwrap();
        let ratios = [(2, 2.75), (3, 4.0), (4, 150.0), (5, -2.0)];
        let estimate = inharmonicity_estimate(&ratios).unwrap();
        assert!((estimate - (good_2 + good_3) / 2.0).abs() < 1e-9);
        assert_eq!(inharmonicity_estimate(&[(2, -1.0)]), None);
    }

    #[test]
    fn regression_recovers_b() {
        let f0 = 110.0_f32;
        let b = 0.0004_f32;
        let partials: Vec<_> = (1..=6)
            .map(|n| {
                let n_f = n as f32;
                Partial {
                    number: n,
                    frequency: n_f * f0 * (1.0 + b * n_f * n_f).sqrt(),
                }
            })
            .collect();
        let fitted = fit_inharmonicity(&partials).unwrap();
        assert!((fitted - b).abs() < 1e-5, "got {fitted}");
        assert_eq!(fit_inharmonicity(&partials[..2]), None);
    }

    #[test]
    fn ratio_cents_matches_frequency_form() {
        let from_ratio = ratio_cents(440.70 / 220.0, 2);
        let from_freq = cents_deviation(440.70, 2, 220.0);
        assert!((from_ratio - from_freq).abs() < 1e-4);
    }
}
