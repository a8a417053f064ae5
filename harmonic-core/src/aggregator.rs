//! # Best Approximation Aggregator
//!
//! Keeps the most recent captures per (session, note) and decides which of
//! them are good enough to feed a best approximation:
//!
//! 1. score every capture in the window and sort descending
//! 2. the threshold is the score at `quality_rank` (5th best by default), or
//!    the worst score when fewer captures exist
//! 3. captures scoring at or above the threshold are high quality
//!
//! Turning the high-quality captures into per-harmonic ratios is the job of a
//! [`CaptureFusion`] implementation supplied by the caller.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::capture::Capture;
use crate::config::CoreConfig;
use crate::scoring;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureKey {
    pub session: String,
    /// 88-key piano index, 0 = A0.
    pub note: u8,
}

impl CaptureKey {
    pub fn new(session: impl Into<String>, note: u8) -> Self {
        Self {
            session: session.into(),
            note,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproximatedHarmonic {
    pub ratio: f32,
    pub magnitude: f32,
    /// Synthesised rather than measured.
    pub estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BestApproximation {
    pub harmonics: BTreeMap<u32, ApproximatedHarmonic>,
}

/// Fuses high-quality captures into a best approximation.
pub trait CaptureFusion {
    fn fuse(&self, high_quality: &[&Capture]) -> BestApproximation;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Approximation {
    Unavailable { captures: usize, required: usize },
    Available(BestApproximation),
}

impl Approximation {
    pub fn is_available(&self) -> bool {
        matches!(self, Approximation::Available(_))
    }
}

/// The high-quality subset of a capture window.
#[derive(Debug, Clone)]
pub struct QualityPartition<'a> {
    pub threshold: f32,
    /// Best first.
    pub high_quality: Vec<&'a Capture>,
    /// Every score in the window, best first.
    pub scores: Vec<f32>,
}

impl QualityPartition<'_> {
    pub fn total(&self) -> usize {
        self.scores.len()
    }
}

/// Partitions `captures` around the score at `rank` (1-based). `None` when
/// `captures` is empty.
pub fn partition(captures: &[Capture], rank: usize) -> Option<QualityPartition<'_>> {
    if captures.is_empty() {
        return None;
    }
    let mut scored: Vec<(f32, &Capture)> = captures
        .iter()
        .map(|c| (scoring::score(c), c))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let threshold = scored[rank.clamp(1, scored.len()) - 1].0;
    let high_quality = scored
        .iter()
        .filter(|(score, _)| *score >= threshold)
        .map(|(_, capture)| *capture)
        .collect();
    let scores = scored.iter().map(|(score, _)| *score).collect();

    Some(QualityPartition {
        threshold,
        high_quality,
        scores,
    })
}

#[derive(Debug, Clone)]
pub struct BestApproximationAggregator {
    window: usize,
    quality_rank: usize,
    min_captures: usize,
    captures: HashMap<CaptureKey, VecDeque<Capture>>,
}

impl BestApproximationAggregator {
    pub fn new(window: usize, quality_rank: usize, min_captures: usize) -> Self {
        Self {
            window: window.max(1),
            quality_rank: quality_rank.max(1),
            min_captures,
            captures: HashMap::new(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.capture_window, config.quality_rank, config.min_captures)
    }

    /// Adds a capture, evicting the oldest beyond the window. Returns the
    /// number of captures now held for `key`.
    pub fn push(&mut self, key: CaptureKey, capture: Capture) -> usize {
        let window = self.captures.entry(key).or_default();
        window.push_back(capture);
        while window.len() > self.window {
            window.pop_front();
        }
        window.len()
    }

    pub fn len(&self, key: &CaptureKey) -> usize {
        self.captures.get(key).map_or(0, VecDeque::len)
    }

    /// Whether enough captures exist for `key` to define a best approximation.
    pub fn is_available(&self, key: &CaptureKey) -> bool {
        self.len(key) >= self.min_captures
    }

    /// Oldest first.
    pub fn captures(&self, key: &CaptureKey) -> impl Iterator<Item = &Capture> {
        self.captures.get(key).into_iter().flatten()
    }

    pub fn partition(&mut self, key: &CaptureKey) -> Option<QualityPartition<'_>> {
        let rank = self.quality_rank;
        let window = self.captures.get_mut(key)?;
        partition(window.make_contiguous(), rank)
    }

    pub fn best_approximation(
        &mut self,
        key: &CaptureKey,
        fusion: &dyn CaptureFusion,
    ) -> Approximation {
        let captures = self.len(key);
        if !self.is_available(key) {
            return Approximation::Unavailable {
                captures,
                required: self.min_captures,
            };
        }
        match self.partition(key) {
            Some(partition) => Approximation::Available(fusion.fuse(&partition.high_quality)),
            None => Approximation::Unavailable {
                captures,
                required: self.min_captures,
            },
        }
    }

    pub fn clear(&mut self, key: &CaptureKey) {
        self.captures.remove(key);
    }

    pub fn clear_session(&mut self, session: &str) {
        self.captures.retain(|key, _| key.session != session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::HarmonicStats;
    use std::cell::Cell;

    fn capture(strike_id: u64, magnitude: f32) -> Capture {
        let mut c = Capture {
            strike_id,
            ..Default::default()
        };
        c.harmonics.insert(
            1,
            HarmonicStats {
                ratio_mean: 1.0,
                ratio_std: 0.0,
                magnitude_median: magnitude,
                is_valid: true,
            },
        );
        c
    }

    struct CountingFusion {
        seen: Cell<usize>,
    }

    impl CaptureFusion for CountingFusion {
        fn fuse(&self, high_quality: &[&Capture]) -> BestApproximation {
            self.seen.set(high_quality.len());
            BestApproximation::default()
        }
    }

    #[test]
    fn threshold_is_fifth_best() {
        let captures: Vec<_> = (1..=8).map(|i| capture(i, i as f32)).collect();
        let p = partition(&captures, 5).unwrap();
        assert_eq!(p.threshold, 4.0 * 8.0);
        let ids: Vec<_> = p.high_quality.iter().map(|c| c.strike_id).collect();
        assert_eq!(ids, vec![8, 7, 6, 5, 4]);
        assert_eq!(p.total(), 8);
    }

    #[test]
    fn fewer_than_rank_keeps_everything() {
        for n in 1..5 {
            let captures: Vec<_> = (1..=n).map(|i| capture(i, i as f32)).collect();
            let p = partition(&captures, 5).unwrap();
            assert_eq!(p.high_quality.len(), n as usize);
            assert_eq!(p.threshold, 8.0);
        }
        assert!(partition(&[], 5).is_none());
    }

    #[test]
    fn ties_at_threshold_are_included() {
        let captures: Vec<_> = (1..=7).map(|i| capture(i, 1.0)).collect();
        let p = partition(&captures, 5).unwrap();
        assert_eq!(p.high_quality.len(), 7);
    }

    #[test]
    fn unavailable_below_three_captures() {
        let mut agg = BestApproximationAggregator::new(25, 5, 3);
        let key = CaptureKey::new("s", 48);
        let fusion = CountingFusion { seen: Cell::new(0) };

        agg.push(key.clone(), capture(1, 1.0));
        agg.push(key.clone(), capture(2, 2.0));
        assert_eq!(
            agg.best_approximation(&key, &fusion),
            Approximation::Unavailable { captures: 2, required: 3 }
        );

        agg.push(key.clone(), capture(3, 3.0));
        assert!(agg.best_approximation(&key, &fusion).is_available());
        assert_eq!(fusion.seen.get(), 3);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut agg = BestApproximationAggregator::new(25, 5, 3);
        let key = CaptureKey::new("s", 40);
        for i in 1..=30 {
            agg.push(key.clone(), capture(i, 1.0));
        }
        assert_eq!(agg.len(&key), 25);
        assert_eq!(agg.captures(&key).next().map(|c| c.strike_id), Some(6));
    }

    #[test]
    fn keys_are_independent() {
        let mut agg = BestApproximationAggregator::new(25, 5, 3);
        let a4 = CaptureKey::new("s1", 48);
        let a3 = CaptureKey::new("s1", 36);
        let other = CaptureKey::new("s2", 48);
        agg.push(a4.clone(), capture(1, 1.0));
        agg.push(a3.clone(), capture(2, 1.0));
        agg.push(other.clone(), capture(3, 1.0));

        agg.clear_session("s1");
        assert_eq!(agg.len(&a4), 0);
        assert_eq!(agg.len(&a3), 0);
        assert_eq!(agg.len(&other), 1);
    }
}
