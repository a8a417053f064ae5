//! # Strike Detector
//!
//! The strike lifecycle as an engine runs it:
//!
//! ```text
//! Waiting --(magnitude > trigger)--> Attack
//! Attack  --(N consecutive samples > trigger)--> Monitoring
//! Attack  --(magnitude <= trigger)--> Waiting
//! Monitoring --(magnitude < trigger * release_ratio)--> Waiting
//! ```
//!
//! The sample that enters `Attack` counts as the first of the N qualifying
//! samples. `Monitoring` is only ever entered on a later sample, so a
//! single-frame spike always stops in `Attack`, even with N = 1.

use crate::strike::StrikeState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrikeSample {
    pub timestamp: f64,
    pub magnitude: f32,
    pub frequency: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeTransition {
    Attack,
    /// The attack did not hold long enough.
    Aborted,
    Monitoring { strike_id: u64 },
    Released { strike_id: u64 },
}

#[derive(Debug, Clone)]
pub struct StrikeDetector {
    trigger: f32,
    required_clusters: u32,
    release_ratio: f32,
    state: StrikeState,
    qualifying: u32,
    next_strike_id: u64,
}

impl StrikeDetector {
    pub fn new(trigger: f32, required_clusters: u32, release_ratio: f32) -> Self {
        Self {
            trigger,
            required_clusters: required_clusters.max(1),
            release_ratio,
            state: StrikeState::Waiting,
            qualifying: 0,
            next_strike_id: 1,
        }
    }

    pub fn state(&self) -> StrikeState {
        self.state
    }

    pub fn trigger(&self) -> f32 {
        self.trigger
    }

    pub fn required_clusters(&self) -> u32 {
        self.required_clusters
    }

    pub fn set_trigger(&mut self, trigger: f32) {
        self.trigger = trigger;
    }

    pub fn set_required_clusters(&mut self, clusters: u32) {
        self.required_clusters = clusters.max(1);
    }

    /// Back to `Waiting`. Strike ids keep increasing across resets.
    pub fn reset(&mut self) {
        self.state = StrikeState::Waiting;
        self.qualifying = 0;
    }

    pub fn feed(&mut self, sample: &StrikeSample) -> Option<StrikeTransition> {
        let above = sample.magnitude > self.trigger;
        match self.state {
            StrikeState::Waiting if above => {
                self.qualifying = 1;
                self.state = StrikeState::Attack;
                Some(StrikeTransition::Attack)
            }
            StrikeState::Waiting => None,
            StrikeState::Attack if above => {
                self.qualifying += 1;
                if self.qualifying >= self.required_clusters.max(2) {
                    Some(self.begin_monitoring())
                } else {
                    None
                }
            }
            StrikeState::Attack => {
                self.reset();
                Some(StrikeTransition::Aborted)
            }
            StrikeState::Monitoring => {
                if sample.magnitude < self.trigger * self.release_ratio {
                    self.reset();
                    Some(StrikeTransition::Released {
                        strike_id: self.next_strike_id - 1,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn begin_monitoring(&mut self) -> StrikeTransition {
        self.state = StrikeState::Monitoring;
        let strike_id = self.next_strike_id;
        self.next_strike_id += 1;
        StrikeTransition::Monitoring { strike_id }
    }
}
