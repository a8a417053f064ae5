//! Measurement core of the harmonic probe.
//!
//! This crate sits between a spectral engine and whatever presents its
//! results. It polls strike and region state through a rate-limited cache,
//! exposes region bins as zero-copy views, fans engine events out to any
//! number of listeners, and turns completed strikes into scored captures
//! that accumulate into a best approximation per note. It contains no GUI
//! code.
//!
//! Everything hangs off a [`TunerContext`]; there is no global state.

pub mod aggregator;
pub mod audio;
pub mod bridge;
pub mod cache;
pub mod capture;
pub mod clock;
pub mod config;
pub mod context;
pub mod deviation;
pub mod dispatcher;
pub mod engine;
pub mod envelope_store;
pub mod error;
pub mod events;
pub mod fft;
pub mod notes;
pub mod region;
pub mod scoring;
pub mod strike;
pub mod strike_detector;

pub use aggregator::{
    Approximation, BestApproximation, BestApproximationAggregator, CaptureFusion, CaptureKey,
};
pub use bridge::RegionView;
pub use capture::{Capture, HarmonicStats, MeasurementCapture};
pub use config::CoreConfig;
pub use context::TunerContext;
pub use dispatcher::{Listener, Subscription, listener};
pub use engine::NativeEngine;
pub use error::{Error, Result};
pub use events::{HarmonicCaptureEvent, StrikeStartEvent};
pub use region::RegionMetadata;
pub use strike::{StrikeMeasurement, StrikeState};
