//! # Tuner Context
//!
//! The single object the application owns and passes around. It holds the
//! (possibly not yet available) engine, the shared rate-limited cache, and the
//! event dispatchers. There is no global state: two contexts are fully
//! independent, which is what the tests rely on.
//!
//! Engine readiness is observed asynchronously relative to whoever registers
//! listeners, so every accessor tolerates a missing engine and falls back to a
//! documented default.

use std::collections::TryReserveError;
use std::rc::Rc;

use crate::cache::RateLimitedCache;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{CoreConfig, StagingFailurePolicy};
use crate::dispatcher::{EventDispatcher, Listener, Subscription};
use crate::engine::NativeEngine;
use crate::envelope_store::EnvelopeStore;
use crate::events::{HarmonicCaptureEvent, StrikeStartEvent};
use crate::strike::PendingSettings;
use crate::{Error, Result};

/// Desired strike detection settings, re-applied to every attached engine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StrikeSettings {
    pub(crate) trigger: f32,
    pub(crate) clusters: u32,
}

pub struct TunerContext {
    config: CoreConfig,
    pub(crate) engine: Option<Box<dyn NativeEngine>>,
    engine_generation: u64,
    pub(crate) cache: RateLimitedCache,
    strike_start: EventDispatcher<StrikeStartEvent>,
    harmonic_capture: EventDispatcher<HarmonicCaptureEvent>,
    pub(crate) strike_settings: StrikeSettings,
    pub(crate) pending: PendingSettings,
    staging: Vec<f32>,
}

impl TunerContext {
    pub fn new(config: CoreConfig) -> Self {
        Self::with_clock(config, Rc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: CoreConfig, clock: Rc<dyn Clock>) -> Self {
        let strike_settings = StrikeSettings {
            trigger: config.strike_trigger,
            clusters: config.required_decaying_clusters,
        };
        Self {
            cache: RateLimitedCache::new(config.throttle(), clock),
            engine: None,
            engine_generation: 0,
            strike_start: EventDispatcher::new("strike-start"),
            harmonic_capture: EventDispatcher::new("harmonic-capture"),
            strike_settings,
            pending: PendingSettings::default(),
            staging: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn is_engine_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Takes ownership of a freshly initialised engine.
    ///
    /// Cached values from any previous engine are dropped, the dispatcher
    /// callbacks are installed and the current strike settings are pushed.
    pub fn attach_engine(&mut self, engine: Box<dyn NativeEngine>) {
        self.engine = Some(engine);
        self.engine_generation += 1;
        self.cache.clear();
        self.pending = PendingSettings {
            trigger: Some(self.strike_settings.trigger),
            clusters: Some(self.strike_settings.clusters),
        };
        self.install_dispatchers();
        self.flush_pending_settings();
        let regions = self.region_count();
        log::info!(
            "[ENGINE] Engine #{} attached with {} regions",
            self.engine_generation,
            regions
        );
    }

    /// Attaches `engine` and restores persisted envelope maxima.
    pub fn attach_engine_with_envelopes(
        &mut self,
        engine: Box<dyn NativeEngine>,
        store: &dyn EnvelopeStore,
    ) {
        self.attach_engine(engine);
        let mut restored = 0;
        for region in 0..self.region_count() {
            if let Some(value) = store.load(region).filter(|v| v.is_finite() && *v > 0.0) {
                self.set_region_envelope_max(region, value);
                restored += 1;
            }
        }
        log::info!("[ENGINE] Restored {} envelope maxima", restored);
    }

    /// Saves every region's current envelope maximum. Returns how many were saved.
    pub fn persist_envelopes(&mut self, store: &mut dyn EnvelopeStore) -> Result<usize> {
        let mut saved = 0;
        for region in 0..self.region_count() {
            if let Some(meta) = self.region_metadata(region) {
                store.save(region, meta.envelope_max)?;
                saved += 1;
            }
        }
        Ok(saved)
    }

    pub fn detach_engine(&mut self) -> Option<Box<dyn NativeEngine>> {
        let engine = self.engine.take();
        if engine.is_some() {
            self.cache.clear();
            self.strike_start.uninstall();
            self.harmonic_capture.uninstall();
            log::info!("[ENGINE] Engine #{} detached", self.engine_generation);
        }
        engine
    }

    /// Runs one engine tick. A no-op while no engine is attached.
    pub fn process_audio(&mut self, samples: &[f32]) -> Result<()> {
        let Some(engine) = self.engine.as_deref_mut() else {
            log::trace!("[ENGINE] Tick skipped, engine not ready");
            return Ok(());
        };

        self.staging.clear();
        if reserve_staging(&mut self.staging, samples.len()).is_err() {
            match self.config.staging_failure_policy {
                StagingFailurePolicy::Fail => {
                    return Err(Error::StagingAllocation {
                        requested: samples.len(),
                    });
                }
                StagingFailurePolicy::DropFrame => {
                    log::warn!("[ENGINE] Dropping frame, staging buffer allocation failed");
                    return Ok(());
                }
            }
        }
        self.staging.extend_from_slice(samples);
        engine.process(&self.staging)?;

        self.flush_pending_settings();
        Ok(())
    }

    /// Adds a strike-start listener. Safe to call repeatedly with the same
    /// listener and before the engine exists.
    pub fn register_strike_start_callback(
        &mut self,
        listener: Listener<StrikeStartEvent>,
    ) -> Subscription<StrikeStartEvent> {
        let subscription = self.strike_start.register(listener);
        self.install_dispatchers();
        subscription
    }

    pub fn register_harmonic_capture_callback(
        &mut self,
        listener: Listener<HarmonicCaptureEvent>,
    ) -> Subscription<HarmonicCaptureEvent> {
        let subscription = self.harmonic_capture.register(listener);
        self.install_dispatchers();
        subscription
    }

    pub fn strike_start_dispatcher(&self) -> &EventDispatcher<StrikeStartEvent> {
        &self.strike_start
    }

    pub fn harmonic_capture_dispatcher(&self) -> &EventDispatcher<HarmonicCaptureEvent> {
        &self.harmonic_capture
    }

    fn install_dispatchers(&mut self) {
        let Some(engine) = self.engine.as_deref_mut() else {
            return;
        };
        let generation = self.engine_generation;
        self.strike_start
            .ensure_installed(generation, |hook| engine.install_strike_start_callback(hook));
        self.harmonic_capture
            .ensure_installed(generation, |hook| engine.install_harmonic_capture_callback(hook));
    }
}

fn reserve_staging(
    staging: &mut Vec<f32>,
    requested: usize,
) -> std::result::Result<(), TryReserveError> {
    staging.try_reserve(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::strike::StrikeState;

    #[test]
    fn defaults_without_engine() {
        let mut ctx = TunerContext::with_clock(CoreConfig::default(), Rc::new(ManualClock::new()));
        assert!(!ctx.is_engine_ready());
        assert_eq!(ctx.strike_state(), StrikeState::Waiting);
        assert_eq!(ctx.strike_measurement(), None);
        assert_eq!(ctx.strike_measurement_frequency(), 0.0);
        assert!(!ctx.strike_measurement_is_valid());
        assert_eq!(ctx.region_metadata(0), None);
        assert!(ctx.region_data(0).is_empty());
        assert_eq!(ctx.region_count(), 0);
        ctx.reset_strike_detection();
        ctx.clear_strike_measurement();
        assert!(ctx.process_audio(&[0.0; 16]).is_ok());
    }

    #[test]
    fn staging_reservation_reports_overflow() {
        let mut staging = Vec::new();
        assert!(reserve_staging(&mut staging, usize::MAX).is_err());
        assert!(reserve_staging(&mut staging, 64).is_ok());
        assert!(staging.capacity() >= 64);
    }
}
