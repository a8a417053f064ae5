//! Drives the measurement core one frame at a time and reports what it sees.
//!
//! Engine events are queued by the listeners and handled after the tick that
//! produced them, so the handlers are free to query the context.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use anyhow::Result;
use harmonic_core::envelope_store::EnvelopeStore;
use harmonic_core::notes::Note;
use harmonic_core::{
    BestApproximationAggregator, Capture, CaptureKey, CoreConfig, HarmonicCaptureEvent,
    MeasurementCapture, NativeEngine, StrikeStartEvent, Subscription, TunerContext, listener,
    scoring,
};

use crate::output::{self, Record};

pub struct Probe {
    ctx: TunerContext,
    capture: MeasurementCapture,
    aggregator: BestApproximationAggregator,
    key: CaptureKey,
    note: &'static Note,
    strikes: Rc<RefCell<VecDeque<StrikeStartEvent>>>,
    completions: Rc<RefCell<VecDeque<HarmonicCaptureEvent>>>,
    subscriptions: Option<(Subscription<StrikeStartEvent>, Subscription<HarmonicCaptureEvent>)>,
}

impl Probe {
    /// Sets up the context and its listeners. No engine is attached yet.
    pub fn new(config: CoreConfig, note: &'static Note, session: &str) -> Self {
        let mut ctx = TunerContext::new(config);
        let strikes = Rc::new(RefCell::new(VecDeque::new()));
        let completions = Rc::new(RefCell::new(VecDeque::new()));

        let queue = Rc::clone(&strikes);
        let on_strike = listener(move |event: &StrikeStartEvent| {
            queue.borrow_mut().push_back(event.clone());
            Ok(())
        });
        let queue = Rc::clone(&completions);
        let on_capture = listener(move |event: &HarmonicCaptureEvent| {
            queue.borrow_mut().push_back(event.clone());
            Ok(())
        });
        let strike_sub = ctx.register_strike_start_callback(on_strike);
        let capture_sub = ctx.register_harmonic_capture_callback(on_capture);

        let harmonics = ctx.config().max_harmonics;
        let aggregator = BestApproximationAggregator::from_config(ctx.config());
        Self {
            ctx,
            capture: MeasurementCapture::for_harmonics(harmonics),
            aggregator,
            key: CaptureKey::new(session, note.index),
            note,
            strikes,
            completions,
            subscriptions: Some((strike_sub, capture_sub)),
        }
    }

    /// Attaches the engine, restores envelopes and tunes region `i` to
    /// harmonic `i + 1` of the note.
    pub fn attach(&mut self, engine: Box<dyn NativeEngine>, store: &dyn EnvelopeStore) {
        self.ctx.attach_engine_with_envelopes(engine, store);
        for region in 0..self.ctx.region_count() {
            let frequency = self.note.harmonic_frequency(region as u32 + 1);
            self.ctx.set_region_frequency(region, frequency, region == 0);
        }
        log::info!(
            "[MAIN] Measuring {} ({:.2} Hz) in session '{}'",
            self.note.name,
            self.note.frequency,
            self.key.session
        );
    }

    pub fn tick(&mut self, samples: &[f32], out: &mut impl Write) -> Result<()> {
        self.ctx.process_audio(samples)?;

        loop {
            let Some(event) = self.strikes.borrow_mut().pop_front() else {
                break;
            };
            if let Some(capture) = self.capture.observe_event(&mut self.ctx, &event) {
                let record = Record::Strike {
                    strike_id: event.strike_id,
                    timestamp: event.timestamp,
                    frequency: event.frequency,
                    note: &self.note.name,
                    harmonics: output::readings(&capture),
                };
                output::write_record(out, &record)?;
            }
        }

        loop {
            let Some(event) = self.completions.borrow_mut().pop_front() else {
                break;
            };
            self.record_capture(Capture::from(&event), out)?;
        }
        Ok(())
    }

    fn record_capture(&mut self, capture: Capture, out: &mut impl Write) -> Result<()> {
        output::write_record(
            out,
            &Record::Capture {
                strike_id: capture.strike_id,
                note: &self.note.name,
                score: scoring::score(&capture),
                harmonics: output::readings(&capture),
                inharmonicity: output::capture_inharmonicity(&capture),
            },
        )?;

        let total = self.aggregator.push(self.key.clone(), capture);
        let available = self.aggregator.is_available(&self.key);
        if let Some(partition) = self.aggregator.partition(&self.key) {
            let record = Record::Partition {
                session: &self.key.session,
                note: &self.note.name,
                captures: total,
                threshold: partition.threshold,
                high_quality: partition.high_quality.iter().map(|c| c.strike_id).collect(),
                available,
            };
            output::write_record(out, &record)?;
        }
        Ok(())
    }

    /// Saves envelope maxima and drops the listeners.
    pub fn finish(&mut self, store: &mut dyn EnvelopeStore) -> Result<usize> {
        let saved = self.ctx.persist_envelopes(store)?;
        if let Some((strikes, captures)) = self.subscriptions.take() {
            strikes.unsubscribe();
            captures.unsubscribe();
        }
        self.ctx.detach_engine();
        Ok(saved)
    }

    pub fn captures(&self) -> usize {
        self.aggregator.len(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SyntheticPiano;
    use harmonic_core::engine::SpectralEngine;
    use harmonic_core::envelope_store::MemoryEnvelopeStore;
    use harmonic_core::notes::note_by_name;

    #[test]
    fn synthetic_strikes_become_captures() {
        let config = CoreConfig::default();
        let note = note_by_name("A4").unwrap();
        let mut store = MemoryEnvelopeStore::new();
        let mut probe = Probe::new(config.clone(), note, "test");
        probe.attach(Box::new(SpectralEngine::new(&config, config.max_harmonics)), &store);

        let mut piano = SyntheticPiano::new(note.frequency, 0.0004, config.engine.sample_rate, 8);
        let mut out = Vec::new();
        while piano.elapsed() < 9.0 {
            let frame = piano.next_frame(config.engine.frame_size);
            probe.tick(&frame, &mut out).unwrap();
        }
        assert!(probe.captures() >= 2, "captures: {}", probe.captures());

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let capture = lines.iter().find(|v| v["record"] == "capture").unwrap();
        let h2 = &capture["harmonics"][1];
        assert_eq!(h2["harmonic"], 2);
        assert!((h2["ratio"].as_f64().unwrap() - 2.0).abs() < 0.02);
        assert!(lines.iter().any(|v| v["record"] == "partition"));

        assert_eq!(probe.finish(&mut store).unwrap(), config.max_harmonics);
        assert!(store.load(0).is_some());
    }
}
