//! # Harmonic Probe
//!
//! Headless front end of the measurement core.
//!
//! ## Architecture
//! - **Audio Thread**: owns the CPAL stream and forwards fixed-size frames
//! - **Main Thread**: owns the [`TunerContext`](harmonic_core::TunerContext),
//!   runs one engine tick per frame and prints JSON lines to stdout
//! - **Communication**: crossbeam channels, with `select!` for shutdown

mod audio_worker;
mod cli;
mod output;
mod session;
mod synth;

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use harmonic_core::CoreConfig;
use harmonic_core::engine::SpectralEngine;
use harmonic_core::envelope_store::{EnvelopeStore, JsonEnvelopeStore, MemoryEnvelopeStore};
use harmonic_core::notes::{self, Note};

use audio_worker::AudioWorker;
use cli::Cli;
use session::Probe;
use synth::SyntheticPiano;

/// Length of a synthetic run when `--seconds` is not given.
const DEFAULT_SYNTHETIC_SECONDS: u64 = 10;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config.validate()?;

    let note = notes::note_by_name(&cli.note)
        .ok_or_else(|| anyhow!("unknown note '{}'", cli.note))?;
    let mut store: Box<dyn EnvelopeStore> = match &cli.envelopes {
        Some(path) => Box::new(JsonEnvelopeStore::open(path)?),
        None => Box::new(MemoryEnvelopeStore::new()),
    };

    let mut probe = Probe::new(config.clone(), note, &cli.session);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if cli.synthetic {
        run_synthetic(&cli, &config, note, &mut probe, store.as_ref(), &mut out)?;
    } else {
        run_live(&cli, &config, &mut probe, store.as_ref(), &mut out)?;
    }

    let saved = probe.finish(store.as_mut())?;
    log::info!("[MAIN] Saved {} envelope maxima, {} captures this run", saved, probe.captures());
    out.flush()?;
    Ok(())
}

fn run_live(
    cli: &Cli,
    config: &CoreConfig,
    probe: &mut Probe,
    store: &dyn EnvelopeStore,
    out: &mut impl Write,
) -> Result<()> {
    let (frames_tx, frames_rx) = crossbeam_channel::bounded::<Vec<f32>>(16);
    let (worker, sample_rate) = AudioWorker::spawn(config.engine.clone(), frames_tx)?;

    let mut engine_config = config.clone();
    engine_config.engine.sample_rate = sample_rate;
    probe.attach(
        Box::new(SpectralEngine::new(&engine_config, config.max_harmonics)),
        store,
    );

    let deadline = match cli.seconds {
        Some(seconds) => crossbeam_channel::after(Duration::from_secs(seconds)),
        None => crossbeam_channel::never(),
    };
    loop {
        crossbeam_channel::select! {
            recv(frames_rx) -> msg => match msg {
                Ok(frame) => probe.tick(&frame, out)?,
                Err(_) => {
                    log::warn!("[MAIN] Audio channel closed");
                    break;
                }
            },
            recv(deadline) -> _ => {
                log::info!("[MAIN] Time limit reached");
                break;
            },
        }
    }

    drop(worker);
    Ok(())
}

fn run_synthetic(
    cli: &Cli,
    config: &CoreConfig,
    note: &Note,
    probe: &mut Probe,
    store: &dyn EnvelopeStore,
    out: &mut impl Write,
) -> Result<()> {
    let engine = &config.engine;
    probe.attach(Box::new(SpectralEngine::new(config, config.max_harmonics)), store);

    let mut piano = SyntheticPiano::new(
        note.frequency,
        cli.inharmonicity,
        engine.sample_rate,
        config.max_harmonics,
    );
    let seconds = cli.seconds.unwrap_or(DEFAULT_SYNTHETIC_SECONDS) as f32;
    while piano.elapsed() < seconds {
        let frame = piano.next_frame(engine.frame_size);
        probe.tick(&frame, out)?;
    }
    Ok(())
}
