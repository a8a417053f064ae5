//! The dedicated audio thread.
//!
//! The CPAL stream is created, kept alive and stopped on its own thread;
//! frames reach the measurement thread over a channel.

use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use cpal::traits::StreamTrait;
use crossbeam_channel::Sender;
use harmonic_core::audio;
use harmonic_core::config::SpectralEngineConfig;

pub struct AudioWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    /// Starts capture and waits until the device is running. Returns the
    /// worker and the negotiated sample rate.
    pub fn spawn(config: SpectralEngineConfig, frames: Sender<Vec<f32>>) -> Result<(Self, u32)> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) =
            crossbeam_channel::bounded::<std::result::Result<u32, String>>(1);

        let thread_handle = thread::Builder::new()
            .name("audio".into())
            .spawn(move || {
                log::info!("[AUDIO-THREAD] Starting audio thread...");
                let (stream, sample_rate) = match audio::start_audio_capture(frames, &config) {
                    Ok(tuple) => tuple,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));

                // Block until asked to stop; a closed channel means the owner is gone.
                let _ = shutdown_rx.recv();
                log::info!("[AUDIO-THREAD] Stopping stream and exiting...");
                if let Err(e) = stream.pause() {
                    log::warn!("[AUDIO-THREAD] Error pausing stream: {}", e);
                }
                log::info!("[AUDIO-THREAD] Audio thread finished");
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio thread exited before the device was ready"))?
            .map_err(|e| anyhow!("failed to start audio capture: {}", e))?;

        Ok((
            Self {
                shutdown_tx,
                thread_handle: Some(thread_handle),
            },
            sample_rate,
        ))
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[MAIN] Audio thread panicked");
            }
        }
    }
}
