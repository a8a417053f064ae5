//! # Audio Capture Module
//!
//! Real-time microphone input through CPAL. The stream callback accumulates
//! samples and ships fixed-size frames to the processing thread over a
//! bounded channel; frames are dropped rather than blocking the audio thread.

use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::config::SpectralEngineConfig;
use crate::{Error, Result};

/// Starts capture from the default input device.
///
/// Returns the live stream (capture stops when it is dropped) and the sample
/// rate actually negotiated with the device.
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    config: &SpectralEngineConfig,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".into()))?;

    let device_name = device.name().map_err(|e| Error::Audio(e.to_string()))?;
    log::info!("[AUDIO-THREAD] Using input device: {}", device_name);

    let configs = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, config.sample_rate)
        .ok_or_else(|| Error::Audio("no mono f32 input format found".into()))?;

    let rate = config.sample_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let stream_config: cpal::StreamConfig = supported_config
        .with_sample_rate(cpal::SampleRate(rate))
        .into();
    if rate != config.sample_rate {
        log::warn!(
            "[AUDIO-THREAD] Requested {} Hz, device runs at {} Hz",
            config.sample_rate,
            rate
        );
    }

    let frame_size = config.frame_size;
    let mut audio_buffer = Vec::with_capacity(frame_size * 2);
    let err_fn = |err| log::error!("[AUDIO-THREAD] Stream error: {}", err);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                audio_buffer.extend_from_slice(data);
                while audio_buffer.len() >= frame_size {
                    let frame = audio_buffer[..frame_size].to_vec();
                    if sender.try_send(frame).is_err() {
                        log::trace!("[AUDIO-THREAD] Frame dropped, consumer is behind");
                    }
                    audio_buffer.drain(..frame_size);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    log::info!("[AUDIO-THREAD] Capturing at {} Hz, {} samples per frame", rate, frame_size);

    Ok((stream, rate))
}

/// The mono `f32` configuration whose rate range lies closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            }
        })
}
