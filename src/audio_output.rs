//! cpal-backed audio node: the real-time thread pulling the audio playhead.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, warn};

use crate::controller::Controller;
use crate::error::{PlayerError, Result};
use crate::media_format::{ByteOrder, RawAudioFormat, SampleFormat};

/// Buffers between stats notifications to observers.
const STATS_NOTIFY_INTERVAL: u64 = 64;

/// Owns the output stream; dropping it stops playback output.
pub struct AudioOutput {
    _stream: cpal::Stream,
    format: RawAudioFormat,
}

impl AudioOutput {
    /// Opens the default output device, negotiates the node format with the
    /// audio playhead and starts the stream.
    pub fn start(controller: &Arc<Controller>) -> Result<AudioOutput> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlayerError::NoHandler)?;
        let default_config = device
            .default_output_config()
            .map_err(|err| PlayerError::Decode(err.to_string()))?;
        let sample_format = default_config.sample_format();
        let config: cpal::StreamConfig = default_config.into();

        let node_format = RawAudioFormat {
            sample_format: SampleFormat::F32,
            byte_order: ByteOrder::host(),
            frame_rate: config.sample_rate.0 as f64,
            channel_count: config.channels as u32,
            buffer_size: 16384,
        };
        debug!(
            "AudioOutput::start() - {} Hz, {} channels, {:?}",
            config.sample_rate.0, config.channels, sample_format
        );
        controller.audio_supplier().set_format(node_format);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, controller, node_format, |sample| {
                    sample
                })?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, controller, node_format, |sample| {
                    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                })?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, controller, node_format, |sample| {
                    ((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32) as u16
                })?
            }
            other => {
                warn!("AudioOutput::start() - unsupported sample format {:?}", other);
                return Err(PlayerError::NotSupported);
            }
        };

        stream
            .play()
            .map_err(|err| PlayerError::Decode(err.to_string()))?;

        Ok(AudioOutput {
            _stream: stream,
            format: node_format,
        })
    }

    pub fn format(&self) -> RawAudioFormat {
        self.format
    }

    fn build_stream<T: cpal::SizedSample + Send + 'static>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        controller: &Arc<Controller>,
        format: RawAudioFormat,
        convert: impl Fn(f32) -> T + Send + 'static,
    ) -> Result<cpal::Stream> {
        let controller = controller.clone();
        let proxy = controller.audio_supplier();
        let channels = format.channel_count as usize;
        let mut scratch: Vec<u8> = Vec::new();
        // Wall-clock performance time advances by exactly the frames
        // produced; consecutive callbacks cover adjacent intervals.
        let mut frames_produced: i64 = 0;
        let mut buffers_produced: u64 = 0;

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                    let frames = (data.len() / channels) as i64;
                    let start_time = format.time_for_frame(frames_produced);
                    let end_time = format.time_for_frame(frames_produced + frames);
                    scratch.resize(data.len() * 4, 0);

                    if proxy
                        .get_frames(&mut scratch, frames, start_time, end_time)
                        .is_err()
                    {
                        scratch.fill(0);
                    }

                    for (out, bytes) in data.iter_mut().zip(scratch.chunks_exact(4)) {
                        let sample =
                            f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        *out = convert(sample);
                    }

                    frames_produced += frames;
                    buffers_produced += 1;
                    controller.dispatch_player_events();
                    if buffers_produced % STATS_NOTIFY_INTERVAL == 0 {
                        controller.notify_audio_stats_changed();
                    }
                },
                |err| error!("audio stream error: {}", err),
                None,
            )
            .map_err(|err| PlayerError::Decode(err.to_string()))?;
        Ok(stream)
    }
}
