//! Audio playhead: renders playing intervals through the reader chain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};

use crate::audio::adapter::AudioAdapter;
use crate::audio::audio_reader::{read_silence, reverse_frames, AudioReader};
use crate::audio::resampler::AudioResampler;
use crate::audio::volume_converter::{AudioVolumeConverter, SharedVolume};
use crate::error::{PlayerError, Result};
use crate::media_format::RawAudioFormat;
use crate::playback_manager::{collect_playing_intervals, PlaybackManager};
use crate::supplier::audio_track::AudioTrackSupplier;

/// How long the audio thread may wait for the playback manager before it
/// gives up and plays silence. The node must never stall.
const MANAGER_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

struct ProxyState {
    /// `track supplier -> adapter -> volume -> resampler`; `None` while no
    /// track is selected.
    resampler: Option<AudioResampler>,
    format: RawAudioFormat,
    video_frame_rate: f64,
}

/// Feeds the audio node. `get_frames` slices the requested wall-clock span
/// into playing intervals, resamples each at its own rate and direction, and
/// absorbs every upstream error as silence: the output buffer is always
/// written in full.
pub struct ProxyAudioSupplier {
    playback_manager: Arc<PlaybackManager>,
    volume: Arc<SharedVolume>,
    state: Mutex<ProxyState>,
}

impl ProxyAudioSupplier {
    pub fn new(playback_manager: Arc<PlaybackManager>) -> Arc<ProxyAudioSupplier> {
        Arc::new(ProxyAudioSupplier {
            playback_manager,
            volume: SharedVolume::new(1.0),
            state: Mutex::new(ProxyState {
                resampler: None,
                format: RawAudioFormat {
                    sample_format: crate::media_format::SampleFormat::F32,
                    byte_order: crate::media_format::ByteOrder::host(),
                    frame_rate: 0.0,
                    channel_count: 0,
                    buffer_size: 0,
                },
                video_frame_rate: 25.0,
            }),
        })
    }

    pub fn initial_latency(&self) -> i64 {
        let state = self.state.lock().unwrap();
        state
            .resampler
            .as_ref()
            .map(|resampler| resampler.initial_latency())
            .unwrap_or(0)
    }

    /// Fills `buffer` with exactly `frame_count` frames covering the
    /// performance-time interval `[start_time, end_time)`.
    pub fn get_frames(
        &self,
        buffer: &mut [u8],
        frame_count: i64,
        start_time: i64,
        end_time: i64,
    ) -> Result<()> {
        // Build the list of playing intervals composing the requested
        // interval. A lock timeout leaves the list empty and the whole
        // buffer silent; the node keeps running.
        let mut intervals = Vec::new();
        let mut collection_failed = false;
        match self
            .playback_manager
            .lock_with_timeout(MANAGER_LOCK_TIMEOUT)
        {
            Some(mut lock) => {
                match collect_playing_intervals(&mut lock, start_time, end_time) {
                    Some(collected) => intervals = collected,
                    None => collection_failed = true,
                }
                lock.set_current_audio_time(end_time);
            }
            None => {
                warn!("ProxyAudioSupplier::get_frames() - locking the playback manager timed out");
                collection_failed = true;
            }
        }

        let mut state = self.state.lock().unwrap();
        let format = state.format;
        if state.resampler.is_none() {
            return Err(PlayerError::NoInit);
        }

        if collection_failed {
            read_silence(&format, buffer, frame_count);
            return Ok(());
        }

        let frame_size = format.frame_size();
        let mut buffer_offset = 0usize;
        for interval in intervals {
            let remaining = frame_count - (buffer_offset / frame_size) as i64;
            let frames_to_read = (format.frame_for_time(interval.end_time)
                - format.frame_for_time(interval.start_time))
            .min(remaining);
            let out =
                &mut buffer[buffer_offset..buffer_offset + frames_to_read as usize * frame_size];

            debug!(
                "get_frames() - interval [{}, {}]: [{}, {}], speed {}, {} frames",
                interval.start_time,
                interval.end_time,
                interval.x_start_time,
                interval.x_end_time,
                interval.speed,
                frames_to_read
            );

            if interval.speed == 0.0 {
                read_silence(&format, out, frames_to_read);
            } else {
                let resampler = state.resampler.as_mut().unwrap();
                resampler.set_in_offset(format.frame_for_time(interval.x_start_time));
                resampler.set_time_scale(interval.speed.abs());
                match resampler.read(out, 0, frames_to_read) {
                    Ok(()) => {
                        if interval.speed < 0.0 {
                            reverse_frames(&format, out, frames_to_read);
                        }
                    }
                    Err(error) => {
                        // Silence for this interval only; the pipeline must
                        // not stall the whole buffer over one bad read.
                        debug!("get_frames() - reader failed: {}", error);
                        read_silence(&format, out, frames_to_read);
                    }
                }
            }
            buffer_offset += frames_to_read as usize * frame_size;
        }

        // Rounding may leave a tail frame unwritten; pad it.
        let total = frame_count as usize * frame_size;
        if buffer_offset < total {
            let missing = (frame_count - (buffer_offset / frame_size) as i64).max(0);
            read_silence(&format, &mut buffer[buffer_offset..], missing);
        }

        Ok(())
    }

    /// The format the node negotiated; the whole chain converts to it.
    pub fn set_format(&self, format: RawAudioFormat) {
        let mut state = self.state.lock().unwrap();
        state.format = format;
        if let Some(resampler) = state.resampler.as_mut() {
            resampler.set_format(format);
        }
    }

    pub fn format(&self) -> RawAudioFormat {
        self.state.lock().unwrap().format
    }

    /// Publishes a new track supplier, rebuilding the chain
    /// `supplier -> adapter -> volume -> resampler` atomically. The video
    /// frame rate is kept for audio-frame <-> video-frame conversions.
    pub fn set_supplier(
        &self,
        supplier: Option<Box<dyn AudioTrackSupplier>>,
        video_frame_rate: f64,
    ) {
        let mut state = self.state.lock().unwrap();
        state.video_frame_rate = video_frame_rate;
        match supplier {
            Some(supplier) => {
                let reader: Box<dyn AudioReader> = supplier;
                let adapter = AudioAdapter::new(reader, state.format);
                let volume = AudioVolumeConverter::new(Box::new(adapter), self.volume.clone());
                let mut resampler = AudioResampler::new();
                resampler.set_source(Box::new(volume));
                resampler.set_format(state.format);
                state.resampler = Some(resampler);
            }
            None => state.resampler = None,
        }
    }

    pub fn has_supplier(&self) -> bool {
        self.state.lock().unwrap().resampler.is_some()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn video_frame_rate(&self) -> f64 {
        self.state.lock().unwrap().video_frame_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_format::{ByteOrder, SampleFormat};
    use crate::supplier::audio_track::MediaTrackAudioSupplier;
    use crate::supplier::test_support::FakeAudioTrack;

    fn node_format(frame_rate: f64) -> RawAudioFormat {
        RawAudioFormat {
            sample_format: SampleFormat::I16,
            byte_order: ByteOrder::host(),
            frame_rate,
            channel_count: 1,
            buffer_size: 4096,
        }
    }

    fn proxy_with_track(
        samples: Vec<i16>,
        frame_rate: f64,
    ) -> (Arc<PlaybackManager>, Arc<ProxyAudioSupplier>) {
        let manager = PlaybackManager::new();
        manager.init(25.0, (samples.len() as f64 / frame_rate * 1e6) as i64);
        let proxy = ProxyAudioSupplier::new(manager.clone());
        proxy.set_format(node_format(frame_rate));
        let track = FakeAudioTrack::new(samples, frame_rate, 512);
        let supplier = MediaTrackAudioSupplier::new(Box::new(track), 0).unwrap();
        proxy.set_supplier(Some(Box::new(supplier)), 25.0);
        (manager, proxy)
    }

    fn frames_of(buffer: &[u8]) -> Vec<i16> {
        buffer
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn stopped_playback_renders_silence() {
        let samples: Vec<i16> = (0..48000).map(|i| (i % 1000) as i16).collect();
        let (_manager, proxy) = proxy_with_track(samples, 48000.0);
        let mut buffer = vec![0xffu8; 480 * 2];
        proxy.get_frames(&mut buffer, 480, 0, 10_000).unwrap();
        assert!(frames_of(&buffer).iter().all(|&value| value == 0));
    }

    #[test]
    fn playing_renders_track_samples() {
        let samples: Vec<i16> = (0..48000).map(|i| (i % 1000) as i16).collect();
        let (manager, proxy) = proxy_with_track(samples, 48000.0);
        manager.start_playing();
        // 480 frames = 10 ms at 48 kHz.
        let mut buffer = vec![0u8; 480 * 2];
        proxy.get_frames(&mut buffer, 480, 0, 10_000).unwrap();
        let values = frames_of(&buffer);
        assert_eq!(&values[..5], &[0, 1, 2, 3, 4]);

        // The next buffer continues seamlessly.
        proxy.get_frames(&mut buffer, 480, 10_000, 20_000).unwrap();
        let values = frames_of(&buffer);
        assert_eq!(values[0], 480);
    }

    #[test]
    fn output_is_total_even_when_the_track_fails() {
        // A track whose every seek lands far forward produces silence, but
        // get_frames still succeeds and fills the buffer.
        let (manager, proxy) = {
            let manager = PlaybackManager::new();
            manager.init(25.0, 10_000_000);
            let proxy = ProxyAudioSupplier::new(manager.clone());
            proxy.set_format(node_format(48000.0));
            let track = FakeAudioTrack::new((0..48000).map(|i| i as i16).collect(), 48000.0, 512)
                .with_seek_landing_at(40_000);
            let supplier = MediaTrackAudioSupplier::new(Box::new(track), 0).unwrap();
            proxy.set_supplier(Some(Box::new(supplier)), 25.0);
            (manager, proxy)
        };
        manager.start_playing();
        // Seek playback position to 1 s so reads miss the decode cursor.
        manager.set_current_frame(25);
        let mut buffer = vec![0xffu8; 480 * 2];
        proxy.get_frames(&mut buffer, 480, 0, 10_000).unwrap();
        assert_eq!(frames_of(&buffer).len(), 480);
    }

    #[test]
    fn missing_supplier_is_an_error() {
        let manager = PlaybackManager::new();
        let proxy = ProxyAudioSupplier::new(manager);
        let mut buffer = vec![0u8; 64];
        assert!(proxy.get_frames(&mut buffer, 32, 0, 1000).is_err());
    }

    #[test]
    fn volume_applies_through_the_chain() {
        let samples: Vec<i16> = vec![1000; 48000];
        let (manager, proxy) = proxy_with_track(samples, 48000.0);
        proxy.set_volume(0.5);
        manager.start_playing();
        let mut buffer = vec![0u8; 480 * 2];
        proxy.get_frames(&mut buffer, 480, 0, 10_000).unwrap();
        // The ramp from 1.0 reaches 0.5 by the end of the block.
        let values = frames_of(&buffer);
        assert_eq!(*values.last().unwrap(), 500);
    }
}
