//! Fake decoding tracks for supplier and proxy tests.

use std::sync::{Arc, Mutex};

use crate::error::{PlayerError, Result};
use crate::media_format::{
    ByteOrder, CodecInfo, EncodedAudioFormat, EncodedVideoFormat, PixelFormat, RawAudioFormat,
    RawVideoFormat, SampleFormat,
};
use crate::supplier::media_track::{AudioDecodingTrack, FrameHeader, VideoDecodingTrack};

/// Shared observation log for fake tracks.
#[derive(Default)]
pub struct TrackLog {
    /// (start, end) frame ranges produced by decode calls.
    pub decoded_ranges: Vec<(i64, i64)>,
    /// Frames the cursor was seeked to.
    pub seeks: Vec<i64>,
}

/// In-memory audio track: mono i16 samples, one decode call returns at most
/// `chunk_frames` frames.
pub struct FakeAudioTrack {
    format: RawAudioFormat,
    samples: Vec<i16>,
    cursor: i64,
    chunk_frames: i64,
    keyframes: Vec<i64>,
    seek_lands_at: Option<i64>,
    pub log: Arc<Mutex<TrackLog>>,
}

impl FakeAudioTrack {
    pub fn new(samples: Vec<i16>, frame_rate: f64, chunk_frames: i64) -> FakeAudioTrack {
        FakeAudioTrack {
            format: RawAudioFormat {
                sample_format: SampleFormat::I16,
                byte_order: ByteOrder::host(),
                frame_rate,
                channel_count: 1,
                buffer_size: chunk_frames as usize * 2,
            },
            samples,
            cursor: 0,
            chunk_frames,
            keyframes: Vec::new(),
            seek_lands_at: None,
            log: Arc::new(Mutex::new(TrackLog::default())),
        }
    }

    /// Restricts seekable positions to the given keyframes.
    pub fn with_keyframes(mut self, keyframes: Vec<i64>) -> FakeAudioTrack {
        self.keyframes = keyframes;
        self
    }

    /// Makes every seek land at a fixed frame, emulating a misbehaving
    /// container.
    pub fn with_seek_landing_at(mut self, frame: i64) -> FakeAudioTrack {
        self.seek_lands_at = Some(frame);
        self
    }

    fn keyframe_before(&self, frame: i64) -> i64 {
        if self.keyframes.is_empty() {
            return frame;
        }
        *self
            .keyframes
            .iter()
            .filter(|key| **key <= frame)
            .last()
            .unwrap_or(&self.keyframes[0])
    }
}

impl AudioDecodingTrack for FakeAudioTrack {
    fn decoded_format(&mut self, proposed: &RawAudioFormat) -> Result<RawAudioFormat> {
        let mut format = self.format;
        format.buffer_size = proposed.buffer_size.max(self.format.buffer_size);
        self.format = format;
        Ok(format)
    }

    fn encoded_format(&self) -> EncodedAudioFormat {
        EncodedAudioFormat {
            codec: "fake".to_string(),
            frame_rate: self.format.frame_rate,
            channel_count: 1,
            bit_rate: 0,
        }
    }

    fn codec_info(&self) -> CodecInfo {
        CodecInfo {
            pretty_name: "Fake PCM".to_string(),
            short_name: "fake".to_string(),
        }
    }

    fn count_frames(&self) -> i64 {
        self.samples.len() as i64
    }

    fn current_frame(&self) -> i64 {
        self.cursor
    }

    fn duration(&self) -> i64 {
        (self.samples.len() as f64 * 1_000_000.0 / self.format.frame_rate) as i64
    }

    fn find_key_frame_backward(&self, frame: &mut i64) -> Result<()> {
        if let Some(landing) = self.seek_lands_at {
            *frame = landing;
            return Ok(());
        }
        *frame = self.keyframe_before(*frame);
        Ok(())
    }

    fn seek_to_frame(&mut self, frame: &mut i64) -> Result<()> {
        if let Some(landing) = self.seek_lands_at {
            *frame = landing;
        } else {
            *frame = self.keyframe_before(*frame);
        }
        self.cursor = *frame;
        self.log.lock().unwrap().seeks.push(*frame);
        Ok(())
    }

    fn read_frames(&mut self, buffer: &mut [u8]) -> Result<i64> {
        let capacity = (buffer.len() / 2) as i64;
        let remaining = self.samples.len() as i64 - self.cursor;
        let frames = capacity.min(self.chunk_frames).min(remaining.max(0));
        if frames == 0 {
            return Err(PlayerError::EndOfStream);
        }
        for i in 0..frames as usize {
            let sample = self.samples[(self.cursor + i as i64) as usize];
            buffer[i * 2..i * 2 + 2].copy_from_slice(&sample.to_ne_bytes());
        }
        self.log
            .lock()
            .unwrap()
            .decoded_ranges
            .push((self.cursor, self.cursor + frames));
        self.cursor += frames;
        Ok(frames)
    }
}

/// Fake video track; every decoded frame is filled with its frame index
/// (low byte), so tests can identify which frame landed in a buffer.
pub struct FakeVideoTrack {
    encoded: EncodedVideoFormat,
    decoded: RawVideoFormat,
    count_frames: i64,
    cursor: i64,
    keyframes: Vec<i64>,
    /// Pixel format the "codec" forces during negotiation, if any.
    pub forced_pixel_format: Option<PixelFormat>,
    pub log: Arc<Mutex<TrackLog>>,
}

impl FakeVideoTrack {
    pub fn new(count_frames: i64, keyframes: Vec<i64>) -> FakeVideoTrack {
        let width = 8u32;
        let height = 2u32;
        FakeVideoTrack {
            encoded: EncodedVideoFormat {
                codec: "fake".to_string(),
                display_width: width,
                display_height: height,
                field_rate: 25.0,
                pixel_format: PixelFormat::Rgb32,
                bit_rate: 0,
            },
            decoded: RawVideoFormat {
                pixel_format: PixelFormat::Rgb32,
                display_width: width,
                display_height: height,
                bytes_per_row: width * 4,
                field_rate: 25.0,
                pixel_width_aspect: 1,
                pixel_height_aspect: 1,
            },
            count_frames,
            cursor: 0,
            keyframes,
            forced_pixel_format: None,
            log: Arc::new(Mutex::new(TrackLog::default())),
        }
    }

    fn keyframe_before(&self, frame: i64) -> i64 {
        *self
            .keyframes
            .iter()
            .filter(|key| **key <= frame)
            .last()
            .unwrap_or(&0)
    }
}

impl VideoDecodingTrack for FakeVideoTrack {
    fn encoded_format(&self) -> EncodedVideoFormat {
        self.encoded.clone()
    }

    fn codec_info(&self) -> CodecInfo {
        CodecInfo {
            pretty_name: "Fake Video".to_string(),
            short_name: "fake".to_string(),
        }
    }

    fn decoded_format(&mut self, proposed: &RawVideoFormat) -> Result<RawVideoFormat> {
        let mut format = *proposed;
        if let Some(forced) = self.forced_pixel_format {
            format.pixel_format = forced;
        }
        self.decoded = format;
        Ok(format)
    }

    fn count_frames(&self) -> i64 {
        self.count_frames
    }

    fn current_frame(&self) -> i64 {
        self.cursor
    }

    fn current_time(&self) -> i64 {
        (self.cursor as f64 * 1_000_000.0 / self.encoded.field_rate) as i64
    }

    fn duration(&self) -> i64 {
        (self.count_frames as f64 * 1_000_000.0 / self.encoded.field_rate) as i64
    }

    fn find_key_frame_backward(&self, frame: &mut i64) -> Result<()> {
        *frame = self.keyframe_before(*frame);
        Ok(())
    }

    fn seek_to_frame(&mut self, frame: &mut i64) -> Result<()> {
        *frame = self.keyframe_before(*frame);
        self.cursor = *frame;
        self.log.lock().unwrap().seeks.push(*frame);
        Ok(())
    }

    fn seek_to_time(&mut self, time: &mut i64) -> Result<()> {
        let mut frame = (*time as f64 * self.encoded.field_rate / 1_000_000.0) as i64;
        self.seek_to_frame(&mut frame)?;
        *time = self.current_time();
        Ok(())
    }

    fn read_frame(&mut self, buffer: &mut [u8]) -> Result<FrameHeader> {
        if self.cursor >= self.count_frames {
            return Err(PlayerError::EndOfStream);
        }
        let length = self.decoded.frame_size().min(buffer.len());
        buffer[..length].fill((self.cursor & 0xff) as u8);
        let header = FrameHeader {
            start_time: self.current_time(),
        };
        self.log
            .lock()
            .unwrap()
            .decoded_ranges
            .push((self.cursor, self.cursor + 1));
        self.cursor += 1;
        Ok(header)
    }
}
