//! Linear-interpolation resampler with a signed time scale.

use log::debug;

use crate::audio::audio_reader::{byte_length, read_silence, reverse_frames, AudioReader};
use crate::audio::sample_buffer::{read_sample, write_sample};
use crate::error::{PlayerError, Result};
use crate::media_format::RawAudioFormat;

/// Converts a source stream at its own frame rate to an output frame rate
/// scaled by a time-scale factor. Each output frame interpolates between the
/// two neighbouring source frames; a negative effective playback direction is
/// realized by the caller through `set_in_offset`/`set_time_scale` plus frame
/// reversal of the produced block.
pub struct AudioResampler {
    format: RawAudioFormat,
    out_offset: i64,
    source: Option<Box<dyn AudioReader>>,
    time_scale: f64,
    in_offset: i64,
}

impl AudioResampler {
    pub fn new() -> AudioResampler {
        AudioResampler {
            format: RawAudioFormat {
                sample_format: crate::media_format::SampleFormat::F32,
                byte_order: crate::media_format::ByteOrder::host(),
                frame_rate: 0.0,
                channel_count: 0,
                buffer_size: 0,
            },
            out_offset: 0,
            source: None,
            time_scale: 1.0,
            in_offset: 0,
        }
    }

    pub fn with_source(source: Box<dyn AudioReader>, frame_rate: f64) -> AudioResampler {
        let mut resampler = AudioResampler::new();
        resampler.set_source(source);
        resampler.format.frame_rate = frame_rate;
        resampler
    }

    /// Adopts a new source; the output frame rate is kept, everything else
    /// follows the source format.
    pub fn set_source(&mut self, source: Box<dyn AudioReader>) {
        let frame_rate = self.format.frame_rate;
        self.format = *source.format();
        if frame_rate != 0.0 {
            self.format.frame_rate = frame_rate;
        }
        self.source = Some(source);
    }

    pub fn take_source(&mut self) -> Option<Box<dyn AudioReader>> {
        self.source.take()
    }

    pub fn set_format(&mut self, format: RawAudioFormat) {
        self.format = format;
    }

    pub fn set_frame_rate(&mut self, frame_rate: f64) {
        self.format.frame_rate = frame_rate;
    }

    pub fn frame_rate(&self) -> f64 {
        self.format.frame_rate
    }

    pub fn set_time_scale(&mut self, time_scale: f64) {
        self.time_scale = time_scale;
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn set_in_offset(&mut self, offset: i64) {
        self.in_offset = offset;
    }

    pub fn in_offset(&self) -> i64 {
        self.in_offset
    }

    pub fn convert_from_source(&self, pos: i64) -> i64 {
        let in_rate = self
            .source
            .as_ref()
            .map(|source| source.format().frame_rate)
            .unwrap_or(self.format.frame_rate);
        let out_rate = self.format.frame_rate;
        ((pos - self.in_offset) as f64 * out_rate / in_rate / self.time_scale) as i64
            - self.out_offset
    }

    pub fn convert_to_source(&self, pos: i64) -> i64 {
        let in_rate = self
            .source
            .as_ref()
            .map(|source| source.format().frame_rate)
            .unwrap_or(self.format.frame_rate);
        let out_rate = self.format.frame_rate;
        ((pos + self.out_offset) as f64 * in_rate / out_rate * self.time_scale) as i64
            + self.in_offset
    }
}

impl AudioReader for AudioResampler {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        self.source
            .as_ref()
            .map(|source| source.initial_latency())
            .unwrap_or(0)
    }

    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> Result<()> {
        if self.source.is_none() {
            return Err(PlayerError::NoInit);
        }

        let mut source_pos = self.convert_to_source(pos);
        let mut source_frames = self.convert_to_source(pos + frames) - source_pos;

        // Unity conversion passes straight through, bit-exact.
        if source_frames == frames {
            return self
                .source
                .as_mut()
                .unwrap()
                .read(buffer, source_pos, source_frames);
        }
        if source_frames == 0 {
            read_silence(&self.format, buffer, frames);
            return Ok(());
        }

        let backward = source_frames < 0;
        if backward {
            source_frames = -source_frames;
            source_pos -= source_frames;
        }

        // Two extra frames so every output frame has both neighbours.
        source_frames += 2;
        let source_format = *self.source.as_ref().unwrap().format();
        let mut in_buffer = vec![0u8; byte_length(&source_format, source_frames)];
        self.source
            .as_mut()
            .unwrap()
            .read(&mut in_buffer, source_pos, source_frames)?;

        let in_frame_rate = source_format.frame_rate;
        let out_frame_rate = self.format.frame_rate / self.time_scale;
        debug!(
            "AudioResampler::read() - {} -> {} Hz, {} frames",
            in_frame_rate, out_frame_rate, frames
        );

        let sample_format = self.format.sample_format;
        let sample_size = sample_format.sample_size();
        let channel_count = self.format.channel_count as usize;
        for out_frame in 0..frames {
            let out_time = out_frame as f64 / out_frame_rate;
            let in_frame = (out_time * in_frame_rate) as i64;
            let in_time1 = in_frame as f64 / in_frame_rate;
            let in_time2 = (in_frame + 1) as f64 / in_frame_rate;
            let time_diff1 = out_time - in_time1;
            let time_diff2 = in_time2 - out_time;
            let time_diff = time_diff1 + time_diff2;
            let in_index1 = in_frame as usize * channel_count;
            let in_index2 = in_index1 + channel_count;
            let out_index = out_frame as usize * channel_count;
            for channel in 0..channel_count {
                let sample1 = read_sample(
                    sample_format,
                    &in_buffer[(in_index1 + channel) * sample_size..],
                );
                let sample2 = read_sample(
                    sample_format,
                    &in_buffer[(in_index2 + channel) * sample_size..],
                );
                write_sample(
                    sample_format,
                    &mut buffer[(out_index + channel) * sample_size..],
                    (time_diff2 * sample1 + time_diff1 * sample2) / time_diff,
                );
            }
        }

        if backward {
            reverse_frames(&self.format, buffer, frames);
        }
        Ok(())
    }

    fn set_out_offset(&mut self, offset: i64) {
        self.out_offset = offset;
    }

    fn out_offset(&self) -> i64 {
        self.out_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::MemoryReader;
    use crate::media_format::{ByteOrder, SampleFormat};

    fn mono_i16(frame_rate: f64, samples: &[i16]) -> MemoryReader {
        let mut bytes = Vec::new();
        for sample in samples {
            bytes.extend_from_slice(&sample.to_ne_bytes());
        }
        MemoryReader::new(
            RawAudioFormat {
                sample_format: SampleFormat::I16,
                byte_order: ByteOrder::host(),
                frame_rate,
                channel_count: 1,
                buffer_size: 4096,
            },
            bytes,
        )
    }

    fn read_i16(resampler: &mut AudioResampler, pos: i64, frames: i64) -> Vec<i16> {
        let mut buffer = vec![0u8; byte_length(resampler.format(), frames)];
        resampler.read(&mut buffer, pos, frames).unwrap();
        buffer
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn one_to_two_upsample_interpolates_linearly() {
        let source = mono_i16(100.0, &[0, 100, 200]);
        let mut resampler = AudioResampler::with_source(Box::new(source), 200.0);
        assert_eq!(read_i16(&mut resampler, 0, 5), vec![0, 50, 100, 150, 200]);
    }

    #[test]
    fn unity_rate_is_bit_exact() {
        let samples = [3i16, -7, 10007, -32767, 32767, 0];
        let source = mono_i16(44100.0, &samples);
        let mut direct = mono_i16(44100.0, &samples);
        let mut resampler = AudioResampler::with_source(Box::new(source), 44100.0);

        let mut expected = vec![0u8; byte_length(resampler.format(), 6)];
        direct.read(&mut expected, 0, 6).unwrap();
        let mut got = vec![0u8; expected.len()];
        resampler.read(&mut got, 0, 6).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn reads_silence_when_no_source_frames_map() {
        // Three output frames at 1000 Hz span no whole source frame at 1 Hz.
        let source = mono_i16(1.0, &[1000]);
        let mut resampler = AudioResampler::with_source(Box::new(source), 1000.0);
        assert_eq!(read_i16(&mut resampler, 0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn time_scale_converts_positions() {
        let source = mono_i16(100.0, &[0; 16]);
        let mut resampler = AudioResampler::with_source(Box::new(source), 100.0);
        resampler.set_time_scale(2.0);
        assert_eq!(resampler.convert_to_source(4), 8);
        assert_eq!(resampler.convert_from_source(8), 4);
        resampler.set_in_offset(3);
        assert_eq!(resampler.convert_to_source(4), 11);
        assert_eq!(resampler.convert_from_source(11), 4);
    }

    #[test]
    fn source_error_propagates() {
        use crate::audio::test_support::FailingReader;
        let format = RawAudioFormat {
            sample_format: SampleFormat::I16,
            byte_order: ByteOrder::host(),
            frame_rate: 100.0,
            channel_count: 1,
            buffer_size: 4096,
        };
        let mut resampler =
            AudioResampler::with_source(Box::new(FailingReader::new(format)), 200.0);
        let mut buffer = vec![0u8; 2 * 4];
        assert!(resampler.read(&mut buffer, 0, 4).is_err());
    }
}
