//! Channel-count conversion reader.

use crate::audio::audio_reader::{byte_length, AudioReader};
use crate::error::Result;
use crate::media_format::{RawAudioFormat, SampleFormat};

/// Changes the channel count of a raw audio stream. Sample kind, byte order
/// and frame rate pass through unchanged: mono duplicates into stereo,
/// stereo averages into mono (widened so the sum cannot overflow), any other
/// pair copies the first `min(in, out)` channels and zeroes extra output
/// channels.
pub struct AudioChannelConverter {
    format: RawAudioFormat,
    out_offset: i64,
    source: Box<dyn AudioReader>,
}

impl AudioChannelConverter {
    pub fn new(source: Box<dyn AudioReader>, channel_count: u32) -> AudioChannelConverter {
        let mut format = *source.format();
        let in_frame_size = format.frame_size();
        format.channel_count = channel_count;
        if in_frame_size != 0 {
            format.buffer_size = format.buffer_size * format.frame_size() / in_frame_size;
        }
        AudioChannelConverter {
            format,
            out_offset: 0,
            source,
        }
    }

    pub fn source(&self) -> &dyn AudioReader {
        self.source.as_ref()
    }
}

macro_rules! convert_channels {
    ($sample:ty, $wide:ty, $mid:expr, $in_buffer:expr, $out_buffer:expr, $in_channels:expr,
     $out_channels:expr, $frames:expr) => {{
        let sample_size = std::mem::size_of::<$sample>();
        let read = |bytes: &[u8], index: usize| -> $sample {
            let mut raw = [0u8; std::mem::size_of::<$sample>()];
            raw.copy_from_slice(&bytes[index * sample_size..(index + 1) * sample_size]);
            <$sample>::from_ne_bytes(raw)
        };
        let write = |bytes: &mut [u8], index: usize, value: $sample| {
            bytes[index * sample_size..(index + 1) * sample_size]
                .copy_from_slice(&value.to_ne_bytes());
        };
        match ($in_channels, $out_channels) {
            (1, 2) => {
                for frame in 0..$frames {
                    let value = read($in_buffer, frame);
                    write($out_buffer, frame * 2, value);
                    write($out_buffer, frame * 2 + 1, value);
                }
            }
            (2, 1) => {
                for frame in 0..$frames {
                    let left = read($in_buffer, frame * 2) as $wide;
                    let right = read($in_buffer, frame * 2 + 1) as $wide;
                    write($out_buffer, frame, ((left + right) / 2 as $wide) as $sample);
                }
            }
            (in_channels, out_channels) => {
                let copied = in_channels.min(out_channels);
                for frame in 0..$frames {
                    for channel in 0..copied {
                        let value = read($in_buffer, frame * in_channels + channel);
                        write($out_buffer, frame * out_channels + channel, value);
                    }
                    for channel in copied..out_channels {
                        write($out_buffer, frame * out_channels + channel, $mid);
                    }
                }
            }
        }
    }};
}

impl AudioReader for AudioChannelConverter {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        self.source.initial_latency()
    }

    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> Result<()> {
        let pos = pos + self.out_offset;
        let source_format = *self.source.format();
        let in_channels = source_format.channel_count as usize;
        let out_channels = self.format.channel_count as usize;
        if in_channels == out_channels {
            return self.source.read(buffer, pos, frames);
        }

        let mut in_buffer = vec![0u8; byte_length(&source_format, frames)];
        self.source.read(&mut in_buffer, pos, frames)?;

        let frames = frames as usize;
        match self.format.sample_format {
            SampleFormat::F32 => convert_channels!(
                f32, f32, 0.0, &in_buffer, buffer, in_channels, out_channels, frames
            ),
            SampleFormat::I32 => convert_channels!(
                i32, i64, 0, &in_buffer, buffer, in_channels, out_channels, frames
            ),
            SampleFormat::I16 => convert_channels!(
                i16, i32, 0, &in_buffer, buffer, in_channels, out_channels, frames
            ),
            SampleFormat::U8 => convert_channels!(
                u8, u16, 128, &in_buffer, buffer, in_channels, out_channels, frames
            ),
            SampleFormat::I8 => convert_channels!(
                i8, i16, 0, &in_buffer, buffer, in_channels, out_channels, frames
            ),
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
    use crate::media_format::ByteOrder;

    fn i16_reader(channel_count: u32, samples: &[i16]) -> MemoryReader {
        let mut bytes = Vec::new();
        for sample in samples {
            bytes.extend_from_slice(&sample.to_ne_bytes());
        }
        MemoryReader::new(
            RawAudioFormat {
                sample_format: SampleFormat::I16,
                byte_order: ByteOrder::host(),
                frame_rate: 44100.0,
                channel_count,
                buffer_size: 4096,
            },
            bytes,
        )
    }

    fn read_i16(converter: &mut AudioChannelConverter, frames: i64) -> Vec<i16> {
        let mut buffer = vec![0u8; byte_length(converter.format(), frames)];
        converter.read(&mut buffer, 0, frames).unwrap();
        buffer
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn mono_duplicates_into_stereo() {
        let mut converter =
            AudioChannelConverter::new(Box::new(i16_reader(1, &[1, 2, 3])), 2);
        assert_eq!(read_i16(&mut converter, 3), vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn stereo_averages_into_mono() {
        let mut converter =
            AudioChannelConverter::new(Box::new(i16_reader(2, &[100, 200, 32767, 32767])), 1);
        assert_eq!(read_i16(&mut converter, 2), vec![150, 32767]);
    }

    #[test]
    fn surplus_channels_are_dropped_and_missing_ones_zeroed() {
        let mut down = AudioChannelConverter::new(
            Box::new(i16_reader(4, &[1, 2, 3, 4, 5, 6, 7, 8])),
            2,
        );
        assert_eq!(read_i16(&mut down, 2), vec![1, 2, 5, 6]);

        let mut up = AudioChannelConverter::new(Box::new(i16_reader(2, &[1, 2])), 3);
        assert_eq!(read_i16(&mut up, 1), vec![1, 2, 0]);
    }
}
