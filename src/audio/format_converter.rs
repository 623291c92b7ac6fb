//! Sample-kind and byte-order conversion reader.

use log::debug;

use crate::audio::audio_reader::{byte_length, AudioReader};
use crate::audio::sample_buffer::{read_canonical, write_canonical};
use crate::error::Result;
use crate::media_format::{ByteOrder, RawAudioFormat, SampleFormat};

/// Converts any sample kind and byte order on input to the requested sample
/// kind and byte order on output. Every sample passes through the canonical
/// signed full-scale representation, so all kind pairs share one clamping
/// behavior. Channel count and frame rate pass through unchanged.
pub struct AudioFormatConverter {
    format: RawAudioFormat,
    out_offset: i64,
    source: Box<dyn AudioReader>,
}

impl AudioFormatConverter {
    pub fn new(
        source: Box<dyn AudioReader>,
        sample_format: SampleFormat,
        byte_order: ByteOrder,
    ) -> AudioFormatConverter {
        let mut format = *source.format();
        let in_sample_size = format.sample_format.sample_size();
        let out_sample_size = sample_format.sample_size();
        format.sample_format = sample_format;
        format.byte_order = byte_order;
        if in_sample_size != out_sample_size {
            format.buffer_size = format.buffer_size * out_sample_size / in_sample_size;
        }
        AudioFormatConverter {
            format,
            out_offset: 0,
            source,
        }
    }

    pub fn source(&self) -> &dyn AudioReader {
        self.source.as_ref()
    }
}

impl AudioReader for AudioFormatConverter {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        self.source.initial_latency()
    }

    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> Result<()> {
        let pos = pos + self.out_offset;
        let source_format = *self.source.format();

        if self.format.sample_format == source_format.sample_format
            && self.format.byte_order == source_format.byte_order
        {
            return self.source.read(buffer, pos, frames);
        }

        debug!(
            "AudioFormatConverter::read() - {:?}/{:?} -> {:?}/{:?}, {} frames",
            source_format.sample_format,
            source_format.byte_order,
            self.format.sample_format,
            self.format.byte_order,
            frames
        );

        let in_sample_size = source_format.sample_format.sample_size();
        let out_sample_size = self.format.sample_format.sample_size();
        let channel_count = self.format.channel_count as usize;
        let sample_count = frames as usize * channel_count;

        // When the sample sizes match the output buffer doubles as the read
        // buffer, otherwise the source frames go through a scratch buffer.
        let mut scratch = Vec::new();
        if in_sample_size != out_sample_size {
            scratch.resize(byte_length(&source_format, frames), 0u8);
            self.source.read(&mut scratch, pos, frames)?;
        } else {
            self.source.read(buffer, pos, frames)?;
        }
        let in_buffer: &mut [u8] = if in_sample_size != out_sample_size {
            &mut scratch
        } else {
            &mut buffer[..byte_length(&source_format, frames)]
        };

        let host = ByteOrder::host();
        if source_format.byte_order != host {
            swap_sample_byte_order(in_buffer, source_format.sample_format);
        }

        if self.format.sample_format == source_format.sample_format {
            // Only the byte order differs; the data is already in place.
        } else {
            let mut converted = vec![0u8; sample_count * out_sample_size];
            for i in 0..sample_count {
                let value =
                    read_canonical(source_format.sample_format, &in_buffer[i * in_sample_size..]);
                write_canonical(
                    self.format.sample_format,
                    &mut converted[i * out_sample_size..],
                    value,
                );
            }
            buffer[..converted.len()].copy_from_slice(&converted);
        }

        if self.format.byte_order != host {
            swap_sample_byte_order(
                &mut buffer[..sample_count * out_sample_size],
                self.format.sample_format,
            );
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

fn swap_sample_byte_order(buffer: &mut [u8], format: SampleFormat) {
    let size = format.sample_size();
    if size < 2 {
        return;
    }
    for sample in buffer.chunks_exact_mut(size) {
        sample.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::MemoryReader;

    fn i16_stereo(samples: &[i16]) -> MemoryReader {
        let mut bytes = Vec::new();
        for sample in samples {
            bytes.extend_from_slice(&sample.to_ne_bytes());
        }
        MemoryReader::new(
            RawAudioFormat {
                sample_format: SampleFormat::I16,
                byte_order: ByteOrder::host(),
                frame_rate: 44100.0,
                channel_count: 2,
                buffer_size: 4096,
            },
            bytes,
        )
    }

    #[test]
    fn i16_to_f32_normalizes_through_full_scale() {
        let source = i16_stereo(&[-32768, 0, 1, 2, 32767, -1, -32767, 32767]);
        let mut converter = AudioFormatConverter::new(
            Box::new(source),
            SampleFormat::F32,
            ByteOrder::host(),
        );
        let mut buffer = vec![0u8; 4 * 8];
        converter.read(&mut buffer, 0, 4).unwrap();

        let expected: [f64; 8] = [
            -1.0,
            0.0,
            1.0 / 32767.0,
            2.0 / 32767.0,
            1.0,
            -1.0 / 32767.0,
            -1.0,
            1.0,
        ];
        for (i, want) in expected.iter().enumerate() {
            let got = f32::from_ne_bytes([
                buffer[i * 4],
                buffer[i * 4 + 1],
                buffer[i * 4 + 2],
                buffer[i * 4 + 3],
            ]) as f64;
            assert!(
                (got - want).abs() < 1e-9,
                "sample {}: got {}, want {}",
                i,
                got,
                want
            );
        }
    }

    #[test]
    fn round_trip_reproduces_quantized_input() {
        let samples = [-32767i16, -12000, -1, 0, 1, 500, 32767, 100];
        let source = i16_stereo(&samples);
        let to_float = AudioFormatConverter::new(
            Box::new(source),
            SampleFormat::F32,
            ByteOrder::host(),
        );
        let mut back =
            AudioFormatConverter::new(Box::new(to_float), SampleFormat::I16, ByteOrder::host());
        let mut buffer = vec![0u8; 2 * 8];
        back.read(&mut buffer, 0, 4).unwrap();
        for (i, want) in samples.iter().enumerate() {
            let got = i16::from_ne_bytes([buffer[i * 2], buffer[i * 2 + 1]]);
            assert_eq!(got, *want, "sample {}", i);
        }
    }

    #[test]
    fn matching_format_is_a_pass_through() {
        let samples = [7i16, -7, 100, -100];
        let source = i16_stereo(&samples);
        let mut converter = AudioFormatConverter::new(
            Box::new(source),
            SampleFormat::I16,
            ByteOrder::host(),
        );
        let mut buffer = vec![0u8; 2 * 4];
        converter.read(&mut buffer, 0, 2).unwrap();
        for (i, want) in samples.iter().enumerate() {
            assert_eq!(i16::from_ne_bytes([buffer[i * 2], buffer[i * 2 + 1]]), *want);
        }
    }

    #[test]
    fn byte_order_conversion_swaps_samples() {
        let source = i16_stereo(&[0x0102, 0x0304, -1, 256]);
        let other = match ByteOrder::host() {
            ByteOrder::LittleEndian => ByteOrder::BigEndian,
            ByteOrder::BigEndian => ByteOrder::LittleEndian,
        };
        let mut converter = AudioFormatConverter::new(Box::new(source), SampleFormat::I16, other);
        let mut buffer = vec![0u8; 2 * 4];
        converter.read(&mut buffer, 0, 2).unwrap();
        let got = i16::from_ne_bytes([buffer[1], buffer[0]]);
        assert_eq!(got, 0x0102);
    }
}
