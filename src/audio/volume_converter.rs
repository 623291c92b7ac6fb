//! Gain stage with ramped volume changes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::audio_reader::AudioReader;
use crate::error::Result;
use crate::media_format::{RawAudioFormat, SampleFormat};

/// Volume control shared between the playback coordinator and the reader
/// chain; the converter samples it once per read.
pub struct SharedVolume(AtomicU32);

impl SharedVolume {
    pub fn new(volume: f32) -> Arc<SharedVolume> {
        Arc::new(SharedVolume(AtomicU32::new(volume.to_bits())))
    }

    pub fn set(&self, volume: f32) {
        self.0.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Multiplies every sample by a scalar gain in [0, 2]. When the gain changed
/// since the previous read, the difference is ramped linearly across the
/// block to avoid zipper noise.
pub struct AudioVolumeConverter {
    format: RawAudioFormat,
    out_offset: i64,
    source: Box<dyn AudioReader>,
    volume: Arc<SharedVolume>,
    previous_volume: f32,
}

impl AudioVolumeConverter {
    pub fn new(source: Box<dyn AudioReader>, volume: Arc<SharedVolume>) -> AudioVolumeConverter {
        let format = *source.format();
        let previous_volume = volume.get();
        AudioVolumeConverter {
            format,
            out_offset: 0,
            source,
            volume,
            previous_volume,
        }
    }

    pub fn source(&self) -> &dyn AudioReader {
        self.source.as_ref()
    }
}

impl AudioReader for AudioVolumeConverter {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        self.source.initial_latency()
    }

    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> Result<()> {
        let pos = pos + self.out_offset;
        self.source.read(buffer, pos, frames)?;

        let volume = self.volume.get();
        let previous = self.previous_volume;
        if previous == 1.0 && volume == 1.0 {
            return Ok(());
        }

        let channel_count = self.format.channel_count as usize;
        let samples = frames as usize * channel_count;
        let ramp = volume != previous && frames > 1;
        // Per-sample gain: flat, or ramped from the previous to the current
        // volume across the block.
        let gain_at = |index: usize| -> f32 {
            if ramp {
                let frame = (index / channel_count) as f32;
                previous + (volume - previous) * (frame / (frames - 1) as f32)
            } else {
                volume
            }
        };

        match self.format.sample_format {
            SampleFormat::F32 => {
                for i in 0..samples {
                    let offset = i * 4;
                    let value = f32::from_ne_bytes([
                        buffer[offset],
                        buffer[offset + 1],
                        buffer[offset + 2],
                        buffer[offset + 3],
                    ]) * gain_at(i);
                    buffer[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
                }
            }
            SampleFormat::I32 => {
                for i in 0..samples {
                    let offset = i * 4;
                    let value = i32::from_ne_bytes([
                        buffer[offset],
                        buffer[offset + 1],
                        buffer[offset + 2],
                        buffer[offset + 3],
                    ]);
                    let scaled = (value as f64 * gain_at(i) as f64 + 0.5) as i32;
                    buffer[offset..offset + 4].copy_from_slice(&scaled.to_ne_bytes());
                }
            }
            SampleFormat::I16 => {
                for i in 0..samples {
                    let offset = i * 2;
                    let value = i16::from_ne_bytes([buffer[offset], buffer[offset + 1]]);
                    let scaled = (value as f32 * gain_at(i) + 0.5) as i16;
                    buffer[offset..offset + 2].copy_from_slice(&scaled.to_ne_bytes());
                }
            }
            SampleFormat::U8 => {
                // Center is 128, not 0; re-center before scaling.
                for i in 0..samples {
                    let value = buffer[i] as f32;
                    buffer[i] = ((value - 128.0) * gain_at(i) + 128.5) as u8;
                }
            }
            SampleFormat::I8 => {
                for i in 0..samples {
                    let value = buffer[i] as i8;
                    buffer[i] = ((value as f32 * gain_at(i) + 0.5) as i8) as u8;
                }
            }
        }

        self.previous_volume = volume;
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

    fn i16_source(samples: &[i16]) -> MemoryReader {
        let mut bytes = Vec::new();
        for sample in samples {
            bytes.extend_from_slice(&sample.to_ne_bytes());
        }
        MemoryReader::new(
            RawAudioFormat {
                sample_format: SampleFormat::I16,
                byte_order: ByteOrder::host(),
                frame_rate: 44100.0,
                channel_count: 1,
                buffer_size: 4096,
            },
            bytes,
        )
    }

    fn read_i16(converter: &mut AudioVolumeConverter, frames: i64) -> Vec<i16> {
        let mut buffer = vec![0u8; 2 * frames as usize];
        converter.read(&mut buffer, 0, frames).unwrap();
        buffer
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn unity_volume_passes_through() {
        let volume = SharedVolume::new(1.0);
        let mut converter = AudioVolumeConverter::new(Box::new(i16_source(&[100, -100])), volume);
        assert_eq!(read_i16(&mut converter, 2), vec![100, -100]);
    }

    #[test]
    fn constant_volume_scales_samples() {
        let volume = SharedVolume::new(0.5);
        let mut converter =
            AudioVolumeConverter::new(Box::new(i16_source(&[100, 200, -200])), volume);
        // previous == current == 0.5, no ramp
        assert_eq!(read_i16(&mut converter, 3), vec![50, 100, -99]);
    }

    #[test]
    fn volume_change_ramps_across_the_block() {
        let volume = SharedVolume::new(1.0);
        let mut converter =
            AudioVolumeConverter::new(Box::new(i16_source(&[1000; 10])), volume.clone());
        volume.set(0.0);
        let values = read_i16(&mut converter, 10);
        assert_eq!(values[0], 1000);
        assert_eq!(*values.last().unwrap(), 0);
        for window in values.windows(2) {
            assert!(window[1] <= window[0]);
        }
        // Next read is flat at the new volume.
        let values = read_i16(&mut converter, 4);
        assert_eq!(values, vec![0, 0, 0, 0]);
    }

    #[test]
    fn u8_recenters_around_mid_scale() {
        let format = RawAudioFormat {
            sample_format: SampleFormat::U8,
            byte_order: ByteOrder::host(),
            frame_rate: 8000.0,
            channel_count: 1,
            buffer_size: 256,
        };
        let source = MemoryReader::new(format, vec![128, 228, 28]);
        let volume = SharedVolume::new(0.5);
        let mut converter = AudioVolumeConverter::new(Box::new(source), volume);
        let mut buffer = vec![0u8; 3];
        converter.read(&mut buffer, 0, 3).unwrap();
        assert_eq!(buffer, vec![128, 178, 78]);
    }
}
