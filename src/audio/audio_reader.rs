//! The pull-model reader interface shared by the whole audio pipeline.
//!
//! A reader produces frames of its own `format()` for any output position;
//! `read` fills the caller's buffer with exactly `frames` frames. Positions
//! are in output frames, shifted by the reader's out-offset.

use crate::media_format::{RawAudioFormat, SampleFormat};

pub trait AudioReader: Send {
    /// The format this reader produces.
    fn format(&self) -> &RawAudioFormat;

    /// Latency in microseconds before the first frame can be delivered.
    fn initial_latency(&self) -> i64;

    /// Fills `buffer` with exactly `frames` frames starting at output
    /// position `pos`.
    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> crate::error::Result<()>;

    fn set_out_offset(&mut self, offset: i64);

    fn out_offset(&self) -> i64;
}

/// Fills `frames` frames of `buffer` with the format's mid value and returns
/// the byte length of the filled range.
pub fn read_silence(format: &RawAudioFormat, buffer: &mut [u8], frames: i64) -> usize {
    let length = byte_length(format, frames);
    match format.sample_format {
        // Unsigned samples sit mid-scale at 128, everything else at zero.
        SampleFormat::U8 => buffer[..length].fill(128),
        _ => buffer[..length].fill(0),
    }
    length
}

/// Byte length of `frames` frames in `format`.
pub fn byte_length(format: &RawAudioFormat, frames: i64) -> usize {
    format.frame_size() * frames as usize
}

/// Swaps `frames` frames of `buffer` end-for-end in place.
pub fn reverse_frames(format: &RawAudioFormat, buffer: &mut [u8], frames: i64) {
    let frame_size = format.frame_size();
    if frames < 2 || frame_size == 0 {
        return;
    }
    let mut front = 0usize;
    let mut back = (frames as usize - 1) * frame_size;
    while front < back {
        for i in 0..frame_size {
            buffer.swap(front + i, back + i);
        }
        front += frame_size;
        back -= frame_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_format::ByteOrder;

    fn mono_u8(frame_rate: f64) -> RawAudioFormat {
        RawAudioFormat {
            sample_format: SampleFormat::U8,
            byte_order: ByteOrder::host(),
            frame_rate,
            channel_count: 1,
            buffer_size: 256,
        }
    }

    #[test]
    fn silence_uses_the_mid_value() {
        let mut buffer = [0u8; 4];
        read_silence(&mono_u8(8000.0), &mut buffer, 4);
        assert_eq!(buffer, [128, 128, 128, 128]);

        let format = RawAudioFormat {
            sample_format: SampleFormat::I16,
            ..mono_u8(8000.0)
        };
        let mut buffer = [0xffu8; 4];
        read_silence(&format, &mut buffer, 2);
        assert_eq!(buffer, [0, 0, 0, 0]);
    }

    #[test]
    fn reverse_swaps_whole_frames() {
        let format = RawAudioFormat {
            sample_format: SampleFormat::U8,
            channel_count: 2,
            ..mono_u8(8000.0)
        };
        let mut buffer = [1u8, 2, 3, 4, 5, 6];
        reverse_frames(&format, &mut buffer, 3);
        assert_eq!(buffer, [5, 6, 3, 4, 1, 2]);
    }
}
