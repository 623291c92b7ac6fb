//! Readers backed by in-memory sample data, for pipeline tests.

use crate::audio::audio_reader::{read_silence, AudioReader};
use crate::error::{PlayerError, Result};
use crate::media_format::RawAudioFormat;

/// A reader over a fixed byte buffer; positions past the end read silence,
/// negative positions read silence as well.
pub struct MemoryReader {
    format: RawAudioFormat,
    out_offset: i64,
    data: Vec<u8>,
}

impl MemoryReader {
    pub fn new(format: RawAudioFormat, data: Vec<u8>) -> MemoryReader {
        MemoryReader {
            format,
            out_offset: 0,
            data,
        }
    }

    pub fn frame_count(&self) -> i64 {
        (self.data.len() / self.format.frame_size()) as i64
    }
}

impl AudioReader for MemoryReader {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        0
    }

    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> Result<()> {
        let pos = pos + self.out_offset;
        let frame_size = self.format.frame_size();
        read_silence(&self.format, buffer, frames);
        let available = self.frame_count();
        let first = pos.max(0);
        let last = (pos + frames).min(available);
        if first < last {
            let src = first as usize * frame_size..last as usize * frame_size;
            let dst = (first - pos) as usize * frame_size;
            buffer[dst..dst + src.len()].copy_from_slice(&self.data[src]);
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

/// A reader that always fails, for error propagation tests.
pub struct FailingReader {
    format: RawAudioFormat,
    out_offset: i64,
}

impl FailingReader {
    pub fn new(format: RawAudioFormat) -> FailingReader {
        FailingReader {
            format,
            out_offset: 0,
        }
    }
}

impl AudioReader for FailingReader {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        0
    }

    fn read(&mut self, _buffer: &mut [u8], _pos: i64, _frames: i64) -> Result<()> {
        Err(PlayerError::EndOfStream)
    }

    fn set_out_offset(&mut self, offset: i64) {
        self.out_offset = offset;
    }

    fn out_offset(&self) -> i64 {
        self.out_offset
    }
}
