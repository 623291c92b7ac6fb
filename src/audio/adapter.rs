//! Bridges an arbitrary raw audio source format to a target format.

use log::debug;

use crate::audio::audio_reader::AudioReader;
use crate::audio::channel_converter::AudioChannelConverter;
use crate::audio::format_converter::AudioFormatConverter;
use crate::audio::resampler::AudioResampler;
use crate::error::Result;
use crate::media_format::{ByteOrder, RawAudioFormat};

/// Composes format converter, resampler and channel converter, in that
/// order, each only when its aspect actually differs. The channel converter
/// runs last so a downmix narrows the stream after resampling instead of
/// before. Output is always host byte order.
pub struct AudioAdapter {
    format: RawAudioFormat,
    out_offset: i64,
    chain: Box<dyn AudioReader>,
}

impl AudioAdapter {
    pub fn new(source: Box<dyn AudioReader>, format: RawAudioFormat) -> AudioAdapter {
        let host = ByteOrder::host();
        let mut chain = source;

        if format.sample_format != chain.format().sample_format
            || chain.format().byte_order != host
        {
            debug!(
                "AudioAdapter::new() - format converter {:?} -> {:?}",
                chain.format().sample_format,
                format.sample_format
            );
            chain = Box::new(AudioFormatConverter::new(chain, format.sample_format, host));
        }

        if format.frame_rate != 0.0 && format.frame_rate != chain.format().frame_rate {
            debug!(
                "AudioAdapter::new() - resampler ({:.1} -> {:.1})",
                chain.format().frame_rate,
                format.frame_rate
            );
            chain = Box::new(AudioResampler::with_source(chain, format.frame_rate));
        }

        if format.channel_count != 0 && format.channel_count != chain.format().channel_count {
            debug!(
                "AudioAdapter::new() - channel converter ({} -> {})",
                chain.format().channel_count,
                format.channel_count
            );
            chain = Box::new(AudioChannelConverter::new(chain, format.channel_count));
        }

        let format = *chain.format();
        AudioAdapter {
            format,
            out_offset: 0,
            chain,
        }
    }
}

impl AudioReader for AudioAdapter {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        self.chain.initial_latency()
    }

    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> Result<()> {
        let pos = pos + self.out_offset;
        self.chain.read(buffer, pos, frames)
    }

    fn set_out_offset(&mut self, offset: i64) {
        self.out_offset = offset;
    }

    fn out_offset(&self) -> i64 {
        self.out_offset
    }
}
