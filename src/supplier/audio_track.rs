//! Audio track supplier over a decodable container track, with a small
//! cache of decoded frame runs between the track and the reader chain.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::audio::audio_reader::{read_silence, AudioReader};
use crate::error::{PlayerError, Result};
use crate::media_format::{CodecInfo, EncodedAudioFormat, RawAudioFormat};
use crate::supplier::media_track::AudioDecodingTrack;

/// An audio reader wrapping one container track, with codec/duration
/// introspection for the coordinator.
pub trait AudioTrackSupplier: AudioReader {
    fn encoded_format(&self) -> EncodedAudioFormat;

    fn codec_info(&self) -> CodecInfo;

    /// Track duration in microseconds, never negative.
    fn duration(&self) -> i64;

    fn track_index(&self) -> i32;
}

const CACHE_BUFFER_COUNT: usize = 10;
/// Decoding budget per read; whatever is missing when it runs out is
/// delivered as silence.
const READ_DEADLINE: Duration = Duration::from_millis(10);
/// Suggest a big transfer buffer, we do a lot of caching.
const MIN_BUFFER_SIZE: usize = 16384;

struct CacheBuffer {
    data: Box<[u8]>,
    offset: i64,
    size: i64,
    time_stamp: u64,
}

pub struct MediaTrackAudioSupplier {
    format: RawAudioFormat,
    out_offset: i64,
    track: Box<dyn AudioDecodingTrack>,
    buffers: Vec<CacheBuffer>,
    has_key_frames: bool,
    count_frames: i64,
    report_seek_error: bool,
    track_index: i32,
    /// Monotonic LRU clock; bumped on every touch.
    touch_clock: u64,
}

impl MediaTrackAudioSupplier {
    pub fn new(
        mut track: Box<dyn AudioDecodingTrack>,
        track_index: i32,
    ) -> Result<MediaTrackAudioSupplier> {
        let encoded = track.encoded_format();
        let proposed = RawAudioFormat {
            sample_format: crate::media_format::SampleFormat::F32,
            byte_order: crate::media_format::ByteOrder::host(),
            frame_rate: encoded.frame_rate,
            channel_count: encoded.channel_count,
            buffer_size: MIN_BUFFER_SIZE,
        };
        let format = track.decoded_format(&proposed)?;
        if format.frame_rate <= 0.0 || format.channel_count == 0 || format.buffer_size == 0 {
            return Err(PlayerError::BadFormat);
        }
        let count_frames = track.count_frames();
        debug!(
            "MediaTrackAudioSupplier::new() - {} frames, buffer size {}",
            count_frames, format.buffer_size
        );
        let buffers = (0..CACHE_BUFFER_COUNT)
            .map(|_| CacheBuffer {
                data: vec![0u8; format.buffer_size].into_boxed_slice(),
                offset: 0,
                size: 0,
                time_stamp: 0,
            })
            .collect();
        Ok(MediaTrackAudioSupplier {
            format,
            out_offset: 0,
            track,
            buffers,
            has_key_frames: true,
            count_frames,
            report_seek_error: true,
            track_index,
            touch_clock: 0,
        })
    }

    fn frames_per_buffer(&self) -> i64 {
        (self.format.buffer_size / self.format.frame_size()) as i64
    }

    fn touch(&mut self) -> u64 {
        self.touch_clock += 1;
        self.touch_clock
    }

    /// Copies `frames` frames at `position` between two frame-addressed
    /// buffers. No range checking.
    fn copy_frames(
        &self,
        source: &[u8],
        source_offset: i64,
        target: &mut [u8],
        target_offset: i64,
        position: i64,
        frames: i64,
    ) {
        let frame_size = self.format.frame_size();
        let from = (position - source_offset) as usize * frame_size;
        let to = (position - target_offset) as usize * frame_size;
        let length = frames as usize * frame_size;
        target[to..to + length].copy_from_slice(&source[from..from + length]);
    }

    /// Indices of cache buffers intersecting `[position, position + frames)`,
    /// sorted by offset.
    fn buffers_for(&self, position: i64, frames: i64) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.buffers.len())
            .filter(|&i| {
                let buffer = &self.buffers[i];
                let start = position.max(buffer.offset);
                let end = (position + frames).min(buffer.offset + buffer.size);
                start < end
            })
            .collect();
        indices.sort_by_key(|&i| self.buffers[i].offset);
        indices
    }

    /// A buffer that already starts at `position`, else an empty buffer,
    /// else the least recently used one.
    fn usable_buffer_for(&self, position: i64) -> usize {
        if let Some(index) = (0..self.buffers.len())
            .find(|&i| self.buffers[i].offset == position && self.buffers[i].size != 0)
        {
            return index;
        }
        if let Some(index) = (0..self.buffers.len()).find(|&i| self.buffers[i].size == 0) {
            return index;
        }
        (0..self.buffers.len())
            .min_by_key(|&i| self.buffers[i].time_stamp)
            .unwrap()
    }

    /// Decodes one transfer buffer at `position` into cache slot `index`.
    fn read_buffer(&mut self, index: usize, position: i64, time: u64) -> Result<()> {
        let buffer = &mut self.buffers[index];
        buffer.offset = position;
        buffer.time_stamp = time;
        match self.track.read_frames(&mut buffer.data) {
            Ok(frames) => {
                buffer.size = frames;
                if frames == 0 {
                    Err(PlayerError::EndOfStream)
                } else {
                    Ok(())
                }
            }
            Err(error) => {
                buffer.size = 0;
                Err(error)
            }
        }
    }

    /// Copies as much of the requested range as possible out of the cache,
    /// first extending a run from the head rightwards, then from the tail
    /// leftwards. Touched buffers are re-stamped with `time`.
    fn read_cached_frames(
        &mut self,
        buffer: &mut [u8],
        base_pos: i64,
        pos: &mut i64,
        frames: &mut i64,
        time: u64,
    ) {
        let indices = self.buffers_for(*pos, *frames);
        for &index in indices.iter() {
            let (offset, size) = (self.buffers[index].offset, self.buffers[index].size);
            if offset <= *pos && offset + size > *pos {
                let run = (*frames).min(offset + size - *pos);
                let data = std::mem::take(&mut self.buffers[index].data);
                self.copy_frames(&data, offset, buffer, base_pos, *pos, run);
                self.buffers[index].data = data;
                self.buffers[index].time_stamp = time;
                *pos += run;
                *frames -= run;
            }
        }
        for &index in indices.iter().rev() {
            let (offset, size) = (self.buffers[index].offset, self.buffers[index].size);
            if offset < *pos + *frames && offset + size >= *pos + *frames {
                let run = (*frames).min(*pos + *frames - offset);
                let data = std::mem::take(&mut self.buffers[index].data);
                self.copy_frames(
                    &data,
                    offset,
                    buffer,
                    base_pos,
                    *pos + *frames - run,
                    run,
                );
                self.buffers[index].data = data;
                self.buffers[index].time_stamp = time;
                *frames -= run;
            }
        }
    }

    /// Reads `frames` frames at `position` from the track (not the cache);
    /// decoded buffers are installed in the cache. On any failure the
    /// untouched remainder is silence.
    fn read_uncached_frames(
        &mut self,
        buffer: &mut [u8],
        base_pos: i64,
        mut position: i64,
        mut frames: i64,
        time: u64,
        started: Instant,
    ) {
        let mut current_pos = position;
        let mut failed = false;
        if self.seek_to_key_frame_backward(&mut current_pos).is_err() {
            failed = true;
        }
        while !failed && frames > 0 {
            let index = self.usable_buffer_for(current_pos);
            if self.read_buffer(index, current_pos, time).is_err() {
                failed = true;
                break;
            }
            let cache = &self.buffers[index];
            let run = (position + frames).min(cache.offset + cache.size) - position;
            let cache_size = cache.size;
            if run > 0 {
                let data = std::mem::take(&mut self.buffers[index].data);
                self.copy_frames(&data, current_pos, buffer, base_pos, position, run);
                self.buffers[index].data = data;
                position += run;
                frames -= run;
            }
            current_pos += cache_size;
            if started.elapsed() > READ_DEADLINE {
                debug!(
                    "MediaTrackAudioSupplier::read_uncached_frames() - deadline \
                     exceeded, {} frames left",
                    frames
                );
                failed = true;
            }
        }
        if failed && frames > 0 {
            let frame_size = self.format.frame_size();
            let from = (position - base_pos) as usize * frame_size;
            read_silence(&self.format, &mut buffer[from..], frames);
        }
    }

    /// Positions the track cursor on the closest keyframe at or before
    /// `position`, unless the cursor is already closer.
    fn seek_to_key_frame_backward(&mut self, position: &mut i64) -> Result<()> {
        let current = self.track.current_frame();
        if *position == current {
            return Ok(());
        }
        if !self.has_key_frames {
            *position -= *position % self.frames_per_buffer();
            return self.track.seek_to_frame(position);
        }

        let wanted = *position;
        self.track.find_key_frame_backward(position)?;
        if current > *position && current < wanted {
            // The cursor sits between the keyframe and the wanted frame;
            // decoding forward from here is cheaper than seeking.
            *position = current;
            return Ok(());
        }
        if *position > wanted {
            // We asked to seek backwards, but the extractor would go
            // forward. Producing silence beats decoding the wrong frames.
            return Err(PlayerError::EntryNotFound);
        }
        match self.track.seek_to_frame(position) {
            Ok(()) => {
                self.report_seek_error = true;
                Ok(())
            }
            Err(error) => {
                *position = self.track.current_frame();
                if self.report_seek_error {
                    warn!(
                        "seek to key frame backward: {} -> {}: {}",
                        wanted, position, error
                    );
                    self.report_seek_error = false;
                }
                Err(error)
            }
        }
    }
}

impl AudioReader for MediaTrackAudioSupplier {
    fn format(&self) -> &RawAudioFormat {
        &self.format
    }

    fn initial_latency(&self) -> i64 {
        // TODO: just a wild guess, not really founded on anything.
        100_000
    }

    fn read(&mut self, buffer: &mut [u8], pos: i64, frames: i64) -> Result<()> {
        let mut pos = pos + self.out_offset;
        let mut frames = frames;
        let base_pos = pos;

        // Frames past the end of the track are always silence; reading
        // beyond the end is not an error.
        if self.count_frames > 0 && pos + frames > self.count_frames {
            let in_range = (self.count_frames - pos).max(0);
            let from = in_range as usize * self.format.frame_size();
            read_silence(&self.format, &mut buffer[from..], frames - in_range);
            frames = in_range;
        }

        let started = Instant::now();
        let time = self.touch();
        if frames > 0 {
            self.read_cached_frames(buffer, base_pos, &mut pos, &mut frames, time);
        }
        if frames > 0 {
            self.read_uncached_frames(buffer, base_pos, pos, frames, time, started);
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

impl AudioTrackSupplier for MediaTrackAudioSupplier {
    fn encoded_format(&self) -> EncodedAudioFormat {
        self.track.encoded_format()
    }

    fn codec_info(&self) -> CodecInfo {
        self.track.codec_info()
    }

    fn duration(&self) -> i64 {
        self.track.duration().max(0)
    }

    fn track_index(&self) -> i32 {
        self.track_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::test_support::FakeAudioTrack;

    fn ramp_samples(count: usize) -> Vec<i16> {
        (0..count).map(|i| (i % 32768) as i16).collect()
    }

    fn read_frames(supplier: &mut MediaTrackAudioSupplier, pos: i64, frames: i64) -> Vec<i16> {
        let mut buffer = vec![0u8; frames as usize * 2];
        supplier.read(&mut buffer, pos, frames).unwrap();
        buffer
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn sequential_reads_decode_each_range_once() {
        let track = FakeAudioTrack::new(ramp_samples(480_000), 48000.0, 1024);
        let log = track.log.clone();
        let mut supplier = MediaTrackAudioSupplier::new(Box::new(track), 0).unwrap();

        let first = read_frames(&mut supplier, 0, 1024);
        assert_eq!(first[0], 0);
        assert_eq!(first[1023], 1023);

        // Overlapping read: [512, 1024) must come from the cache, only
        // [1024, 2048) hits the decoder.
        let second = read_frames(&mut supplier, 512, 1024);
        assert_eq!(second[0], 512);
        assert_eq!(second[1023], 1535);

        let log = log.lock().unwrap();
        assert_eq!(log.decoded_ranges, vec![(0, 1024), (1024, 2048)]);
    }

    #[test]
    fn cache_hit_updates_lru_stamp() {
        let track = FakeAudioTrack::new(ramp_samples(480_000), 48000.0, 1024);
        let mut supplier = MediaTrackAudioSupplier::new(Box::new(track), 0).unwrap();

        read_frames(&mut supplier, 0, 1024);
        let stamp_after_fill = supplier.buffers[0].time_stamp;
        read_frames(&mut supplier, 0, 512);
        assert!(supplier.buffers[0].time_stamp > stamp_after_fill);
    }

    #[test]
    fn reads_past_the_end_are_padded_with_silence() {
        let track = FakeAudioTrack::new(ramp_samples(100), 48000.0, 64);
        let mut supplier = MediaTrackAudioSupplier::new(Box::new(track), 0).unwrap();

        let values = read_frames(&mut supplier, 90, 20);
        assert_eq!(values[0], 90);
        assert_eq!(values[9], 99);
        assert!(values[10..].iter().all(|&value| value == 0));
    }

    #[test]
    fn forward_seeking_container_produces_silence() {
        let track = FakeAudioTrack::new(ramp_samples(10_000), 48000.0, 1024)
            .with_seek_landing_at(5_000);
        let mut supplier = MediaTrackAudioSupplier::new(Box::new(track), 0).unwrap();

        // The "backward" keyframe for 100 lands at 5000, i.e. after the
        // target; the whole range must be silence, and no decode happens.
        let values = read_frames(&mut supplier, 100, 64);
        assert!(values.iter().all(|&value| value == 0));
    }

    #[test]
    fn cursor_closer_than_keyframe_skips_the_seek() {
        let track =
            FakeAudioTrack::new(ramp_samples(10_000), 48000.0, 64).with_keyframes(vec![0, 4096]);
        let log = track.log.clone();
        let mut supplier = MediaTrackAudioSupplier::new(Box::new(track), 0).unwrap();

        read_frames(&mut supplier, 0, 64); // cursor now at 64
        read_frames(&mut supplier, 128, 64); // keyframe would be 0, cursor wins
        let log = log.lock().unwrap();
        assert!(log.seeks.is_empty());
        // Decoding continued from the cursor towards the target.
        assert_eq!(log.decoded_ranges[0], (0, 64));
        assert_eq!(log.decoded_ranges[1], (64, 128));
    }

    #[test]
    fn duration_is_never_negative() {
        let track = FakeAudioTrack::new(Vec::new(), 48000.0, 64);
        let supplier = MediaTrackAudioSupplier::new(Box::new(track), 3).unwrap();
        assert_eq!(supplier.duration(), 0);
        assert_eq!(supplier.track_index(), 3);
    }
}
