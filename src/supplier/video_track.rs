//! Video track supplier over a decodable container track.

use log::{debug, warn};

use crate::error::{PlayerError, Result};
use crate::media_format::{CodecInfo, EncodedVideoFormat, PixelFormat, RawVideoFormat};
use crate::supplier::media_track::VideoDecodingTrack;

/// A decoded video frame source with keyframe-aware random access.
pub trait VideoTrackSupplier: Send {
    fn format(&self) -> &RawVideoFormat;

    fn encoded_format(&self) -> EncodedVideoFormat;

    fn codec_info(&self) -> CodecInfo;

    /// Decodes the frame at the cursor into `buffer`. `performance_time`
    /// receives the frame's presentation time; `was_cached` is set when the
    /// frame did not touch the decoder. When the caller's `format` differs
    /// from the current one the decoded format is renegotiated first.
    fn read_frame(
        &mut self,
        buffer: &mut [u8],
        performance_time: &mut i64,
        format: &RawVideoFormat,
        was_cached: &mut bool,
    ) -> Result<()>;

    /// Rewrites `frame` to the closest keyframe at or before it.
    fn find_key_frame_for_frame(&mut self, frame: &mut i64) -> Result<()>;

    fn seek_to_time(&mut self, performance_time: &mut i64) -> Result<()>;

    /// Seeks so the next `read_frame` yields `frame` (rewritten to the frame
    /// actually reached, always at or before the request).
    fn seek_to_frame(&mut self, frame: &mut i64) -> Result<()>;

    fn position(&self) -> i64;

    fn duration(&self) -> i64;

    fn current_frame(&self) -> i64;

    fn track_index(&self) -> i32;
}

pub struct MediaTrackVideoSupplier {
    format: RawVideoFormat,
    track: Box<dyn VideoDecodingTrack>,
    performance_time: i64,
    duration: i64,
    current_frame: i64,
    track_index: i32,
    /// Single-frame media (cover art): set once the one frame was decoded.
    single_frame_decoded: bool,
}

impl MediaTrackVideoSupplier {
    pub fn new(
        track: Box<dyn VideoDecodingTrack>,
        track_index: i32,
    ) -> Result<MediaTrackVideoSupplier> {
        let mut supplier = MediaTrackVideoSupplier {
            format: RawVideoFormat {
                pixel_format: PixelFormat::NoColorSpace,
                display_width: 0,
                display_height: 0,
                bytes_per_row: 0,
                field_rate: 0.0,
                pixel_width_aspect: 1,
                pixel_height_aspect: 1,
            },
            track,
            performance_time: 0,
            duration: 0,
            current_frame: 0,
            track_index,
            single_frame_decoded: false,
        };
        supplier.switch_format(PixelFormat::NoColorSpace, 0)?;
        supplier.duration = supplier.track.duration();
        Ok(supplier)
    }

    /// Negotiates the decoded format with the codec, preferring the encoded
    /// format's display pixel format, then packed 4:2:2, then RGB32.
    fn switch_format(&mut self, pixel_format: PixelFormat, bytes_per_row: u32) -> Result<()> {
        let encoded = self.track.encoded_format();
        let width = encoded.display_width;
        let height = encoded.display_height;

        let mut pixel_format = pixel_format;
        if pixel_format == PixelFormat::NoColorSpace {
            pixel_format = encoded.pixel_format;
            if pixel_format == PixelFormat::NoColorSpace {
                // Still no preference, try the most commonly supported
                // overlay format.
                pixel_format = PixelFormat::YCbCr422;
            }
        }

        // Some decoders under-report their row length.
        let bytes_per_row = bytes_per_row.max(pixel_format.min_bytes_per_row(width));

        let mut format = match self.set_decoded_format(width, height, pixel_format, bytes_per_row)
        {
            Ok(format) => format,
            Err(error) => {
                debug!(
                    "MediaTrackVideoSupplier::switch_format() - {:?} rejected \
                     ({}), retrying with RGB32",
                    pixel_format, error
                );
                let pixel_format = PixelFormat::Rgb32;
                let bytes_per_row = bytes_per_row.max(pixel_format.min_bytes_per_row(width));
                self.set_decoded_format(width, height, pixel_format, bytes_per_row)?
            }
        };

        if format.pixel_format != pixel_format {
            warn!(
                "MediaTrackVideoSupplier::switch_format() - codec changed the \
                 pixel format of the decoded frames ({:?} -> {:?})",
                pixel_format, format.pixel_format
            );
            // Check whether the codec forgot to adjust bytes_per_row too.
            let min_bytes_per_row = format.pixel_format.min_bytes_per_row(width);
            if min_bytes_per_row > format.bytes_per_row {
                format = self.set_decoded_format(
                    width,
                    height,
                    format.pixel_format,
                    min_bytes_per_row,
                )?;
            }
        }

        self.format = format;
        Ok(())
    }

    fn set_decoded_format(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        bytes_per_row: u32,
    ) -> Result<RawVideoFormat> {
        let encoded = self.track.encoded_format();
        let proposed = RawVideoFormat {
            pixel_format,
            display_width: width,
            display_height: height,
            bytes_per_row,
            field_rate: encoded.field_rate,
            pixel_width_aspect: 1,
            pixel_height_aspect: 1,
        };
        self.track.decoded_format(&proposed)
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.format.display_width, self.format.display_height)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format.pixel_format
    }

    pub fn bytes_per_row(&self) -> u32 {
        self.format.bytes_per_row
    }
}

impl VideoTrackSupplier for MediaTrackVideoSupplier {
    fn format(&self) -> &RawVideoFormat {
        &self.format
    }

    fn encoded_format(&self) -> EncodedVideoFormat {
        self.track.encoded_format()
    }

    fn codec_info(&self) -> CodecInfo {
        self.track.codec_info()
    }

    fn read_frame(
        &mut self,
        buffer: &mut [u8],
        performance_time: &mut i64,
        format: &RawVideoFormat,
        was_cached: &mut bool,
    ) -> Result<()> {
        // Single frame video (cover art): pretend to be a 25 fps stream and
        // keep delivering the same frame over and over again.
        let single_frame = self.track.count_frames() < 2;
        if single_frame && self.single_frame_decoded {
            *was_cached = true;
            return Ok(());
        }

        if format.pixel_format != self.format.pixel_format
            || format.bytes_per_row != self.format.bytes_per_row
        {
            self.switch_format(format.pixel_format, format.bytes_per_row)?;
        }

        match self.track.read_frame(buffer) {
            Ok(header) => {
                self.performance_time = header.start_time;
                if single_frame {
                    self.single_frame_decoded = true;
                }
            }
            Err(PlayerError::EndOfStream) if single_frame => {
                self.single_frame_decoded = true;
            }
            Err(error) => {
                if !matches!(error, PlayerError::EndOfStream) {
                    warn!(
                        "MediaTrackVideoSupplier::read_frame() - error while \
                         reading frame of track: {}",
                        error
                    );
                }
                self.current_frame = self.track.current_frame();
                *performance_time = self.performance_time;
                return Err(error);
            }
        }

        self.current_frame = self.track.current_frame();
        *performance_time = self.performance_time;
        Ok(())
    }

    fn find_key_frame_for_frame(&mut self, frame: &mut i64) -> Result<()> {
        if self.track.count_frames() < 2 {
            return Ok(());
        }
        self.track.find_key_frame_backward(frame)
    }

    fn seek_to_time(&mut self, performance_time: &mut i64) -> Result<()> {
        if self.track.count_frames() < 2 {
            return Ok(());
        }
        let requested = *performance_time;
        self.track.seek_to_time(performance_time)?;
        if requested != *performance_time {
            debug!(
                "MediaTrackVideoSupplier::seek_to_time() - seeked by time: \
                 {} -> {}",
                requested, performance_time
            );
        }
        self.performance_time = *performance_time;
        self.current_frame = self.track.current_frame();
        Ok(())
    }

    fn seek_to_frame(&mut self, frame: &mut i64) -> Result<()> {
        if self.track.count_frames() < 2 {
            return Ok(());
        }

        let mut want_frame = *frame;
        if want_frame == self.current_frame {
            return Ok(());
        }

        self.track.find_key_frame_backward(frame)?;
        if want_frame > *frame {
            // Work around a rounding problem with some extractors when
            // converting frames <-> time <-> internal time: when the next
            // frame maps back onto the wanted one, the wanted frame is
            // itself a keyframe.
            let mut next_want_frame = want_frame + 1;
            if self
                .track
                .find_key_frame_backward(&mut next_want_frame)
                .is_ok()
                && next_want_frame == want_frame
            {
                want_frame += 1;
                *frame = want_frame;
            }
        }

        if *frame > want_frame {
            // The container handed back a keyframe after the request.
            return Err(PlayerError::EntryNotFound);
        }

        if *frame <= self.current_frame && want_frame >= self.current_frame {
            // The current frame is already closer to the wanted frame than
            // the keyframe before it.
            *frame = self.current_frame;
            return Ok(());
        }

        self.track.seek_to_frame(frame)?;

        self.current_frame = *frame;
        self.performance_time = self.track.current_time();
        Ok(())
    }

    fn position(&self) -> i64 {
        self.performance_time
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn current_frame(&self) -> i64 {
        self.current_frame
    }

    fn track_index(&self) -> i32 {
        self.track_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::test_support::FakeVideoTrack;

    fn supplier_with_keyframes(
        count_frames: i64,
        keyframes: Vec<i64>,
    ) -> MediaTrackVideoSupplier {
        MediaTrackVideoSupplier::new(Box::new(FakeVideoTrack::new(count_frames, keyframes)), 0)
            .unwrap()
    }

    #[test]
    fn seek_snaps_to_the_backward_keyframe() {
        let mut supplier = supplier_with_keyframes(120, vec![0, 30, 60, 90]);
        let mut frame = 70;
        supplier.seek_to_frame(&mut frame).unwrap();
        assert_eq!(frame, 60);
        assert_eq!(supplier.current_frame(), 60);

        // The next read yields the keyframe itself.
        let format = *supplier.format();
        let mut buffer = vec![0u8; format.frame_size()];
        let mut pts = 0;
        let mut was_cached = false;
        supplier
            .read_frame(&mut buffer, &mut pts, &format, &mut was_cached)
            .unwrap();
        assert_eq!(buffer[0], 60);
        assert!(!was_cached);
    }

    #[test]
    fn returned_keyframe_never_exceeds_the_request() {
        let mut supplier = supplier_with_keyframes(120, vec![0, 30, 60, 90]);
        for request in [0i64, 29, 30, 89, 119] {
            let mut frame = request;
            supplier.find_key_frame_for_frame(&mut frame).unwrap();
            assert!(frame <= request, "keyframe {} for request {}", frame, request);
        }
    }

    #[test]
    fn seek_keeps_the_cursor_when_it_is_closer() {
        let mut supplier = supplier_with_keyframes(120, vec![0, 30, 60, 90]);
        let mut frame = 65;
        supplier.seek_to_frame(&mut frame).unwrap();
        assert_eq!(frame, 60);

        // Decode up to frame 70, then ask for 75: the cursor (70) is closer
        // than the keyframe (60).
        let format = *supplier.format();
        let mut buffer = vec![0u8; format.frame_size()];
        let mut pts = 0;
        let mut was_cached = false;
        for _ in 0..10 {
            supplier
                .read_frame(&mut buffer, &mut pts, &format, &mut was_cached)
                .unwrap();
        }
        assert_eq!(supplier.current_frame(), 70);
        let mut frame = 75;
        supplier.seek_to_frame(&mut frame).unwrap();
        assert_eq!(frame, 70);
        assert_eq!(supplier.current_frame(), 70);
    }

    #[test]
    fn single_frame_media_is_cached_after_the_first_decode() {
        let mut supplier = supplier_with_keyframes(1, vec![0]);
        let format = *supplier.format();
        let mut buffer = vec![0u8; format.frame_size()];
        let mut pts = 0;
        let mut was_cached = false;
        supplier
            .read_frame(&mut buffer, &mut pts, &format, &mut was_cached)
            .unwrap();
        assert!(!was_cached);

        supplier
            .read_frame(&mut buffer, &mut pts, &format, &mut was_cached)
            .unwrap();
        assert!(was_cached);

        // Seeks on single frame media are no-ops.
        let mut frame = 5;
        supplier.seek_to_frame(&mut frame).unwrap();
        assert_eq!(frame, 5);
    }

    #[test]
    fn codec_forced_pixel_format_is_adopted() {
        let mut track = FakeVideoTrack::new(10, vec![0]);
        track.forced_pixel_format = Some(PixelFormat::Rgb32);
        let supplier = MediaTrackVideoSupplier::new(Box::new(track), 0).unwrap();
        assert_eq!(supplier.pixel_format(), PixelFormat::Rgb32);
        assert_eq!(supplier.bytes_per_row(), 8 * 4);
    }
}
