//! Decoder-facing track interfaces.
//!
//! These traits are the seam between the supplier stack and whatever
//! actually demuxes and decodes a container track. Audio tracks are backed
//! by symphonia; video decoding is an external collaborator, so video tracks
//! arrive through this trait from outside (or from the static image track).

use crate::error::Result;
use crate::media_format::{
    CodecInfo, EncodedAudioFormat, EncodedVideoFormat, RawAudioFormat, RawVideoFormat,
};

/// Header data accompanying one decoded video frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameHeader {
    /// Presentation time of the frame, in microseconds.
    pub start_time: i64,
}

/// A decodable audio track inside an opened container.
///
/// The track keeps a frame cursor: `read_frames` decodes from the cursor and
/// advances it, `seek_to_frame` moves it to the closest preceding position
/// the container can decode from.
pub trait AudioDecodingTrack: Send {
    /// Negotiates the decoded format. `proposed.buffer_size` is a hint; the
    /// returned format carries the actual transfer buffer size.
    fn decoded_format(&mut self, proposed: &RawAudioFormat) -> Result<RawAudioFormat>;

    fn encoded_format(&self) -> EncodedAudioFormat;

    fn codec_info(&self) -> CodecInfo;

    /// Total frame count, 0 when unknown.
    fn count_frames(&self) -> i64;

    fn current_frame(&self) -> i64;

    /// Track duration in microseconds.
    fn duration(&self) -> i64;

    /// Rewrites `frame` to the closest keyframe at or before it, without
    /// moving the cursor.
    fn find_key_frame_backward(&self, frame: &mut i64) -> Result<()>;

    /// Seeks the cursor; `frame` is rewritten to the frame actually reached.
    fn seek_to_frame(&mut self, frame: &mut i64) -> Result<()>;

    /// Decodes from the cursor into `buffer` (a whole number of frames);
    /// returns the number of frames produced. Zero frames means the end of
    /// the track.
    fn read_frames(&mut self, buffer: &mut [u8]) -> Result<i64>;
}

/// A decodable video track inside an opened container.
pub trait VideoDecodingTrack: Send {
    fn encoded_format(&self) -> EncodedVideoFormat;

    fn codec_info(&self) -> CodecInfo;

    /// Negotiates the decoded format; the decoder may rewrite fields.
    fn decoded_format(&mut self, proposed: &RawVideoFormat) -> Result<RawVideoFormat>;

    fn count_frames(&self) -> i64;

    fn current_frame(&self) -> i64;

    /// Current cursor position in microseconds.
    fn current_time(&self) -> i64;

    fn duration(&self) -> i64;

    fn find_key_frame_backward(&self, frame: &mut i64) -> Result<()>;

    fn seek_to_frame(&mut self, frame: &mut i64) -> Result<()>;

    fn seek_to_time(&mut self, time: &mut i64) -> Result<()>;

    /// Decodes exactly one frame at the cursor into `buffer` and advances.
    fn read_frame(&mut self, buffer: &mut [u8]) -> Result<FrameHeader>;
}
