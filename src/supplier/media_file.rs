//! Container aggregation and the symphonia-backed audio track.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::{PlayerError, Result};
use crate::media_format::{
    ByteOrder, CodecInfo, EncodedAudioFormat, FileFormatInfo, RawAudioFormat, SampleFormat,
};
use crate::supplier::audio_track::{AudioTrackSupplier, MediaTrackAudioSupplier};
use crate::supplier::image_track::ImageTrackVideoSupplier;
use crate::supplier::media_track::{AudioDecodingTrack, VideoDecodingTrack};
use crate::supplier::subtitles::SubTitles;
use crate::supplier::video_track::{MediaTrackVideoSupplier, VideoTrackSupplier};

/// Produces per-track suppliers for one opened playlist item. Owned by the
/// coordinator; destroying it invalidates nothing that was already created,
/// since created suppliers own their own decoding state.
pub trait TrackSupplier: Send {
    fn file_format_info(&self) -> FileFormatInfo;

    fn copyright(&self) -> Option<String>;

    fn meta_data(&self) -> &HashMap<String, String>;

    fn count_audio_tracks(&self) -> usize;

    fn count_video_tracks(&self) -> usize;

    fn count_sub_title_tracks(&self) -> usize;

    fn audio_meta_data(&self, index: usize) -> Result<HashMap<String, String>>;

    fn video_meta_data(&self, index: usize) -> Result<HashMap<String, String>>;

    fn create_audio_track_for_index(&self, index: usize) -> Option<Box<dyn AudioTrackSupplier>>;

    fn create_video_track_for_index(&self, index: usize) -> Option<Box<dyn VideoTrackSupplier>>;

    /// Borrowed reference; the track stays owned by the supplier.
    fn sub_title_track_for_index(&self, index: usize) -> Option<&SubTitles>;
}

/// Creates a fresh decoding track for a container video track. Video codecs
/// are external collaborators; whoever can decode a container's video
/// registers a factory here.
pub type VideoTrackFactory =
    Box<dyn Fn() -> Result<Box<dyn VideoDecodingTrack>> + Send + Sync>;

struct AudioTrackRef {
    path: PathBuf,
    track_id: u32,
}

/// Aggregates one or more media files plus optional static bitmaps (cover
/// art) and subtitle tracks. Attributes and metadata come from the first
/// file; audio and video tracks are indexed across all attached files in
/// insertion order.
pub struct MediaFileTrackSupplier {
    files: Vec<PathBuf>,
    file_format: FileFormatInfo,
    copyright: Option<String>,
    meta_data: HashMap<String, String>,
    audio_tracks: Vec<AudioTrackRef>,
    video_tracks: Vec<VideoTrackFactory>,
    bitmaps: Vec<(Vec<u8>, u32, u32)>,
    sub_title_tracks: Vec<SubTitles>,
}

impl MediaFileTrackSupplier {
    pub fn new() -> MediaFileTrackSupplier {
        MediaFileTrackSupplier {
            files: Vec::new(),
            file_format: FileFormatInfo::default(),
            copyright: None,
            meta_data: HashMap::new(),
            audio_tracks: Vec::new(),
            video_tracks: Vec::new(),
            bitmaps: Vec::new(),
            sub_title_tracks: Vec::new(),
        }
    }

    /// Opens `path` and attaches every usable track.
    pub fn open(path: &Path) -> Result<MediaFileTrackSupplier> {
        let mut supplier = MediaFileTrackSupplier::new();
        supplier.add_media_file(path)?;
        Ok(supplier)
    }

    pub fn add_media_file(&mut self, path: &Path) -> Result<()> {
        let mut reader = probe_file(path)?;
        let mut added = false;
        for track in reader.tracks() {
            if track.codec_params.codec == CODEC_TYPE_NULL {
                debug!(
                    "MediaFileTrackSupplier: track {} of {:?} has no known \
                     codec",
                    track.id, path
                );
                continue;
            }
            if track.codec_params.sample_rate.is_none() {
                warn!(
                    "MediaFileTrackSupplier: track {} of {:?} has no sample \
                     rate",
                    track.id, path
                );
                continue;
            }
            self.audio_tracks.push(AudioTrackRef {
                path: path.to_path_buf(),
                track_id: track.id,
            });
            added = true;
        }

        if self.files.is_empty() {
            self.file_format = file_format_for_path(path);
            let mut meta = HashMap::new();
            if let Some(revision) = reader.metadata().current() {
                for tag in revision.tags() {
                    if tag.std_key == Some(StandardTagKey::Copyright) {
                        self.copyright = Some(tag.value.to_string());
                    }
                    meta.insert(tag.key.clone(), tag.value.to_string());
                }
            }
            self.meta_data = meta;
        }

        if !added && self.video_tracks.is_empty() {
            return Err(PlayerError::NoHandler);
        }
        self.files.push(path.to_path_buf());
        Ok(())
    }

    pub fn add_video_track_factory(&mut self, factory: VideoTrackFactory) {
        self.video_tracks.push(factory);
    }

    pub fn add_bitmap(&mut self, bitmap: Vec<u8>, width: u32, height: u32) {
        self.bitmaps.push((bitmap, width, height));
    }

    pub fn add_sub_titles(&mut self, sub_titles: SubTitles) {
        self.sub_title_tracks.push(sub_titles);
    }
}

impl TrackSupplier for MediaFileTrackSupplier {
    fn file_format_info(&self) -> FileFormatInfo {
        self.file_format.clone()
    }

    fn copyright(&self) -> Option<String> {
        self.copyright.clone()
    }

    fn meta_data(&self) -> &HashMap<String, String> {
        &self.meta_data
    }

    fn count_audio_tracks(&self) -> usize {
        self.audio_tracks.len()
    }

    fn count_video_tracks(&self) -> usize {
        self.video_tracks.len() + self.bitmaps.len()
    }

    fn count_sub_title_tracks(&self) -> usize {
        self.sub_title_tracks.len()
    }

    fn audio_meta_data(&self, index: usize) -> Result<HashMap<String, String>> {
        if index >= self.audio_tracks.len() {
            return Err(PlayerError::BadIndex);
        }
        // Per-track metadata comes from the shared container metadata.
        Ok(self.meta_data.clone())
    }

    fn video_meta_data(&self, index: usize) -> Result<HashMap<String, String>> {
        if index >= self.count_video_tracks() {
            return Err(PlayerError::BadIndex);
        }
        Ok(self.meta_data.clone())
    }

    fn create_audio_track_for_index(&self, index: usize) -> Option<Box<dyn AudioTrackSupplier>> {
        let track_ref = self.audio_tracks.get(index)?;
        let track = match SymphoniaAudioTrack::open(&track_ref.path, track_ref.track_id) {
            Ok(track) => track,
            Err(error) => {
                warn!(
                    "MediaFileTrackSupplier: opening audio track {} failed: {}",
                    index, error
                );
                return None;
            }
        };
        match MediaTrackAudioSupplier::new(Box::new(track), index as i32) {
            Ok(supplier) => Some(Box::new(supplier)),
            Err(error) => {
                warn!(
                    "MediaFileTrackSupplier: audio supplier for track {} \
                     failed: {}",
                    index, error
                );
                None
            }
        }
    }

    fn create_video_track_for_index(&self, index: usize) -> Option<Box<dyn VideoTrackSupplier>> {
        if index < self.video_tracks.len() {
            let track = match (self.video_tracks[index])() {
                Ok(track) => track,
                Err(error) => {
                    warn!(
                        "MediaFileTrackSupplier: opening video track {} \
                         failed: {}",
                        index, error
                    );
                    return None;
                }
            };
            return match MediaTrackVideoSupplier::new(track, index as i32) {
                Ok(supplier) => Some(Box::new(supplier)),
                Err(error) => {
                    warn!(
                        "MediaFileTrackSupplier: video supplier for track {} \
                         failed: {}",
                        index, error
                    );
                    None
                }
            };
        }

        let bitmap_index = index - self.video_tracks.len();
        let (bitmap, width, height) = self.bitmaps.get(bitmap_index)?;
        match ImageTrackVideoSupplier::new(bitmap.clone(), *width, *height, index as i32) {
            Ok(supplier) => Some(Box::new(supplier)),
            Err(error) => {
                warn!(
                    "MediaFileTrackSupplier: image track {} failed: {}",
                    index, error
                );
                None
            }
        }
    }

    fn sub_title_track_for_index(&self, index: usize) -> Option<&SubTitles> {
        self.sub_title_tracks.get(index)
    }
}

fn probe_file(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file = File::open(path)?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }
    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

fn file_format_for_path(path: &Path) -> FileFormatInfo {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let (pretty, mime) = match extension.as_str() {
        "mp3" => ("MPEG audio", "audio/mpeg"),
        "flac" => ("FLAC", "audio/flac"),
        "ogg" | "oga" => ("Ogg", "audio/ogg"),
        "opus" => ("Ogg Opus", "audio/opus"),
        "wav" => ("WAVE", "audio/x-wav"),
        "m4a" | "mp4" | "m4v" | "mov" => ("MPEG-4", "video/mp4"),
        "mkv" => ("Matroska", "video/x-matroska"),
        "webm" => ("WebM", "video/webm"),
        "aiff" | "aif" => ("AIFF", "audio/aiff"),
        "caf" => ("Core Audio Format", "audio/x-caf"),
        _ => ("media file", "application/octet-stream"),
    };
    FileFormatInfo {
        pretty_name: pretty.to_string(),
        short_name: extension,
        mime_type: mime.to_string(),
    }
}

// #
// # Symphonia-backed audio decoding track
// #

pub struct SymphoniaAudioTrack {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    codec_params: CodecParameters,
    track_id: u32,
    sample_rate: u32,
    channel_count: u32,
    time_base: Option<TimeBase>,
    format: RawAudioFormat,
    cursor: i64,
    /// Interleaved f32 bytes decoded past the end of the last read.
    leftover: Vec<u8>,
}

impl SymphoniaAudioTrack {
    pub fn open(path: &Path, track_id: u32) -> Result<SymphoniaAudioTrack> {
        let reader = probe_file(path)?;
        let track = reader
            .tracks()
            .iter()
            .find(|track| track.id == track_id)
            .ok_or(PlayerError::BadIndex)?;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.ok_or(PlayerError::BadFormat)?;
        let channel_count = codec_params
            .channels
            .map(|channels| channels.count() as u32)
            .ok_or(PlayerError::BadFormat)?;
        if channel_count == 0 {
            return Err(PlayerError::BadFormat);
        }
        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|_| PlayerError::NoHandler)?;
        let time_base = codec_params.time_base;
        let format = RawAudioFormat {
            sample_format: SampleFormat::F32,
            byte_order: ByteOrder::host(),
            frame_rate: sample_rate as f64,
            channel_count,
            buffer_size: 16384,
        };
        Ok(SymphoniaAudioTrack {
            reader,
            decoder,
            codec_params,
            track_id,
            sample_rate,
            channel_count,
            time_base,
            format,
            cursor: 0,
            leftover: Vec::new(),
        })
    }

    fn frame_size(&self) -> usize {
        self.channel_count as usize * 4
    }

    fn frames_for_timestamp(&self, ts: u64) -> i64 {
        match self.time_base {
            Some(time_base) => {
                let time = time_base.calc_time(ts);
                ((time.seconds as f64 + time.frac) * self.sample_rate as f64) as i64
            }
            None => ts as i64,
        }
    }
}

impl AudioDecodingTrack for SymphoniaAudioTrack {
    fn decoded_format(&mut self, proposed: &RawAudioFormat) -> Result<RawAudioFormat> {
        let frame_size = self.frame_size();
        let min_size = self
            .codec_params
            .max_frames_per_packet
            .map(|frames| frames as usize * frame_size)
            .unwrap_or(0);
        self.format.buffer_size = proposed.buffer_size.max(min_size);
        // Keep whole frames per transfer buffer.
        self.format.buffer_size -= self.format.buffer_size % frame_size;
        Ok(self.format)
    }

    fn encoded_format(&self) -> EncodedAudioFormat {
        let codec = symphonia::default::get_codecs()
            .get_codec(self.codec_params.codec)
            .map(|descriptor| descriptor.short_name.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        EncodedAudioFormat {
            codec,
            frame_rate: self.sample_rate as f64,
            channel_count: self.channel_count,
            bit_rate: 0,
        }
    }

    fn codec_info(&self) -> CodecInfo {
        match symphonia::default::get_codecs().get_codec(self.codec_params.codec) {
            Some(descriptor) => CodecInfo {
                pretty_name: descriptor.long_name.to_string(),
                short_name: descriptor.short_name.to_string(),
            },
            None => CodecInfo::default(),
        }
    }

    fn count_frames(&self) -> i64 {
        self.codec_params.n_frames.unwrap_or(0) as i64
    }

    fn current_frame(&self) -> i64 {
        self.cursor
    }

    fn duration(&self) -> i64 {
        match self.codec_params.n_frames {
            Some(frames) => (frames as f64 * 1_000_000.0 / self.sample_rate as f64) as i64,
            None => 0,
        }
    }

    fn find_key_frame_backward(&self, _frame: &mut i64) -> Result<()> {
        // Every position is seekable; the coarse seek itself lands on the
        // closest preceding packet boundary.
        Ok(())
    }

    fn seek_to_frame(&mut self, frame: &mut i64) -> Result<()> {
        let seconds = (*frame).max(0) as f64 / self.sample_rate as f64;
        let time = Time {
            seconds: seconds as u64,
            frac: seconds.fract(),
        };
        let seeked = self.reader.seek(
            SeekMode::Coarse,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();
        self.leftover.clear();
        self.cursor = self.frames_for_timestamp(seeked.actual_ts);
        *frame = self.cursor;
        Ok(())
    }

    fn read_frames(&mut self, buffer: &mut [u8]) -> Result<i64> {
        use symphonia::core::audio::SampleBuffer;
        use symphonia::core::errors::Error;

        let frame_size = self.frame_size();
        let capacity = buffer.len() - buffer.len() % frame_size;
        let mut written = 0usize;

        if !self.leftover.is_empty() {
            let take = self.leftover.len().min(capacity);
            buffer[..take].copy_from_slice(&self.leftover[..take]);
            self.leftover.drain(..take);
            written = take;
        }

        while written == 0 {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(io))
                    if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Err(PlayerError::EndOfStream);
                }
                Err(error) => return Err(error.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let duration = decoded.capacity() as u64;
                    let mut samples = SampleBuffer::<f32>::new(duration, spec);
                    samples.copy_interleaved_ref(decoded);
                    let bytes: Vec<u8> = samples
                        .samples()
                        .iter()
                        .flat_map(|sample| sample.to_ne_bytes())
                        .collect();
                    let take = bytes.len().min(capacity - written);
                    buffer[written..written + take].copy_from_slice(&bytes[..take]);
                    self.leftover.extend_from_slice(&bytes[take..]);
                    written += take;
                }
                Err(Error::DecodeError(message)) => {
                    warn!("decode error (skipping packet): {}", message);
                }
                Err(Error::ResetRequired) => {
                    debug!("SymphoniaAudioTrack: reset required, re-creating decoder");
                    self.decoder = symphonia::default::get_codecs()
                        .make(&self.codec_params, &DecoderOptions::default())
                        .map_err(|_| PlayerError::NoHandler)?;
                }
                Err(error) => return Err(error.into()),
            }
        }

        let frames = (written / frame_size) as i64;
        self.cursor += frames;
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::test_support::FakeVideoTrack;

    #[test]
    fn bitmap_tracks_index_after_container_video_tracks() {
        let mut supplier = MediaFileTrackSupplier::new();
        supplier
            .add_video_track_factory(Box::new(|| Ok(Box::new(FakeVideoTrack::new(10, vec![0])))));
        supplier.add_bitmap(vec![0u8; 4 * 4 * 4], 4, 4);
        assert_eq!(supplier.count_video_tracks(), 2);

        let container = supplier.create_video_track_for_index(0).unwrap();
        assert_eq!(container.codec_info().short_name, "fake");
        let artwork = supplier.create_video_track_for_index(1).unwrap();
        assert_eq!(artwork.codec_info().short_name, "artwork");
        assert!(supplier.create_video_track_for_index(2).is_none());
    }

    #[test]
    fn subtitle_tracks_are_borrowed_by_index() {
        let mut supplier = MediaFileTrackSupplier::new();
        supplier.add_sub_titles(SubTitles::new("english"));
        supplier.add_sub_titles(SubTitles::new("german"));
        assert_eq!(supplier.count_sub_title_tracks(), 2);
        assert_eq!(supplier.sub_title_track_for_index(1).unwrap().name(), "german");
        assert!(supplier.sub_title_track_for_index(2).is_none());
    }

    #[test]
    fn opening_a_missing_file_fails() {
        assert!(MediaFileTrackSupplier::open(Path::new("/nonexistent/file.mp3")).is_err());
    }
}
