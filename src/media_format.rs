//! Media format descriptions negotiated between suppliers, converters and
//! the output node.

/// Numeric kind of one raw audio sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I32,
    I16,
    U8,
    I8,
}

impl SampleFormat {
    /// Size of one sample of this kind, in bytes.
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::F32 | SampleFormat::I32 => 4,
            SampleFormat::I16 => 2,
            SampleFormat::U8 | SampleFormat::I8 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    pub fn host() -> ByteOrder {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }
}

/// Raw (decoded) audio format. Immutable once a connection is negotiated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawAudioFormat {
    pub sample_format: SampleFormat,
    pub byte_order: ByteOrder,
    pub frame_rate: f64,
    pub channel_count: u32,
    /// Preferred size of one decode/transfer buffer, in bytes.
    pub buffer_size: usize,
}

impl RawAudioFormat {
    /// Size of one frame (one sample per channel), in bytes.
    pub fn frame_size(&self) -> usize {
        self.sample_format.sample_size() * self.channel_count as usize
    }

    pub fn frame_for_time(&self, time: i64) -> i64 {
        (time as f64 * self.frame_rate / 1_000_000.0) as i64
    }

    pub fn time_for_frame(&self, frame: i64) -> i64 {
        (frame as f64 * 1_000_000.0 / self.frame_rate) as i64
    }
}

/// Pixel layout of one decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Format not negotiated yet.
    NoColorSpace,
    /// 32 bits per pixel RGB.
    Rgb32,
    /// Packed 4:2:2 luma/chroma, 16 bits per pixel.
    YCbCr422,
}

impl PixelFormat {
    /// Smallest legal row size for `width` pixels in this format.
    pub fn min_bytes_per_row(self, width: u32) -> u32 {
        match self {
            // Packed 4:2:2 rows are padded to a 4 byte boundary.
            PixelFormat::YCbCr422 => ((width * 2 + 3) / 4) * 4,
            _ => width * 4,
        }
    }
}

/// Raw (decoded) video format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawVideoFormat {
    pub pixel_format: PixelFormat,
    pub display_width: u32,
    pub display_height: u32,
    pub bytes_per_row: u32,
    pub field_rate: f64,
    pub pixel_width_aspect: u16,
    pub pixel_height_aspect: u16,
}

impl RawVideoFormat {
    pub fn frame_size(&self) -> usize {
        self.bytes_per_row as usize * self.display_height as usize
    }
}

/// Encoded audio track description, as reported by the container.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudioFormat {
    pub codec: String,
    pub frame_rate: f64,
    pub channel_count: u32,
    pub bit_rate: u32,
}

/// Encoded video track description, as reported by the container.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVideoFormat {
    pub codec: String,
    pub display_width: u32,
    pub display_height: u32,
    pub field_rate: f64,
    pub pixel_format: PixelFormat,
    pub bit_rate: u32,
}

/// A negotiated media format, encoded or raw.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFormat {
    EncodedAudio(EncodedAudioFormat),
    RawAudio(RawAudioFormat),
    EncodedVideo(EncodedVideoFormat),
    RawVideo(RawVideoFormat),
}

/// Codec identification for display purposes.
#[derive(Debug, Clone, Default)]
pub struct CodecInfo {
    pub pretty_name: String,
    pub short_name: String,
}

/// Container file format identification.
#[derive(Debug, Clone, Default)]
pub struct FileFormatInfo {
    pub pretty_name: String,
    pub short_name: String,
    pub mime_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_counts_all_channels() {
        let format = RawAudioFormat {
            sample_format: SampleFormat::I16,
            byte_order: ByteOrder::host(),
            frame_rate: 44100.0,
            channel_count: 2,
            buffer_size: 4096,
        };
        assert_eq!(format.frame_size(), 4);
    }

    #[test]
    fn frame_time_round_trip() {
        let format = RawAudioFormat {
            sample_format: SampleFormat::F32,
            byte_order: ByteOrder::host(),
            frame_rate: 48000.0,
            channel_count: 1,
            buffer_size: 4096,
        };
        assert_eq!(format.frame_for_time(1_000_000), 48000);
        assert_eq!(format.time_for_frame(48000), 1_000_000);
        assert_eq!(format.frame_for_time(format.time_for_frame(12345)), 12345);
    }

    #[test]
    fn ycbcr_rows_are_padded() {
        assert_eq!(PixelFormat::YCbCr422.min_bytes_per_row(3), 8);
        assert_eq!(PixelFormat::YCbCr422.min_bytes_per_row(4), 8);
        assert_eq!(PixelFormat::Rgb32.min_bytes_per_row(3), 12);
    }
}
