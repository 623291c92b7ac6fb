//! Static image presented as a video track (cover art).

use std::path::Path;

use crate::error::{PlayerError, Result};
use crate::media_format::{CodecInfo, EncodedVideoFormat, PixelFormat, RawVideoFormat};
use crate::supplier::video_track::VideoTrackSupplier;

/// Presents one bitmap as an endlessly repeating 25 Hz video stream. All
/// seeks succeed trivially; every read delivers the same pixels.
pub struct ImageTrackVideoSupplier {
    format: RawVideoFormat,
    bitmap: Vec<u8>,
    performance_time: i64,
    current_frame: i64,
    track_index: i32,
}

impl ImageTrackVideoSupplier {
    /// Wraps 32 bit per pixel bitmap data; `bitmap` holds
    /// `width * 4 * height` bytes.
    pub fn new(bitmap: Vec<u8>, width: u32, height: u32, track_index: i32) -> Result<ImageTrackVideoSupplier> {
        if bitmap.len() != width as usize * height as usize * 4 {
            return Err(PlayerError::BadInput);
        }
        Ok(ImageTrackVideoSupplier {
            format: RawVideoFormat {
                pixel_format: PixelFormat::Rgb32,
                display_width: width,
                display_height: height,
                bytes_per_row: width * 4,
                field_rate: 0.0,
                pixel_width_aspect: 1,
                pixel_height_aspect: 1,
            },
            bitmap,
            performance_time: 0,
            current_frame: 0,
            track_index,
        })
    }

    /// Decodes an image file into a supplier.
    pub fn open(path: &Path, track_index: i32) -> Result<ImageTrackVideoSupplier> {
        let image = image::open(path)
            .map_err(|error| PlayerError::Decode(error.to_string()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        ImageTrackVideoSupplier::new(image.into_raw(), width, height, track_index)
    }
}

impl VideoTrackSupplier for ImageTrackVideoSupplier {
    fn format(&self) -> &RawVideoFormat {
        &self.format
    }

    fn encoded_format(&self) -> EncodedVideoFormat {
        EncodedVideoFormat {
            codec: "artwork".to_string(),
            display_width: self.format.display_width,
            display_height: self.format.display_height,
            field_rate: self.format.field_rate,
            pixel_format: self.format.pixel_format,
            bit_rate: 0,
        }
    }

    fn codec_info(&self) -> CodecInfo {
        CodecInfo {
            pretty_name: "Artwork (static image)".to_string(),
            short_name: "artwork".to_string(),
        }
    }

    fn read_frame(
        &mut self,
        buffer: &mut [u8],
        performance_time: &mut i64,
        format: &RawVideoFormat,
        _was_cached: &mut bool,
    ) -> Result<()> {
        let length = (format.bytes_per_row as usize * format.display_height as usize)
            .min(self.bitmap.len())
            .min(buffer.len());
        buffer[..length].copy_from_slice(&self.bitmap[..length]);
        *performance_time = self.performance_time;
        Ok(())
    }

    fn find_key_frame_for_frame(&mut self, _frame: &mut i64) -> Result<()> {
        Ok(())
    }

    fn seek_to_time(&mut self, _performance_time: &mut i64) -> Result<()> {
        Ok(())
    }

    fn seek_to_frame(&mut self, _frame: &mut i64) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> i64 {
        self.performance_time
    }

    fn duration(&self) -> i64 {
        0
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

    #[test]
    fn every_read_delivers_the_bitmap() {
        let bitmap: Vec<u8> = (0..2u32 * 2 * 4).map(|i| i as u8).collect();
        let mut supplier = ImageTrackVideoSupplier::new(bitmap.clone(), 2, 2, 1).unwrap();
        let format = *supplier.format();
        let mut buffer = vec![0u8; format.frame_size()];
        let mut pts = 0;
        let mut was_cached = false;
        for _ in 0..3 {
            supplier
                .read_frame(&mut buffer, &mut pts, &format, &mut was_cached)
                .unwrap();
            assert_eq!(buffer, bitmap);
        }
        let mut frame = 17;
        supplier.seek_to_frame(&mut frame).unwrap();
        assert_eq!(frame, 17);
        assert_eq!(supplier.track_index(), 1);
    }

    #[test]
    fn mismatched_bitmap_size_is_rejected() {
        assert!(ImageTrackVideoSupplier::new(vec![0u8; 7], 2, 2, 0).is_err());
    }
}
