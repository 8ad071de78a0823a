//! Captured frames and the transport-encoded frames published to readers.

use crate::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

/// One captured RGB frame tagged with its capture sequence number
///
/// Pixels are immutable once captured; transforms produce new frames.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    sequence: u64,
}

impl Frame {
    /// Wrap a captured image
    #[must_use]
    pub const fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Pixel data
    #[must_use]
    pub const fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Capture sequence number
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Whether the frame has no pixels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    /// Horizontally mirrored frame, consuming `self`
    #[must_use]
    pub fn into_mirrored(mut self) -> Self {
        imageops::flip_horizontal_in_place(&mut self.image);
        self
    }
}

/// JPEG-encoded frame ready for incremental transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    sequence: u64,
    width: u32,
    height: u32,
    annotated: bool,
    jpeg: Vec<u8>,
}

impl DisplayFrame {
    /// Encode an image as JPEG
    ///
    /// # Errors
    ///
    /// Returns an error if the JPEG encoder fails
    pub fn encode(image: &RgbImage, sequence: u64, annotated: bool, quality: u8) -> Result<Self> {
        let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
        encoder.encode_image(image)?;
        Ok(Self {
            sequence,
            width: image.width(),
            height: image.height(),
            annotated,
            jpeg,
        })
    }

    /// Sequence number of the source frame
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Width in pixels
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether any overlay was drawn
    #[must_use]
    pub const fn is_annotated(&self) -> bool {
        self.annotated
    }

    /// Encoded bytes
    #[must_use]
    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    /// MIME type of [`DisplayFrame::jpeg`]
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_mirror_flips_columns() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(0, 1, Rgb([255, 0, 0]));
        let frame = Frame::new(image, 7).into_mirrored();
        assert_eq!(frame.sequence(), 7);
        assert_eq!(*frame.image().get_pixel(3, 1), Rgb([255, 0, 0]));
        assert_eq!(*frame.image().get_pixel(0, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let image = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
        let display = DisplayFrame::encode(&image, 5, false, 85).unwrap();
        assert_eq!(display.sequence(), 5);
        assert_eq!((display.width(), display.height()), (32, 24));
        // JPEG SOI marker
        assert_eq!(&display.jpeg()[..2], &[0xFF, 0xD8]);
        assert!(!display.is_annotated());

        let decoded = image::load_from_memory(display.jpeg()).unwrap();
        assert_eq!(decoded.width(), 32);
    }

    #[test]
    fn test_empty_frame() {
        assert!(Frame::new(RgbImage::new(0, 10), 0).is_empty());
        assert!(!Frame::new(RgbImage::new(1, 1), 0).is_empty());
    }
}
