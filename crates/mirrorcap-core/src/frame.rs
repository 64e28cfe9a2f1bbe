//! Frame representation for decoded screen images
//!
//! The protocol layer never names a concrete image type: payloads are turned
//! into [`FrameImage`] handles by an [`ImageCodec`], so the codec can be swapped
//! without touching the decoder.

use crate::{Error, Result};
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::sync::Arc;

/// Decoded still image with pixel access
pub trait FrameImage: Send + Sync {
    /// Image width in pixels
    fn width(&self) -> u32;
    /// Image height in pixels
    fn height(&self) -> u32;
    /// RGBA value at `(x, y)`, or `None` when out of bounds
    fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]>;
}

impl FrameImage for DynamicImage {
    fn width(&self) -> u32 {
        GenericImageView::width(self)
    }

    fn height(&self) -> u32 {
        GenericImageView::height(self)
    }

    fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= GenericImageView::width(self) || y >= GenericImageView::height(self) {
            return None;
        }
        Some(self.get_pixel(x, y).0)
    }
}

/// Turns one length-delimited payload into an image
pub trait ImageCodec: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Arc<dyn FrameImage>>;
}

/// JPEG codec backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn decode(&self, payload: &[u8]) -> Result<Arc<dyn FrameImage>> {
        let image = image::load_from_memory_with_format(payload, ImageFormat::Jpeg)
            .map_err(|e| Error::FrameDecode(e.to_string()))?;
        Ok(Arc::new(image))
    }
}

/// A decoded frame from the capture agent
#[derive(Clone)]
pub struct Frame {
    image: Arc<dyn FrameImage>,
    /// Arrival order, assigned locally
    pub sequence: u64,
    /// Timestamp in microseconds
    pub timestamp_us: u64,
}

impl Frame {
    /// Wrap a decoded image
    pub fn new(image: Arc<dyn FrameImage>, sequence: u64) -> Self {
        let timestamp_us = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        Self {
            image,
            sequence,
            timestamp_us,
        }
    }

    /// The decoded image
    pub fn image(&self) -> &dyn FrameImage {
        self.image.as_ref()
    }

    /// Frame width
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Whether both frames share the same decoded image
    pub fn same_image(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}
