//! Rendered page pixels

use std::sync::Arc;

use image::{ImageBuffer, Rgba};

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Pixels produced by the render primitive
///
/// The buffer is reference counted: clones share one allocation, so every
/// caller waiting on the same render receives the identical image.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pixels: Arc<RgbaImage>,
}

impl RenderedImage {
    pub fn new(image: RgbaImage) -> Self {
        Self { pixels: Arc::new(image) }
    }

    /// Wrap a raw RGBA buffer. Returns `None` if the buffer length does not
    /// match `width * height * 4`.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        RgbaImage::from_raw(width, height, pixels).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Approximate decoded size in bytes
    pub fn byte_cost(&self) -> usize {
        self.width() as usize * self.height() as usize * 4
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Whether two handles point at the same pixel buffer
    pub fn ptr_eq(&self, other: &RenderedImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}
