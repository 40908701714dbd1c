//! Page handles, quality modes and the collaborator traits
//!
//! A [`DocumentSource`] hands out opaque [`PageHandle`]s; a [`PageRenderer`]
//! turns a handle into pixels at a [`TargetSize`] chosen for a
//! [`QualityMode`].

use std::fmt;
use std::sync::Arc;

use crate::error::{RenderError, RenderResult};
use crate::surface::RenderedImage;

/// Default longest side, in pixels, of a preview render
pub const DEFAULT_PREVIEW_MAX_DIMENSION: u32 = 512;

/// Default longest side, in pixels, of an export render
pub const DEFAULT_EXPORT_MAX_DIMENSION: u32 = 2048;

/// Render quality mode
///
/// Two modes of the same page are distinct cache entries because their
/// pixel content differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityMode {
    /// Small, lossy, fast. Used for on-screen display and thumbnails.
    Preview,

    /// Large, high fidelity. Used for export and zoomed-in display.
    Export,
}

impl QualityMode {
    /// Longest side in pixels when no explicit limit is configured
    pub fn default_max_dimension(self) -> u32 {
        match self {
            QualityMode::Preview => DEFAULT_PREVIEW_MAX_DIMENSION,
            QualityMode::Export => DEFAULT_EXPORT_MAX_DIMENSION,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityMode::Preview => "preview",
            QualityMode::Export => "export",
        }
    }
}

impl fmt::Display for QualityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QualityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preview" => Ok(QualityMode::Preview),
            "export" => Ok(QualityMode::Export),
            other => Err(format!("unknown quality mode '{other}'")),
        }
    }
}

/// Page extent in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBounds {
    pub width: f32,
    pub height: f32,
}

impl PageBounds {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// US Letter, the fallback size most PDF backends assume
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    /// Check that the page has a positive, finite extent
    pub fn validate(&self, page: usize) -> RenderResult<()> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if valid(self.width) && valid(self.height) {
            Ok(())
        } else {
            Err(RenderError::InvalidPageBounds { page, width: self.width, height: self.height })
        }
    }
}

/// Pixel size a page is rendered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale `bounds` so its longer side equals `max_dimension`, keeping the
    /// aspect ratio. Each side is at least one pixel.
    pub fn fit(bounds: PageBounds, max_dimension: u32) -> Self {
        let longest = bounds.width.max(bounds.height);
        let scale = max_dimension.max(1) as f32 / longest;
        let width = (bounds.width * scale).round().max(1.0) as u32;
        let height = (bounds.height * scale).round().max(1.0) as u32;
        Self { width, height }
    }

    /// Decoded RGBA size in bytes
    pub fn byte_cost(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Opaque renderable page
///
/// Carries the page index, its bounds and the raw page content as handed
/// out by the document source. Cloning shares the content buffer.
#[derive(Debug, Clone)]
pub struct PageHandle {
    pub index: usize,
    pub bounds: PageBounds,
    pub content: Arc<[u8]>,
}

impl PageHandle {
    pub fn new(index: usize, bounds: PageBounds, content: impl Into<Arc<[u8]>>) -> Self {
        Self { index, bounds, content: content.into() }
    }
}

/// A paginated document the pipeline can render from
pub trait DocumentSource: Send + Sync {
    /// Number of pages in the document
    fn page_count(&self) -> usize;

    /// Handle for the page at `index`
    ///
    /// Implementations return [`RenderError::PageOutOfRange`] for indices
    /// past the end of the document.
    fn page(&self, index: usize) -> RenderResult<PageHandle>;
}

/// The render primitive
///
/// Stateless per call and synchronous: the pipeline always invokes it from
/// a blocking worker thread, never from the async runtime.
pub trait PageRenderer: Send + Sync {
    fn render(
        &self,
        page: &PageHandle,
        target: TargetSize,
        mode: QualityMode,
    ) -> RenderResult<RenderedImage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_landscape_and_portrait() {
        let portrait = TargetSize::fit(PageBounds::letter(), 512);
        assert_eq!(portrait.height, 512);
        assert_eq!(portrait.width, 396);

        let landscape = TargetSize::fit(PageBounds::new(792.0, 612.0), 2048);
        assert_eq!(landscape.width, 2048);
        assert_eq!(landscape.height, 1583);
    }

    #[test]
    fn test_fit_never_returns_zero_side() {
        let sliver = TargetSize::fit(PageBounds::new(10_000.0, 0.5), 256);
        assert_eq!(sliver.width, 256);
        assert_eq!(sliver.height, 1);
    }

    #[test]
    fn test_validate_bounds() {
        assert!(PageBounds::letter().validate(0).is_ok());
        assert!(matches!(
            PageBounds::new(0.0, 100.0).validate(3),
            Err(RenderError::InvalidPageBounds { page: 3, .. })
        ));
        assert!(PageBounds::new(100.0, -1.0).validate(0).is_err());
        assert!(PageBounds::new(f32::NAN, 100.0).validate(0).is_err());
        assert!(PageBounds::new(f32::INFINITY, 100.0).validate(0).is_err());
    }

    #[test]
    fn test_quality_mode_parse() {
        assert_eq!("Preview".parse::<QualityMode>(), Ok(QualityMode::Preview));
        assert_eq!("export".parse::<QualityMode>(), Ok(QualityMode::Export));
        assert!("crisp".parse::<QualityMode>().is_err());
    }

    #[test]
    fn test_byte_cost() {
        assert_eq!(TargetSize::new(256, 256).byte_cost(), 256 * 256 * 4);
    }
}
