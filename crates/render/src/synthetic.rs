//! Synthetic document and renderer
//!
//! Stand-ins for a real document backend. The CLI uses them to exercise the
//! pipeline without a PDF engine, and tests use the renderer's counters to
//! observe how often the primitive actually ran.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use image::Rgba;

use crate::error::{RenderError, RenderResult};
use crate::page::{DocumentSource, PageBounds, PageHandle, PageRenderer, QualityMode, TargetSize};
use crate::surface::{RenderedImage, RgbaImage};

/// In-memory document whose page content is just the page index
#[derive(Debug, Clone)]
pub struct SyntheticDocument {
    pages: Vec<PageBounds>,
}

impl SyntheticDocument {
    /// A document of `page_count` pages that all share `bounds`
    pub fn uniform(page_count: usize, bounds: PageBounds) -> Self {
        Self { pages: vec![bounds; page_count] }
    }

    /// A document of `page_count` US Letter pages
    pub fn letter(page_count: usize) -> Self {
        Self::uniform(page_count, PageBounds::letter())
    }

    /// Override the bounds of one page
    pub fn with_page_bounds(mut self, index: usize, bounds: PageBounds) -> Self {
        if let Some(page) = self.pages.get_mut(index) {
            *page = bounds;
        }
        self
    }
}

impl DocumentSource for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page(&self, index: usize) -> RenderResult<PageHandle> {
        let bounds = self.pages.get(index).copied().ok_or(RenderError::PageOutOfRange {
            page: index,
            page_count: self.pages.len(),
        })?;
        let content = (index as u64).to_le_bytes().to_vec();
        Ok(PageHandle::new(index, bounds, content))
    }
}

/// Renderer that fills the target with a colour derived from the page content
///
/// Counts every call and tracks the peak number of concurrent calls.
#[derive(Debug, Default)]
pub struct SyntheticRenderer {
    delay: Option<Duration>,
    failing_pages: HashSet<usize>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SyntheticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every render call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make renders of `page` fail with a decode failure
    pub fn with_failing_page(mut self, page: usize) -> Self {
        self.failing_pages.insert(page);
        self
    }

    /// Total number of render calls so far
    pub fn render_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of render calls that overlapped in time
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn colour_for(content: &[u8]) -> Rgba<u8> {
        let seed = content.iter().fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u32));
        Rgba([(seed % 251) as u8, (seed / 7 % 241) as u8, (seed / 13 % 239) as u8, 255])
    }
}

impl PageRenderer for SyntheticRenderer {
    fn render(
        &self,
        page: &PageHandle,
        target: TargetSize,
        _mode: QualityMode,
    ) -> RenderResult<RenderedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let result = if self.failing_pages.contains(&page.index) {
            Err(RenderError::DecodeFailure(format!("synthetic failure on page {}", page.index)))
        } else {
            let colour = Self::colour_for(&page.content);
            Ok(RenderedImage::new(RgbaImage::from_pixel(target.width, target.height, colour)))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_pages() {
        let doc = SyntheticDocument::letter(3);
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.page(2).unwrap().index, 2);
        assert_eq!(
            doc.page(3).unwrap_err(),
            RenderError::PageOutOfRange { page: 3, page_count: 3 }
        );
    }

    #[test]
    fn test_renderer_fills_target() {
        let doc = SyntheticDocument::letter(1);
        let renderer = SyntheticRenderer::new();
        let page = doc.page(0).unwrap();

        let image = renderer.render(&page, TargetSize::new(8, 10), QualityMode::Preview).unwrap();
        assert_eq!((image.width(), image.height()), (8, 10));
        assert_eq!(image.as_bytes().len(), 8 * 10 * 4);
        assert_eq!(renderer.render_count(), 1);
        assert_eq!(renderer.peak_concurrency(), 1);
    }

    #[test]
    fn test_renderer_failing_page() {
        let doc = SyntheticDocument::letter(2);
        let renderer = SyntheticRenderer::new().with_failing_page(1);

        let ok = renderer.render(&doc.page(0).unwrap(), TargetSize::new(1, 1), QualityMode::Export);
        assert!(ok.is_ok());
        let err = renderer.render(&doc.page(1).unwrap(), TargetSize::new(1, 1), QualityMode::Export);
        assert!(matches!(err, Err(RenderError::DecodeFailure(_))));
        assert_eq!(renderer.render_count(), 2);
    }

    #[test]
    fn test_with_page_bounds_overrides_one_page() {
        let doc = SyntheticDocument::letter(2).with_page_bounds(1, PageBounds::new(0.0, 10.0));
        assert_eq!(doc.page(0).unwrap().bounds, PageBounds::letter());
        assert_eq!(doc.page(1).unwrap().bounds, PageBounds::new(0.0, 10.0));
    }
}
