use thiserror::Error;

/// Outcome of a failed page render.
///
/// None of these are cached: every later request for the same page
/// re-attempts the render, since the document may have changed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    /// The page has a zero, negative or non-finite extent.
    #[error("page {page} has invalid bounds {width}x{height}")]
    InvalidPageBounds { page: usize, width: f32, height: f32 },

    /// The render primitive could not produce pixels.
    #[error("failed to decode page: {0}")]
    DecodeFailure(String),

    /// The caller (or its batch) withdrew interest before completion.
    #[error("render was cancelled")]
    Cancelled,

    /// The page index is past the end of the document.
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: usize, page_count: usize },

    /// The document is not open, or was closed while the render was pending.
    #[error("document {0} is not open")]
    DocumentClosed(String),
}

impl RenderError {
    /// Whether this error reflects the caller withdrawing, rather than a
    /// problem with the page itself.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled)
    }
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;
