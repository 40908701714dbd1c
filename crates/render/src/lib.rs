//! Folio Render Library
//!
//! Contracts between the page-image pipeline and its collaborators: the
//! document source that hands out page handles, and the render primitive
//! that turns a page handle into pixels.
//!
//! The pipeline never looks inside a [`PageHandle`]; it only validates the
//! page bounds, picks a [`TargetSize`] for the requested [`QualityMode`] and
//! calls [`PageRenderer::render`].

mod error;
pub mod page;
pub mod surface;
pub mod synthetic;

pub use error::{RenderError, RenderResult};
pub use page::{DocumentSource, PageBounds, PageHandle, PageRenderer, QualityMode, TargetSize};
pub use surface::{RenderedImage, RgbaImage};
pub use synthetic::{SyntheticDocument, SyntheticRenderer};
