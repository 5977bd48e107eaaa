//! Content transforms applied while assembling a book: HTML parsing and
//! serialization, resource internalization, chapter splitting and image
//! scaling.

pub mod dom;
pub mod fetch;
pub mod image;
pub mod rewrite;
pub mod split;

pub use fetch::FsFetcher;
pub use image::RasterImageLoader;
pub use rewrite::{ExternalReferences, ReferenceRewriter, ResourceSink, RewriteContext};
pub use split::{ChapterSplitter, SplitBoundary};
