//! EPUB 2 and EPUB 3 book assembly.
//!
//! [`BookAssembler`] collects chapters, resources, reference pages and
//! metadata, then writes the package document, the NCX, the EPUB 3
//! navigation document and the ZIP container in one step.

pub mod book;
pub mod diagnostics;
mod files;
pub mod pages;
pub mod rendition;
pub mod writer;

pub use assemble_core::metadata::{DublinCoreTerm, IdentifierType, MarcRole, MetaValue};
pub use assemble_core::nav::{NavId, NavPoint};
pub use assemble_core::reference::{ReferenceType, ReferencesOrder};
pub use assemble_core::{AssembleError, BookOptions, EpubVersion, ErrorKind, Result, WritingDirection};
pub use assemble_transforms::ExternalReferences;
pub use assemble_utils::archive::{DeliverySink, WriteSink};
pub use book::{BookAssembler, ChapterContent, ChapterOptions, TocOptions};
pub use files::{EPUB_MIME_TYPE, XHTML_MIME_TYPE};
pub use rendition::{Rendition, RenditionLayout, RenditionOrientation, RenditionSpread};
pub use writer::Landmark;
