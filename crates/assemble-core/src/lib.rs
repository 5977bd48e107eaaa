//! Core types for EPUB assembly: options, errors, package metadata, the
//! navigation tree and the collaborator traits.

pub mod error;
pub mod metadata;
pub mod nav;
pub mod options;
pub mod package;
pub mod plugin;
pub mod reference;
pub mod registry;
pub mod timestamp;

pub use error::{AssembleError, ErrorKind, Result};
pub use options::{BookOptions, EpubVersion, WritingDirection};
