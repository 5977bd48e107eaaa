//! Shared helpers for EPUB assembly: XML writing, ZIP archives, media types,
//! archive paths and text cleanup.

pub mod archive;
pub mod encoding;
pub mod mime;
pub mod path;
pub mod text;
pub mod xml;
