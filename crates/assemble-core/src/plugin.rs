//! Collaborator traits the assembler is parameterized over: fetching
//! resource bytes, decoding and scaling images, and the source of generated
//! identifiers and timestamps.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Supplies raw bytes for references found in chapters and style sheets.
pub trait ResourceFetcher: Send + Sync {
    /// Fetch a remote URL. `Ok(None)` means the resource does not exist.
    fn fetch_remote(&self, url: &str) -> Result<Option<Vec<u8>>>;

    /// Read a local file. `Ok(None)` means the file does not exist.
    fn read_local(&self, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// An image ready to be stored in the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub width: u32,
    pub height: u32,
    pub mime: String,
    /// Extension matching `mime`, without the dot.
    pub ext: String,
    pub data: Vec<u8>,
}

/// Decodes, scales and re-encodes images according to the book options.
pub trait ImageLoader: Send + Sync {
    /// `source` is the original locator, used only for diagnostics and as
    /// a format hint. Returns `Ok(None)` for data that is not an image.
    fn load(&self, data: &[u8], source: &str) -> Result<Option<LoadedImage>>;
}

/// Source of generated values filled in at finalize time.
pub trait IdentifierSource: Send + Sync {
    /// A fresh identifier for `dc:identifier`.
    fn uuid(&self) -> String;

    /// Current time in seconds since the UNIX epoch.
    fn unix_time(&self) -> i64;

    /// Locator recorded as the book's `dc:source` when the caller gave none.
    fn source_url(&self) -> String;
}

/// Random v4 UUIDs, the system clock, and the working directory as source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentifierSource;

impl IdentifierSource for SystemIdentifierSource {
    fn uuid(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn unix_time(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn source_url(&self) -> String {
        std::env::current_dir()
            .ok()
            .and_then(|dir| url::Url::from_directory_path(dir).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| "file:///".to_string())
    }
}

/// Fixed values, for reproducible output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIdentifierSource {
    pub uuid: String,
    pub unix_time: i64,
    pub source_url: String,
}

impl FixedIdentifierSource {
    pub fn new(uuid: &str, unix_time: i64) -> Self {
        Self {
            uuid: uuid.to_string(),
            unix_time,
            source_url: "file:///".to_string(),
        }
    }
}

impl IdentifierSource for FixedIdentifierSource {
    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn unix_time(&self) -> i64 {
        self.unix_time
    }

    fn source_url(&self) -> String {
        self.source_url.clone()
    }
}
