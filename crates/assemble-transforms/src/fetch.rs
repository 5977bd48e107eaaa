//! Filesystem-backed resource fetcher.

use std::io::ErrorKind;
use std::path::Path;

use url::Url;

use assemble_core::error::Result;
use assemble_core::plugin::ResourceFetcher;

/// Reads local files from disk. Remote URLs are only honored for the
/// `file` scheme; anything else is reported as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFetcher;

impl ResourceFetcher for FsFetcher {
    fn fetch_remote(&self, url: &str) -> Result<Option<Vec<u8>>> {
        match Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "file" => match parsed.to_file_path() {
                Ok(path) => self.read_local(&path),
                Err(()) => Ok(None),
            },
            Ok(_) => {
                log::warn!("No remote fetcher configured, skipping {url}");
                Ok(None)
            }
            Err(e) => {
                log::debug!("Unparseable URL {url}: {e}");
                Ok(None)
            }
        }
    }

    fn read_local(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        if !path.is_file() {
            return Ok(None);
        }
        match std::fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
