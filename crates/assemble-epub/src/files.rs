//! Book content files: the manifest, the registry of stored paths, and the
//! archive entries staged until finalize.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use assemble_core::error::{AssembleError, Result};
use assemble_core::package::{ManifestItem, PackageDocument, NCX_HREF, NCX_ID, NCX_MEDIA_TYPE};
use assemble_core::registry::{ResourceOrigin, ResourceRegistry};
use assemble_core::EpubVersion;
use assemble_transforms::ResourceSink;
use assemble_utils::archive::ArchiveWriter;
use assemble_utils::path::normalize_file_name;

use crate::diagnostics::BookLog;
use crate::writer::container_xml;

pub const EPUB_MIME_TYPE: &str = "application/epub+zip";
pub const XHTML_MIME_TYPE: &str = "application/xhtml+xml";

#[derive(Debug, Clone)]
pub enum EntryData {
    Bytes(Vec<u8>),
    /// Read from disk when the archive is written.
    File(PathBuf),
}

/// One archive entry waiting for finalize.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    /// Full name inside the archive.
    pub name: String,
    pub data: EntryData,
    pub compress: bool,
}

impl StagedEntry {
    pub fn bytes(name: impl Into<String>, data: Vec<u8>, compress: bool) -> Self {
        Self {
            name: name.into(),
            data: EntryData::Bytes(data),
            compress,
        }
    }
}

/// State of [`BookFiles`] before a multi-step add, restored when the add
/// fails part way.
#[derive(Debug)]
pub(crate) struct Checkpoint {
    opf: PackageDocument,
    registry: ResourceRegistry,
    entries: usize,
    initialized: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BookFiles {
    pub book_root: String,
    pub opf: PackageDocument,
    pub registry: ResourceRegistry,
    pub entries: Vec<StagedEntry>,
    pub initialized: bool,
    pub log: BookLog,
}

impl BookFiles {
    pub fn new(version: EpubVersion, book_root: &str) -> Self {
        Self {
            book_root: book_root.to_string(),
            opf: PackageDocument::new(version),
            registry: ResourceRegistry::new(),
            entries: Vec::new(),
            initialized: false,
            log: BookLog::new(),
        }
    }

    /// Stage `META-INF/container.xml` and register the NCX on first use.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.opf.add_item(ManifestItem::new(NCX_ID, NCX_HREF, NCX_MEDIA_TYPE))?;
        self.entries.push(StagedEntry::bytes(
            "META-INF/container.xml",
            container_xml(&self.book_root).into_bytes(),
            false,
        ));
        self.initialized = true;
        self.log.line(format!("initialize: book root '{}'", self.book_root));
        Ok(())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            opf: self.opf.clone(),
            registry: self.registry.clone(),
            entries: self.entries.len(),
            initialized: self.initialized,
        }
    }

    /// Drop everything added since `checkpoint`. Entries are append-only,
    /// so truncating them is enough.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let dropped = self.entries.len().saturating_sub(checkpoint.entries);
        self.opf = checkpoint.opf;
        self.registry = checkpoint.registry;
        self.entries.truncate(checkpoint.entries);
        self.initialized = checkpoint.initialized;
        self.log.line(format!("rollback: dropped {dropped} staged files"));
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.registry.contains(&normalize_file_name(file_name))
    }

    pub fn add_file(&mut self, file_name: &str, id: &str, data: Vec<u8>, mime: &str) -> Result<()> {
        self.add(file_name, id, EntryData::Bytes(data), mime, ResourceOrigin::Generated)
    }

    pub fn add_large_file(&mut self, file_name: &str, id: &str, path: &Path, mime: &str) -> Result<()> {
        if !path.is_file() {
            return Err(AssembleError::ResourceNotFound {
                locator: path.display().to_string(),
                external: false,
            });
        }
        self.add(file_name, id, EntryData::File(path.to_path_buf()), mime, ResourceOrigin::Generated)
    }

    pub fn add_meta_inf_file(&mut self, file_name: &str, data: Vec<u8>) -> Result<()> {
        self.initialize()?;
        let name = format!("META-INF/{}", normalize_file_name(file_name));
        if self.entries.iter().any(|e| e.name == name) {
            return Err(AssembleError::Duplicate(format!("file '{name}'")));
        }
        self.log.line(format!("addFileToMETAINF: {name}"));
        self.entries.push(StagedEntry::bytes(name, data, true));
        Ok(())
    }

    fn add(&mut self, file_name: &str, id: &str, data: EntryData, mime: &str, origin: ResourceOrigin) -> Result<()> {
        let file_name = normalize_file_name(file_name);
        if file_name.is_empty() {
            return Err(AssembleError::Validation("empty file name".to_string()));
        }
        if self.registry.contains(&file_name) {
            return Err(AssembleError::Duplicate(format!("file '{file_name}'")));
        }
        self.initialize()?;

        self.opf.add_item(ManifestItem::new(id, &file_name, mime))?;
        self.registry.register(&file_name, origin);
        self.entries.push(StagedEntry {
            name: format!("{}{}", self.book_root, file_name),
            data,
            compress: !mime.starts_with("image/"),
        });
        self.log.line(format!("addFile: {file_name} ({id}, {mime})"));
        Ok(())
    }

    /// `base`, made safe as a manifest id and unique within the manifest.
    fn unique_id(&self, base: &str) -> String {
        let mut id: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
            .collect();
        if !id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            id.insert(0, '_');
        }
        if self.opf.item_by_id(&id).is_none() {
            return id;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{id}_{n}");
            if self.opf.item_by_id(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl ResourceSink for BookFiles {
    fn is_registered(&self, path: &str) -> bool {
        self.registry.contains(path)
    }

    fn import_file(&mut self, path: &str, id: &str, data: Vec<u8>, mime: &str, origin: &str) -> Result<()> {
        let id = self.unique_id(id);
        self.add(path, &id, EntryData::Bytes(data), mime, ResourceOrigin::Imported(origin.to_string()))
    }

    fn import_large_file(&mut self, path: &str, id: &str, file: &Path, mime: &str, origin: &str) -> Result<()> {
        let id = self.unique_id(id);
        self.add(path, &id, EntryData::File(file.to_path_buf()), mime, ResourceOrigin::Imported(origin.to_string()))
    }

    fn import_css(&mut self, path: &str, id: &str, css: &str, origin: &str) -> Result<()> {
        let id = self.unique_id(&format!("css_{id}"));
        self.add(path, &id, EntryData::Bytes(css.as_bytes().to_vec()), "text/css", ResourceOrigin::Imported(origin.to_string()))
    }
}

/// Write the `mimetype` entry, then every staged entry in order.
///
/// Entries backed by files are read in parallel first; the archive itself
/// is written sequentially.
pub(crate) fn write_archive(writer: &mut dyn ArchiveWriter, staged: &[&StagedEntry]) -> Result<()> {
    let archive_err = |name: &str, e: std::io::Error| AssembleError::Archive(format!("failed to write {name}: {e}"));

    let file_entries: Vec<(&str, &Path)> = staged
        .iter()
        .filter_map(|entry| match &entry.data {
            EntryData::File(path) => Some((entry.name.as_str(), path.as_path())),
            EntryData::Bytes(_) => None,
        })
        .collect();

    let loaded: Vec<(&str, std::io::Result<Vec<u8>>)> = file_entries
        .into_par_iter()
        .map(|(name, path)| (name, std::fs::read(path)))
        .collect();

    let mut file_data: HashMap<&str, Vec<u8>> = HashMap::with_capacity(loaded.len());
    for (name, result) in loaded {
        let data = result.map_err(|e| AssembleError::Archive(format!("failed to read content for {name}: {e}")))?;
        file_data.insert(name, data);
    }

    writer
        .add_entry("mimetype", EPUB_MIME_TYPE.as_bytes(), false)
        .map_err(|e| archive_err("mimetype", e))?;
    writer.add_directory("META-INF/").map_err(|e| archive_err("META-INF/", e))?;

    for entry in staged {
        let data: &[u8] = match &entry.data {
            EntryData::Bytes(bytes) => bytes,
            EntryData::File(_) => file_data.get(entry.name.as_str()).map_or(&[][..], Vec::as_slice),
        };
        writer
            .add_entry(&entry.name, data, entry.compress)
            .map_err(|e| archive_err(&entry.name, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assemble_utils::archive::{is_entry_stored, list_zip_entries, read_zip_entry, ZipArchiveWriter};

    fn files() -> BookFiles {
        BookFiles::new(EpubVersion::V2, "OEBPS/")
    }

    #[test]
    fn test_first_add_initializes() {
        let mut files = files();
        assert!(!files.initialized);
        files.add_file("chapter1.xhtml", "chapter1", b"<html/>".to_vec(), XHTML_MIME_TYPE).unwrap();
        assert!(files.initialized);
        assert!(files.opf.item_by_id(NCX_ID).is_some());
        assert_eq!(files.entries[0].name, "META-INF/container.xml");
        assert_eq!(files.entries[1].name, "OEBPS/chapter1.xhtml");
    }

    #[test]
    fn test_duplicate_file_rejected() {
        let mut files = files();
        files.add_file("a.css", "css_a", b"p{}".to_vec(), "text/css").unwrap();
        let err = files.add_file("/a.css", "other", b"p{}".to_vec(), "text/css").unwrap_err();
        assert!(matches!(err, AssembleError::Duplicate(_)));
        assert_eq!(files.registry.len(), 1);
    }

    #[test]
    fn test_failed_add_leaves_no_trace() {
        let mut files = files();
        files.add_file("a.xhtml", "same", b"a".to_vec(), XHTML_MIME_TYPE).unwrap();
        assert!(files.add_file("b.xhtml", "same", b"b".to_vec(), XHTML_MIME_TYPE).is_err());
        assert!(!files.contains("b.xhtml"));
        assert_eq!(files.entries.len(), 2);
    }

    #[test]
    fn test_imported_ids_are_unique() {
        let mut files = files();
        files.import_file("images/a/pic.png", "i_pic.png", vec![1], "image/png", "a/pic.png").unwrap();
        files.import_file("images/b/pic.png", "i_pic.png", vec![2], "image/png", "b/pic.png").unwrap();
        assert_eq!(files.opf.item_by_href("images/b/pic.png").unwrap().id, "i_pic.png_2");
        files.import_css("Styles/main.css", "Styles/main.css", "p {}", "main.css").unwrap();
        assert_eq!(files.opf.item_by_href("Styles/main.css").unwrap().id, "css_Styles_main.css");
    }

    #[test]
    fn test_write_archive_layout() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"not really a video").unwrap();

        let mut files = files();
        files.add_file("images/cover.png", "cover", vec![0x89, b'P'], "image/png").unwrap();
        files.add_large_file("media/clip.mp4", "clip", &clip, "video/mp4").unwrap();

        let mut writer = ZipArchiveWriter::new();
        let staged: Vec<&StagedEntry> = files.entries.iter().collect();
        write_archive(&mut writer, &staged).unwrap();
        writer.finish().unwrap();
        let bytes = writer.bytes().unwrap();

        let names = list_zip_entries(bytes).unwrap();
        assert_eq!(names[0], "mimetype");
        assert!(is_entry_stored(bytes, "mimetype").unwrap());
        assert!(is_entry_stored(bytes, "OEBPS/images/cover.png").unwrap());
        assert!(!is_entry_stored(bytes, "OEBPS/media/clip.mp4").unwrap());
        assert_eq!(read_zip_entry(bytes, "OEBPS/media/clip.mp4").unwrap(), b"not really a video");
    }

    #[test]
    fn test_large_file_must_exist() {
        let mut files = files();
        let err = files
            .add_large_file("media/missing.mp3", "m", Path::new("/nonexistent/missing.mp3"), "audio/mpeg")
            .unwrap_err();
        assert!(matches!(err, AssembleError::ResourceNotFound { external: false, .. }));
    }

    #[test]
    fn test_rollback_restores_checkpoint() {
        let mut files = files();
        let checkpoint = files.checkpoint();
        files.add_file("a.xhtml", "a", b"a".to_vec(), XHTML_MIME_TYPE).unwrap();
        files.opf.add_item_ref("a", true);
        files.import_file("images/a.png", "i_a.png", vec![1], "image/png", "a.png").unwrap();
        files.rollback(checkpoint);

        assert!(!files.initialized);
        assert!(files.entries.is_empty());
        assert!(files.registry.is_empty());
        assert!(files.opf.manifest().is_empty());
        assert!(files.opf.spine().is_empty());
        files.add_file("a.xhtml", "a", b"a".to_vec(), XHTML_MIME_TYPE).unwrap();
        assert_eq!(files.entries.len(), 2);
    }
}
