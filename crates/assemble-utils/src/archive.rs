//! ZIP archive writing for EPUB packages, plus readers used to inspect them.

use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Destination for the finished archive.
pub trait ArchiveWriter {
    /// Add an entry from memory. `compress` selects Deflate over Stored.
    fn add_entry(&mut self, name: &str, data: &[u8], compress: bool) -> io::Result<()>;

    /// Add an entry by reading a file from disk. Returns `false` when the
    /// file does not exist.
    fn add_entry_from_file(&mut self, path: &Path, name: &str, compress: bool) -> io::Result<bool>;

    fn add_directory(&mut self, name: &str) -> io::Result<()>;

    /// Close the central directory. No entries can be added afterwards.
    fn finish(&mut self) -> io::Result<()>;

    /// Archive bytes, available once finished.
    fn bytes(&self) -> Option<&[u8]>;

    fn size(&self) -> usize {
        self.bytes().map_or(0, <[u8]>::len)
    }

    /// Hand the finished archive to a sink along with its download name and
    /// content type.
    fn stream_to(&self, sink: &mut dyn DeliverySink, file_name: &str, mime_type: &str) -> io::Result<()> {
        let data = self
            .bytes()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "archive is not finished"))?;
        sink.deliver(file_name, mime_type, data)
    }
}

/// Receiver of a finished book, e.g. an HTTP response or a file.
pub trait DeliverySink {
    fn deliver(&mut self, file_name: &str, content_type: &str, data: &[u8]) -> io::Result<()>;
}

/// Sink that ignores the metadata and writes the bytes to any `Write`.
pub struct WriteSink<W: Write>(pub W);

impl<W: Write> DeliverySink for WriteSink<W> {
    fn deliver(&mut self, _file_name: &str, _content_type: &str, data: &[u8]) -> io::Result<()> {
        self.0.write_all(data)?;
        self.0.flush()
    }
}

/// In-memory ZIP writer.
pub struct ZipArchiveWriter {
    writer: Option<ZipWriter<Cursor<Vec<u8>>>>,
    finished: Option<Vec<u8>>,
}

impl ZipArchiveWriter {
    pub fn new() -> Self {
        Self {
            writer: Some(ZipWriter::new(Cursor::new(Vec::new()))),
            finished: None,
        }
    }

    fn writer(&mut self) -> io::Result<&mut ZipWriter<Cursor<Vec<u8>>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "archive already finished"))
    }

    fn options(compress: bool) -> SimpleFileOptions {
        let method = if compress {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        SimpleFileOptions::default().compression_method(method)
    }
}

impl Default for ZipArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_entry(&mut self, name: &str, data: &[u8], compress: bool) -> io::Result<()> {
        let writer = self.writer()?;
        writer.start_file(name, Self::options(compress))?;
        writer.write_all(data)?;
        Ok(())
    }

    fn add_entry_from_file(&mut self, path: &Path, name: &str, compress: bool) -> io::Result<bool> {
        if !path.is_file() {
            log::debug!("archive source missing: {}", path.display());
            return Ok(false);
        }
        let mut file = File::open(path)?;
        let writer = self.writer()?;
        writer.start_file(name, Self::options(compress))?;
        io::copy(&mut file, writer)?;
        Ok(true)
    }

    fn add_directory(&mut self, name: &str) -> io::Result<()> {
        self.writer()?.add_directory(name, SimpleFileOptions::default())?;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.take() {
            let cursor = writer.finish()?;
            self.finished = Some(cursor.into_inner());
        }
        Ok(())
    }

    fn bytes(&self) -> Option<&[u8]> {
        self.finished.as_deref()
    }
}

/// Read a single entry from an in-memory archive.
pub fn read_zip_entry(archive: &[u8], entry_name: &str) -> io::Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;
    let mut entry = archive.by_name(entry_name)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Entry names of an in-memory archive, in central directory order.
pub fn list_zip_entries(archive: &[u8]) -> io::Result<Vec<String>> {
    let archive = ZipArchive::new(Cursor::new(archive))?;
    Ok((0..archive.len())
        .filter_map(|i| archive.name_for_index(i).map(str::to_string))
        .collect())
}

/// Whether the named entry is stored without compression.
pub fn is_entry_stored(archive: &[u8], entry_name: &str) -> io::Result<bool> {
    let mut archive = ZipArchive::new(Cursor::new(archive))?;
    let entry = archive.by_name(entry_name)?;
    Ok(entry.compression() == CompressionMethod::Stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut writer = ZipArchiveWriter::new();
        writer.add_entry("mimetype", b"application/epub+zip", false).unwrap();
        writer.add_entry("OEBPS/content.xhtml", b"<html/>", true).unwrap();
        writer.finish().unwrap();
        writer.bytes().unwrap().to_vec()
    }

    #[test]
    fn test_zip_in_memory() {
        let bytes = sample();
        let entries = list_zip_entries(&bytes).unwrap();
        assert_eq!(entries, vec!["mimetype", "OEBPS/content.xhtml"]);
        assert_eq!(read_zip_entry(&bytes, "OEBPS/content.xhtml").unwrap(), b"<html/>");
        assert!(is_entry_stored(&bytes, "mimetype").unwrap());
        assert!(!is_entry_stored(&bytes, "OEBPS/content.xhtml").unwrap());
    }

    #[test]
    fn test_add_after_finish_fails() {
        let mut writer = ZipArchiveWriter::new();
        writer.finish().unwrap();
        assert!(writer.add_entry("late.txt", b"x", true).is_err());
        assert!(writer.size() > 0);
    }

    #[test]
    fn test_missing_file_entry() {
        let mut writer = ZipArchiveWriter::new();
        let added = writer
            .add_entry_from_file(Path::new("/nonexistent/assemble/file.mp3"), "media/file.mp3", false)
            .unwrap();
        assert!(!added);
    }

    #[test]
    fn test_stream_to_sink() {
        let mut writer = ZipArchiveWriter::new();
        assert!(writer
            .stream_to(&mut WriteSink(Vec::new()), "book.epub", "application/epub+zip")
            .is_err());
        writer.add_entry("a.txt", b"a", true).unwrap();
        writer.finish().unwrap();
        let mut sink = WriteSink(Vec::new());
        writer.stream_to(&mut sink, "book.epub", "application/epub+zip").unwrap();
        assert_eq!(sink.0.len(), writer.size());
    }
}
