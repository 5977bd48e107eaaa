//! Internalizes resources referenced from chapters and style sheets.
//!
//! `<style>`, `<link>`, `<img>` and `<source>` elements are handled in that
//! order. Each reference is resolved to bytes, stored once under its
//! internal archive path, and the document is pointed at the stored copy.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use assemble_core::error::{AssembleError, Result};
use assemble_core::plugin::{ImageLoader, LoadedImage, ResourceFetcher};
use assemble_core::EpubVersion;
use assemble_utils::encoding::decode_text;
use assemble_utils::mime::mime_from_name;
use assemble_utils::path::{
    archive_dir, back_path, basename, classify, dirname, extension, file_stem, normalize_file_name,
    percent_decode, relativize, sanitize_file_name, SourceRef,
};
use assemble_utils::text::remove_comments;

use crate::dom::{Document, NodeId};

static CSS_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?im)url\s*\(['"\s]*(.+?)['"\s]*\)"#).expect("valid regex"));
static CDATA_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)[/*\s]*<!\[CDATA\[[\s*/]*").expect("valid regex"));
static CDATA_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)[/*\s]*\]\]>[\s*/]*").expect("valid regex"));

/// What to do with resources referenced from imported HTML and CSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalReferences {
    /// Leave the document as it is.
    #[default]
    Ignore,
    /// Import referenced files and rewrite the references.
    Add,
    /// Drop images, media and CSS `url()` references.
    RemoveImages,
    /// Replace images with their alt text.
    ReplaceImages,
}

/// Storage the rewriter imports into. Paths are internal archive paths
/// relative to the book root.
pub trait ResourceSink {
    fn is_registered(&self, path: &str) -> bool;

    fn import_file(&mut self, path: &str, id: &str, data: Vec<u8>, mime: &str, origin: &str) -> Result<()>;

    fn import_large_file(&mut self, path: &str, id: &str, file: &Path, mime: &str, origin: &str) -> Result<()>;

    fn import_css(&mut self, path: &str, id: &str, css: &str, origin: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    pub policy: ExternalReferences,
    /// Directory relative references are resolved against.
    pub base_dir: &'a str,
    /// Archive directory of the document being rewritten, `/`-terminated
    /// or empty.
    pub html_dir: &'a str,
    /// Fallback prefix for files not found where the reference points.
    pub doc_root: Option<&'a str>,
    pub version: EpubVersion,
    /// Fail on missing local files instead of assuming they are generated
    /// later.
    pub strict_local: bool,
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Stored, or already present, at this internal path.
    Stored(String),
    Missing { external: bool },
}

pub struct ReferenceRewriter<'a> {
    fetcher: &'a dyn ResourceFetcher,
    images: &'a dyn ImageLoader,
}

impl<'a> ReferenceRewriter<'a> {
    pub fn new(fetcher: &'a dyn ResourceFetcher, images: &'a dyn ImageLoader) -> Self {
        Self { fetcher, images }
    }

    /// Rewrite an HTML string and return it re-serialized as XHTML. EPUB 2
    /// output carries the XHTML 1.1 doctype.
    pub fn rewrite_html(&self, html: &str, ctx: &RewriteContext<'_>, sink: &mut dyn ResourceSink) -> Result<String> {
        if ctx.policy == ExternalReferences::Ignore {
            return Ok(html.to_string());
        }
        let mut doc = Document::parse(&remove_comments(html));
        self.rewrite_document(&mut doc, ctx, sink)?;
        Ok(doc.to_xhtml(ctx.version == EpubVersion::V2))
    }

    pub fn rewrite_document(&self, doc: &mut Document, ctx: &RewriteContext<'_>, sink: &mut dyn ResourceSink) -> Result<()> {
        if ctx.policy == ExternalReferences::Ignore {
            return Ok(());
        }
        self.rewrite_styles(doc, ctx, sink)?;
        self.rewrite_links(doc, ctx, sink)?;
        self.rewrite_images(doc, ctx, sink)?;
        self.rewrite_sources(doc, ctx, sink)?;
        Ok(())
    }

    fn rewrite_styles(&self, doc: &mut Document, ctx: &RewriteContext<'_>, sink: &mut dyn ResourceSink) -> Result<()> {
        for style in doc.elements_by_tag("style") {
            let text = doc.text_content(style);
            let text = CDATA_OPEN.replace_all(&text, "");
            let text = CDATA_CLOSE.replace_all(&text, "");
            let css = self.rewrite_css(&text, ctx, ctx.html_dir, sink)?;
            doc.set_text_content(style, &format!("\n{}\n", css.trim()));
        }
        Ok(())
    }

    fn rewrite_links(&self, doc: &mut Document, ctx: &RewriteContext<'_>, sink: &mut dyn ResourceSink) -> Result<()> {
        let back = back_path(ctx.html_dir);
        for link in doc.elements_by_tag("link") {
            let Some(source) = doc.attr(link, "href").map(str::to_string) else {
                continue;
            };
            let reference = classify(&source);
            let mut internal_src = basename(strip_query(&source)).to_string();
            let data = match &reference {
                SourceRef::Remote { path, .. } => {
                    if let Some(rest) = after_base_dir(path, ctx.base_dir) {
                        internal_src = rest.to_string();
                    }
                    self.fetch_remote(&source)
                }
                _ => self.read_local(&local_candidates(&reference, ctx)),
            };
            let Some(data) = data else {
                log::debug!("Linked file {source} not found, left as is");
                continue;
            };

            let internal_src = normalize_file_name(&relativize(&internal_src));
            if !sink.is_registered(&internal_src) {
                let is_stylesheet = doc
                    .attr(link, "rel")
                    .is_some_and(|rel| rel.eq_ignore_ascii_case("stylesheet"));
                let mime = match doc.attr(link, "type").filter(|t| !t.is_empty()) {
                    Some(declared) => declared.to_string(),
                    None if is_stylesheet => "text/css".to_string(),
                    None => "text/plain".to_string(),
                };
                if mime == "text/css" {
                    let (css, _) = decode_text(&data);
                    let css = self.rewrite_css(&css, ctx, &archive_dir(&internal_src), sink)?;
                    sink.import_css(&internal_src, &internal_src, &css, &source)?;
                } else {
                    sink.import_file(&internal_src, &internal_src, data, &mime, &source)?;
                }
            }
            doc.set_attr(link, "href", &format!("{back}{internal_src}"));
        }
        Ok(())
    }

    fn rewrite_images(&self, doc: &mut Document, ctx: &RewriteContext<'_>, sink: &mut dyn ResourceSink) -> Result<()> {
        let back = back_path(ctx.html_dir);
        for img in doc.elements_by_tag("img") {
            match ctx.policy {
                ExternalReferences::Ignore => {}
                ExternalReferences::RemoveImages => doc.detach(img),
                ExternalReferences::ReplaceImages => {
                    let alt = format!("[{}]", alt_text(doc, img));
                    let em = doc.create_element("em", &[]);
                    let text = doc.create_text(&alt);
                    doc.append_child(em, text);
                    doc.replace(img, em);
                }
                ExternalReferences::Add => {
                    let Some(source) = doc.attr(img, "src").filter(|s| !s.is_empty()).map(str::to_string) else {
                        continue;
                    };
                    if source.starts_with("data:") {
                        continue;
                    }
                    match self.resolve_image(&source, &source_file_name(&source), ctx.html_dir, ctx, sink)? {
                        Resolution::Stored(path) => doc.set_attr(img, "src", &format!("{back}{path}")),
                        Resolution::Missing { external: true } => doc.detach(img),
                        Resolution::Missing { external: false } => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn rewrite_sources(&self, doc: &mut Document, ctx: &RewriteContext<'_>, sink: &mut dyn ResourceSink) -> Result<()> {
        // EPUB 2 has no audio or video support.
        let policy = match ctx.version {
            EpubVersion::V2 => ExternalReferences::RemoveImages,
            EpubVersion::V3 => ctx.policy,
        };
        let back = back_path(ctx.html_dir);
        for source_el in doc.elements_by_tag("source") {
            match policy {
                ExternalReferences::Ignore => {}
                ExternalReferences::RemoveImages => doc.detach(source_el),
                ExternalReferences::ReplaceImages => {
                    let alt = format!("[{}]", alt_text(doc, source_el));
                    let text = doc.create_text(&alt);
                    doc.replace(source_el, text);
                }
                ExternalReferences::Add => {
                    let Some(source) = doc.attr(source_el, "src").filter(|s| !s.is_empty()).map(str::to_string) else {
                        continue;
                    };
                    match self.resolve_media(&source, &source_file_name(&source), ctx.html_dir, ctx, sink)? {
                        Resolution::Stored(path) => doc.set_attr(source_el, "src", &format!("{back}{path}")),
                        Resolution::Missing { external: true } => doc.detach(source_el),
                        Resolution::Missing { external: false } => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrite `url(...)` references in a style sheet living in `css_dir`.
    pub fn rewrite_css(&self, css: &str, ctx: &RewriteContext<'_>, css_dir: &str, sink: &mut dyn ResourceSink) -> Result<String> {
        if ctx.policy == ExternalReferences::Ignore {
            return Ok(css.to_string());
        }
        let back = back_path(css_dir);
        let mut matches: Vec<(String, String)> = Vec::new();
        for caps in CSS_URL.captures_iter(css) {
            let whole = caps[0].to_string();
            if !matches.iter().any(|(w, _)| *w == whole) {
                matches.push((whole, caps[1].to_string()));
            }
        }

        let mut out = css.to_string();
        for (whole, source) in matches {
            if matches!(ctx.policy, ExternalReferences::RemoveImages | ExternalReferences::ReplaceImages) {
                out = out.replace(&whole, "");
                continue;
            }
            if source.starts_with("data:") || source.starts_with('#') {
                continue;
            }
            match self.resolve_image(&source, &source_file_name(&source), css_dir, ctx, sink)? {
                Resolution::Stored(path) => out = out.replace(&whole, &format!("url('{back}{path}')")),
                Resolution::Missing { external: true } => out = out.replace(&whole, ""),
                Resolution::Missing { external: false } => {}
            }
        }
        Ok(out)
    }

    /// Load an image reference and store it under `images/`.
    pub fn resolve_image(
        &self,
        source: &str,
        internal_src: &str,
        html_dir: &str,
        ctx: &RewriteContext<'_>,
        sink: &mut dyn ResourceSink,
    ) -> Result<Resolution> {
        let reference = classify(source);
        let mut internal_src = internal_src.to_string();
        let external = reference.is_remote();
        let internal_dir = internal_dir(&reference, html_dir);
        let data = match &reference {
            SourceRef::Remote { path, .. } => {
                if let Some(rest) = after_base_dir(path, ctx.base_dir) {
                    internal_src = sanitize_file_name(&percent_decode(rest));
                }
                self.fetch_remote(source)
            }
            _ => self.read_local(&local_candidates(&reference, ctx)),
        };

        let Some(image) = data.and_then(|data| self.load_image(&data, source)) else {
            return missing(source, external, ctx);
        };

        if !image.ext.is_empty() && extension(&internal_src) != Some(image.ext.as_str()) {
            internal_src = format!("{}.{}", file_stem(&internal_src), image.ext);
        }
        let internal_path = relativize(&format!("images/{internal_dir}/{internal_src}"));
        if !sink.is_registered(&internal_path) {
            let id = format!("i_{internal_src}");
            if let Err(e) = sink.import_file(&internal_path, &id, image.data, &image.mime, source) {
                return store_failed(source, &internal_path, external, e, ctx);
            }
        }
        Ok(Resolution::Stored(internal_path))
    }

    /// Locate a media reference and store it under `media/`. Local files
    /// are staged by path and read when the archive is written.
    pub fn resolve_media(
        &self,
        source: &str,
        internal_src: &str,
        html_dir: &str,
        ctx: &RewriteContext<'_>,
        sink: &mut dyn ResourceSink,
    ) -> Result<Resolution> {
        let reference = classify(source);
        let mut internal_src = internal_src.to_string();
        let external = reference.is_remote();
        let internal_dir = internal_dir(&reference, html_dir);
        let mime = mime_from_name(source);

        if let SourceRef::Remote { path, .. } = &reference {
            if let Some(rest) = after_base_dir(path, ctx.base_dir) {
                internal_src = sanitize_file_name(&percent_decode(rest));
            }
        }
        let internal_path = relativize(&format!("media/{internal_dir}/{internal_src}"));
        if sink.is_registered(&internal_path) {
            return Ok(Resolution::Stored(internal_path));
        }

        let id = format!("m_{internal_src}");
        let stored = match &reference {
            SourceRef::Remote { .. } => match self.fetch_remote(source) {
                Some(data) => sink.import_file(&internal_path, &id, data, mime, source),
                None => return missing(source, external, ctx),
            },
            _ => match local_candidates(&reference, ctx).into_iter().find(|p| p.is_file()) {
                Some(file) => sink.import_large_file(&internal_path, &id, &file, mime, source),
                None => return missing(source, external, ctx),
            },
        };
        if let Err(e) = stored {
            return store_failed(source, &internal_path, external, e, ctx);
        }
        Ok(Resolution::Stored(internal_path))
    }

    fn fetch_remote(&self, url: &str) -> Option<Vec<u8>> {
        match self.fetcher.fetch_remote(url) {
            Ok(Some(data)) if !data.is_empty() => Some(data),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Fetching {url} failed: {e}");
                None
            }
        }
    }

    fn read_local(&self, candidates: &[PathBuf]) -> Option<Vec<u8>> {
        for path in candidates {
            match self.fetcher.read_local(path) {
                Ok(Some(data)) if !data.is_empty() => return Some(data),
                Ok(_) => {}
                Err(e) => log::warn!("Reading {} failed: {e}", path.display()),
            }
        }
        None
    }

    fn load_image(&self, data: &[u8], source: &str) -> Option<LoadedImage> {
        match self.images.load(data, source) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Could not load image {source}: {e}");
                None
            }
        }
    }
}

fn missing(source: &str, external: bool, ctx: &RewriteContext<'_>) -> Result<Resolution> {
    if !external && ctx.strict_local {
        return Err(AssembleError::ResourceNotFound {
            locator: source.to_string(),
            external,
        });
    }
    if external {
        log::warn!("External resource {source} is missing and will be dropped");
    } else {
        log::debug!("Local resource {source} not found, assuming it is generated later");
    }
    Ok(Resolution::Missing { external })
}

/// A resource that was found but could not be stored is handled like a
/// missing one, so no reference points at an absent archive entry.
fn store_failed(
    source: &str,
    internal_path: &str,
    external: bool,
    err: AssembleError,
    ctx: &RewriteContext<'_>,
) -> Result<Resolution> {
    if ctx.strict_local {
        return Err(err);
    }
    log::warn!("Could not store {source} as {internal_path}: {err}");
    Ok(Resolution::Missing { external })
}

/// Directory under `images/` or `media/` that mirrors where the reference
/// points.
fn internal_dir(reference: &SourceRef, html_dir: &str) -> String {
    match reference {
        SourceRef::Remote { scheme, host, path } => format!("{scheme}/{host}/{}", dirname(path)),
        SourceRef::Absolute(path) => dirname(strip_query(path)).to_string(),
        SourceRef::Relative(path) => {
            format!("{html_dir}/{}", normalize_file_name(dirname(strip_query(path))))
        }
    }
}

/// Filesystem locations to try for a local reference, in order.
fn local_candidates(reference: &SourceRef, ctx: &RewriteContext<'_>) -> Vec<PathBuf> {
    let doc_root = ctx.doc_root.map(|root| root.trim_end_matches('/'));
    match reference {
        SourceRef::Remote { .. } => Vec::new(),
        SourceRef::Absolute(path) => {
            let path = percent_decode(strip_query(path));
            let mut out = vec![PathBuf::from(&path)];
            if let Some(root) = doc_root {
                out.push(PathBuf::from(format!("{root}{path}")));
            }
            out
        }
        SourceRef::Relative(path) => {
            let path = percent_decode(strip_query(path));
            let base = ctx.base_dir.trim_end_matches('/');
            let joined = if base.is_empty() { path } else { format!("{base}/{path}") };
            let mut out = vec![PathBuf::from(&joined)];
            if let Some(root) = doc_root {
                out.push(PathBuf::from(format!("{root}/{joined}")));
            }
            out
        }
    }
}

/// Path after the first occurrence of `<base_dir>/`.
fn after_base_dir<'p>(path: &'p str, base_dir: &str) -> Option<&'p str> {
    let base = base_dir.trim_matches('/');
    if base.is_empty() {
        return None;
    }
    let needle = format!("{base}/");
    path.find(&needle).map(|pos| &path[pos + needle.len()..])
}

fn strip_query(source: &str) -> &str {
    let end = source.find(['?', '#']).unwrap_or(source.len());
    &source[..end]
}

/// Archive-safe file name for a reference: last path segment, `%`-decoded,
/// special characters removed.
fn source_file_name(source: &str) -> String {
    sanitize_file_name(&percent_decode(basename(strip_query(source))))
}

fn alt_text(doc: &Document, node: NodeId) -> String {
    doc.attr(node, "alt")
        .filter(|alt| !alt.is_empty())
        .unwrap_or("image")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use assemble_utils::mime::extension_from_mime;

    #[derive(Default)]
    struct MemoryFetcher {
        files: HashMap<String, Vec<u8>>,
    }

    impl MemoryFetcher {
        fn with(mut self, name: &str, data: &[u8]) -> Self {
            self.files.insert(name.to_string(), data.to_vec());
            self
        }
    }

    impl ResourceFetcher for MemoryFetcher {
        fn fetch_remote(&self, url: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.files.get(url).cloned())
        }

        fn read_local(&self, path: &Path) -> Result<Option<Vec<u8>>> {
            Ok(self.files.get(path.to_string_lossy().as_ref()).cloned())
        }
    }

    struct PassthroughLoader;

    impl ImageLoader for PassthroughLoader {
        fn load(&self, data: &[u8], source: &str) -> Result<Option<LoadedImage>> {
            let mime = mime_from_name(source);
            Ok(Some(LoadedImage {
                width: 1,
                height: 1,
                mime: mime.to_string(),
                ext: extension_from_mime(mime).to_string(),
                data: data.to_vec(),
            }))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        files: Vec<(String, String, String)>,
        css: HashMap<String, String>,
    }

    impl ResourceSink for MemorySink {
        fn is_registered(&self, path: &str) -> bool {
            self.files.iter().any(|(p, _, _)| p == path)
        }

        fn import_file(&mut self, path: &str, id: &str, _data: Vec<u8>, mime: &str, _origin: &str) -> Result<()> {
            self.files.push((path.to_string(), id.to_string(), mime.to_string()));
            Ok(())
        }

        fn import_large_file(&mut self, path: &str, id: &str, _file: &Path, mime: &str, _origin: &str) -> Result<()> {
            self.files.push((path.to_string(), id.to_string(), mime.to_string()));
            Ok(())
        }

        fn import_css(&mut self, path: &str, id: &str, css: &str, _origin: &str) -> Result<()> {
            self.files.push((path.to_string(), format!("css_{id}"), "text/css".to_string()));
            self.css.insert(path.to_string(), css.to_string());
            Ok(())
        }
    }

    fn ctx(policy: ExternalReferences, html_dir: &'static str) -> RewriteContext<'static> {
        RewriteContext {
            policy,
            base_dir: "src",
            html_dir,
            doc_root: None,
            version: EpubVersion::V3,
            strict_local: false,
        }
    }

    #[test]
    fn test_images_imported_once() {
        let fetcher = MemoryFetcher::default().with("src/img/a.png", b"png");
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let mut sink = MemorySink::default();
        let html = "<html><body><img src=\"img/a.png\"><p><img src=\"img/a.png\" alt=\"again\"></p></body></html>";

        let out = rewriter.rewrite_html(html, &ctx(ExternalReferences::Add, "text/"), &mut sink).unwrap();
        assert_eq!(sink.files.len(), 1);
        assert_eq!(sink.files[0].0, "images/text/img/a.png");
        assert_eq!(sink.files[0].1, "i_a.png");
        assert_eq!(out.matches("src=\"../images/text/img/a.png\"").count(), 2);
    }

    #[test]
    fn test_missing_images() {
        let fetcher = MemoryFetcher::default();
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let mut sink = MemorySink::default();
        let html = "<body><img src=\"http://example.com/gone.png\"><img src=\"later.png\"></body>";

        let out = rewriter.rewrite_html(html, &ctx(ExternalReferences::Add, ""), &mut sink).unwrap();
        assert!(!out.contains("gone.png"));
        assert!(out.contains("src=\"later.png\""));
        assert!(sink.files.is_empty());

        let mut strict = ctx(ExternalReferences::Add, "");
        strict.strict_local = true;
        let err = rewriter.rewrite_html(html, &strict, &mut sink).unwrap_err();
        assert!(matches!(err, AssembleError::ResourceNotFound { external: false, .. }));
    }

    #[test]
    fn test_replace_images_with_alt() {
        let fetcher = MemoryFetcher::default();
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let mut sink = MemorySink::default();
        let html = "<body><p><img src=\"a.png\" alt=\"Map\"><img src=\"b.png\"></p></body>";

        let out = rewriter.rewrite_html(html, &ctx(ExternalReferences::ReplaceImages, ""), &mut sink).unwrap();
        assert!(out.contains("<em>[Map]</em><em>[image]</em>"));
        assert!(!out.contains("<img"));
    }

    #[test]
    fn test_css_urls() {
        let fetcher = MemoryFetcher::default().with("src/bg.png", b"png");
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let mut sink = MemorySink::default();
        let css = "body { background: url(\"bg.png\") } p { background: url(http://example.com/x.png) }";

        let out = rewriter.rewrite_css(css, &ctx(ExternalReferences::Add, ""), "", &mut sink).unwrap();
        assert_eq!(out, "body { background: url('images/bg.png') } p { background:  }");

        let removed = rewriter
            .rewrite_css(css, &ctx(ExternalReferences::RemoveImages, ""), "", &mut sink)
            .unwrap();
        assert!(!removed.contains("url"));
    }

    #[test]
    fn test_sources_by_version() {
        let fetcher = MemoryFetcher::default().with("http://example.com/media/clip.mp4", b"mp4");
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let html = "<body><video><source src=\"http://example.com/media/clip.mp4\"></video></body>";

        let mut sink = MemorySink::default();
        let out = rewriter.rewrite_html(html, &ctx(ExternalReferences::Add, ""), &mut sink).unwrap();
        assert_eq!(sink.files[0].0, "media/http/example.com/media/clip.mp4");
        assert_eq!(sink.files[0].1, "m_clip.mp4");
        assert!(out.contains("src=\"media/http/example.com/media/clip.mp4\""));

        let mut epub2 = ctx(ExternalReferences::Add, "");
        epub2.version = EpubVersion::V2;
        let mut sink = MemorySink::default();
        let out = rewriter.rewrite_html(html, &epub2, &mut sink).unwrap();
        assert!(!out.contains("<source"));
        assert!(out.contains("<!DOCTYPE html"));
        assert!(sink.files.is_empty());
    }

    #[test]
    fn test_linked_style_sheet() {
        let fetcher = MemoryFetcher::default()
            .with("src/style.css", b"body { background: url(bg.png); }")
            .with("src/bg.png", b"png");
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let mut sink = MemorySink::default();
        let html = "<html><head><link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\"></head><body></body></html>";

        let out = rewriter.rewrite_html(html, &ctx(ExternalReferences::Add, "text/"), &mut sink).unwrap();
        assert!(out.contains("href=\"../style.css\""));
        assert_eq!(sink.css["style.css"], "body { background: url('images/bg.png'); }");
        assert!(sink.is_registered("images/bg.png"));
    }

    #[test]
    fn test_inline_style_cdata() {
        let fetcher = MemoryFetcher::default();
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let mut sink = MemorySink::default();
        let html = "<html><head><style>/*<![CDATA[*/ p { color: red } /*]]>*/</style></head><body></body></html>";

        let out = rewriter.rewrite_html(html, &ctx(ExternalReferences::Add, ""), &mut sink).unwrap();
        assert!(out.contains("<style>\np { color: red }\n</style>"));
    }

    /// Sink that refuses every import.
    struct RejectingSink;

    impl ResourceSink for RejectingSink {
        fn is_registered(&self, _path: &str) -> bool {
            false
        }

        fn import_file(&mut self, path: &str, _id: &str, _data: Vec<u8>, _mime: &str, _origin: &str) -> Result<()> {
            Err(AssembleError::Validation(format!("cannot store {path}")))
        }

        fn import_large_file(&mut self, path: &str, _id: &str, _file: &Path, _mime: &str, _origin: &str) -> Result<()> {
            Err(AssembleError::Validation(format!("cannot store {path}")))
        }

        fn import_css(&mut self, path: &str, _id: &str, _css: &str, _origin: &str) -> Result<()> {
            Err(AssembleError::Validation(format!("cannot store {path}")))
        }
    }

    #[test]
    fn test_failed_import_is_not_referenced() {
        let fetcher = MemoryFetcher::default()
            .with("src/local.png", b"png")
            .with("http://example.com/remote.png", b"png")
            .with("http://example.com/clip.mp4", b"mp4");
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let html = "<body><img src=\"local.png\"><img src=\"http://example.com/remote.png\">\
                    <video><source src=\"http://example.com/clip.mp4\"></video></body>";

        let out = rewriter.rewrite_html(html, &ctx(ExternalReferences::Add, ""), &mut RejectingSink).unwrap();
        assert!(out.contains("src=\"local.png\""));
        assert!(!out.contains("images/"));
        assert!(!out.contains("remote.png"));
        assert!(!out.contains("clip.mp4"));

        let mut strict = ctx(ExternalReferences::Add, "");
        strict.strict_local = true;
        let err = rewriter.rewrite_html(html, &strict, &mut RejectingSink).unwrap_err();
        assert!(matches!(err, AssembleError::Validation(_)));
    }

    #[test]
    fn test_media_policies_on_epub3() {
        let fetcher = MemoryFetcher::default();
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let html = "<body><video controls=\"controls\"><source src=\"clip.mp4\" type=\"video/mp4\"></video>\
                    <audio><source src=\"song.ogg\" alt=\"Song\"></audio><img src=\"a.png\"></body>";

        let mut sink = MemorySink::default();
        let removed = rewriter
            .rewrite_html(html, &ctx(ExternalReferences::RemoveImages, ""), &mut sink)
            .unwrap();
        assert!(!removed.contains("<source"));
        assert!(!removed.contains("<img"));
        assert!(removed.contains("<video"));
        assert!(removed.contains("<audio"));

        let replaced = rewriter
            .rewrite_html(html, &ctx(ExternalReferences::ReplaceImages, ""), &mut sink)
            .unwrap();
        assert!(!replaced.contains("<source"));
        assert!(replaced.contains("[image]"));
        assert!(replaced.contains("[Song]"));
        assert!(sink.files.is_empty());
    }

    #[test]
    fn test_back_paths_in_nested_directory() {
        let fetcher = MemoryFetcher::default()
            .with("src/bg.png", b"png")
            .with("src/style.css", b"p { background: url(bg.png); }");
        let rewriter = ReferenceRewriter::new(&fetcher, &PassthroughLoader);
        let mut sink = MemorySink::default();
        let html = "<html><head><style>h1 { background: url(bg.png) }</style>\
                    <link rel=\"stylesheet\" href=\"style.css\"></head><body><h1>T</h1></body></html>";

        let out = rewriter
            .rewrite_html(html, &ctx(ExternalReferences::Add, "text/part1/"), &mut sink)
            .unwrap();
        assert!(out.contains("url('../../images/text/part1/bg.png')"));
        assert!(out.contains("href=\"../../style.css\""));
        assert_eq!(sink.css["style.css"], "p { background: url('images/bg.png'); }");
        assert!(sink.is_registered("images/text/part1/bg.png"));
        assert!(sink.is_registered("images/bg.png"));
    }
}
