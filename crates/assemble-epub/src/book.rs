//! The book assembler: collects chapters, resources and metadata, then
//! writes the finished EPUB archive in one step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use assemble_core::error::{AssembleError, Result};
use assemble_core::metadata::{is_valid_language, DublinCoreTerm, IdentifierType, MarcRole, MetaValue};
use assemble_core::nav::{NavId, NavPoint, NavigationTree};
use assemble_core::package::{ManifestItem, PackageDocument};
use assemble_core::plugin::{IdentifierSource, ImageLoader, ResourceFetcher, SystemIdentifierSource};
use assemble_core::reference::{ReferenceType, ReferencesOrder};
use assemble_core::registry::ResourceOrigin;
use assemble_core::timestamp::UtcDateTime;
use assemble_core::{BookOptions, EpubVersion};
use assemble_transforms::dom::Document;
use assemble_transforms::{
    ChapterSplitter, ExternalReferences, FsFetcher, RasterImageLoader, ReferenceRewriter, RewriteContext,
};
use assemble_utils::archive::{ArchiveWriter, DeliverySink, ZipArchiveWriter};
use assemble_utils::mime::mime_from_name;
use assemble_utils::path::{archive_dir, basename, extension, file_stem, normalize_file_name, relativize};
use assemble_utils::text::{decode_html_entities, encode_html};
use assemble_utils::xml::escape_xml_text;

use crate::files::{write_archive, BookFiles, StagedEntry, EPUB_MIME_TYPE, XHTML_MIME_TYPE};
use crate::pages::{self, TocLine, TocPage, COVER_CSS, COVER_CSS_FILE, COVER_PAGE_FILE};
use crate::rendition::{Rendition, RENDITION_PREFIX, RENDITION_PREFIX_URI};
use crate::writer::{self, Landmark, NavDocument, NavHeader, NAV_DOCUMENT_FILE, OPF_FILE};

const TOC_REF_ID: &str = "ref_toc";
const DEFAULT_TOC_TITLE: &str = "Table of Contents";

/// Content handed to [`BookAssembler::add_chapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterContent {
    /// Navigation entry only: an `#anchor` into an existing chapter, or the
    /// generated `TOC.xhtml`.
    Empty,
    Html(String),
    /// Pre-split parts, stored as `<name>_<k>.<ext>`.
    Parts(Vec<String>),
}

impl From<String> for ChapterContent {
    fn from(html: String) -> Self {
        ChapterContent::Html(html)
    }
}

impl From<&str> for ChapterContent {
    fn from(html: &str) -> Self {
        ChapterContent::Html(html.to_string())
    }
}

impl From<Vec<String>> for ChapterContent {
    fn from(parts: Vec<String>) -> Self {
        ChapterContent::Parts(parts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterOptions {
    /// Split content larger than the split size.
    pub auto_split: bool,
    pub external_references: ExternalReferences,
    /// Directory relative references are resolved against.
    pub base_dir: String,
}

/// Settings for the generated table of contents page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TocOptions {
    pub css_file: Option<String>,
    pub css_class: String,
    pub title: String,
    /// List reference pages along with the chapters.
    pub add_references: bool,
    /// Add the page to the navigation at the current level.
    pub add_to_index: bool,
    pub file_name: String,
}

impl Default for TocOptions {
    fn default() -> Self {
        Self {
            css_file: None,
            css_class: "toc".to_string(),
            title: DEFAULT_TOC_TITLE.to_string(),
            add_references: true,
            add_to_index: false,
            file_name: "TOC.xhtml".to_string(),
        }
    }
}

/// Caller-supplied book metadata. Empty strings mean "not set".
#[derive(Debug, Clone, Default)]
struct BookMetadata {
    title: String,
    language: String,
    identifier: String,
    identifier_type: IdentifierType,
    description: String,
    author: String,
    author_sort_key: String,
    publisher_name: String,
    publisher_url: String,
    date: Option<i64>,
    rights: String,
    subjects: Vec<String>,
    source_url: String,
    coverage: String,
    relation: String,
    generator: String,
}

#[derive(Debug, Clone)]
struct ReferencePage {
    href: String,
    name: String,
}

#[derive(Debug, Clone)]
struct ReferencesTitle {
    title: String,
    id: String,
    class: String,
}

impl Default for ReferencesTitle {
    fn default() -> Self {
        Self {
            title: "Guide".to_string(),
            id: String::new(),
            class: "references".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Chapter {
    name: String,
    point: NavId,
}

/// Builds one EPUB book.
///
/// Files are staged as they are added; nothing is written until
/// [`finalize`](Self::finalize), which either produces the complete archive
/// or fails without changing the book. Once finalized, every mutator fails
/// with a state error.
pub struct BookAssembler {
    options: BookOptions,
    fetcher: Box<dyn ResourceFetcher>,
    images: Box<dyn ImageLoader>,
    ids: Box<dyn IdentifierSource>,

    files: BookFiles,
    nav: NavigationTree,
    metadata: BookMetadata,

    chapter_count: usize,
    chapters: Vec<Chapter>,
    references: HashMap<ReferenceType, ReferencePage>,
    references_order: ReferencesOrder,
    references_title: ReferencesTitle,
    toc: Option<TocOptions>,
    toc_nav_added: bool,
    cover_set: bool,

    archive: Option<ZipArchiveWriter>,
}

impl BookAssembler {
    /// Assembler reading local files from disk, scaling images per the
    /// options, and generating random identifiers.
    pub fn new(options: BookOptions) -> Self {
        let images = RasterImageLoader::from_options(&options);
        Self::with_collaborators(options, Box::new(FsFetcher), Box::new(images), Box::new(SystemIdentifierSource))
    }

    pub fn with_collaborators(
        options: BookOptions,
        fetcher: Box<dyn ResourceFetcher>,
        images: Box<dyn ImageLoader>,
        ids: Box<dyn IdentifierSource>,
    ) -> Self {
        let mut files = BookFiles::new(options.epub_version, &options.book_root);
        files.log.line(format!(
            "Start: EPUB {} book, language '{}'",
            options.epub_version.package_version(),
            options.language_code
        ));
        let metadata = BookMetadata {
            language: options.language_code.clone(),
            ..BookMetadata::default()
        };
        Self {
            nav: NavigationTree::new(options.writing_direction),
            options,
            fetcher,
            images,
            ids,
            files,
            metadata,
            chapter_count: 0,
            chapters: Vec::new(),
            references: HashMap::new(),
            references_order: ReferencesOrder::default(),
            references_title: ReferencesTitle::default(),
            toc: None,
            toc_nav_added: false,
            cover_set: false,
            archive: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.archive.is_some() {
            return Err(AssembleError::finalized());
        }
        Ok(())
    }

    fn version(&self) -> EpubVersion {
        self.options.epub_version
    }

    // ---- Chapters -------------------------------------------------------

    /// Add a chapter without splitting or reference rewriting.
    pub fn add_chapter(&mut self, name: &str, file_name: &str, content: impl Into<ChapterContent>) -> Result<NavId> {
        self.add_chapter_with(name, file_name, content, &ChapterOptions::default())
    }

    /// Add a chapter and its navigation entry at the current level.
    pub fn add_chapter_with(
        &mut self,
        name: &str,
        file_name: &str,
        content: impl Into<ChapterContent>,
        options: &ChapterOptions,
    ) -> Result<NavId> {
        self.ensure_open()?;
        let file_name = normalize_file_name(&relativize(file_name));

        let mut content = content.into();
        if options.auto_split {
            if let ChapterContent::Html(html) = &content {
                let split_size = self.options.effective_split_size();
                if html.len() > split_size {
                    let parts = ChapterSplitter::new(split_size, self.version()).split(html);
                    if parts.len() > 1 {
                        self.files.log.line(format!("addChapter: split {file_name} into {} parts", parts.len()));
                        content = ChapterContent::Parts(parts);
                    }
                }
            }
        }

        self.with_rollback(|book| match content {
            ChapterContent::Html(html) if !html.trim().is_empty() => book.add_single_chapter(name, &file_name, html, options),
            ChapterContent::Parts(parts) if !parts.is_empty() => book.add_chapter_parts(name, &file_name, parts, options),
            _ => book.add_chapter_entry(name, &file_name),
        })
    }

    /// Run a multi-step add; on failure the stored files, manifest, spine
    /// and guide are put back as they were. Callers touch the navigation
    /// tree and counters only after the last fallible step.
    fn with_rollback<T>(&mut self, add: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let checkpoint = self.files.checkpoint();
        let result = add(self);
        if result.is_err() {
            self.files.rollback(checkpoint);
        }
        result
    }

    fn add_single_chapter(&mut self, name: &str, file_name: &str, html: String, options: &ChapterOptions) -> Result<NavId> {
        if self.files.contains(file_name) {
            return Err(AssembleError::Duplicate(format!("file '{file_name}'")));
        }
        let id = format!("chapter{}", self.chapter_count + 1);
        let html_dir = archive_dir(file_name);
        let mut chapter = self.rewrite_html(html, options.external_references, &options.base_dir, &html_dir)?;
        if self.options.encode_html {
            chapter = encode_html(&chapter);
        }
        let index_points = Document::parse(&chapter).id_attributes();
        self.files.add_file(file_name, &id, chapter.into_bytes(), XHTML_MIME_TYPE)?;
        self.set_index_points(file_name, index_points);

        self.chapter_count += 1;
        self.files.opf.add_item_ref(&id, true);
        let point = NavPoint::new(&decode_html_entities(name), Some(file_name)).with_id(&id);
        Ok(self.push_chapter(name, point))
    }

    fn add_chapter_parts(&mut self, name: &str, file_name: &str, parts: Vec<String>, options: &ChapterOptions) -> Result<NavId> {
        let dir = archive_dir(file_name);
        let stem = file_stem(file_name).to_string();
        let ext = extension(file_name).unwrap_or("xhtml").to_string();
        let part_names: Vec<(String, String)> = (1..=parts.len())
            .map(|k| (format!("{stem}_{k}"), format!("{dir}{stem}_{k}.{ext}")))
            .collect();
        if let Some((_, path)) = part_names.iter().find(|(_, path)| self.files.contains(path)) {
            return Err(AssembleError::Duplicate(format!("file '{path}'")));
        }
        if let Some((id, _)) = part_names.iter().find(|(id, _)| self.files.opf.item_by_id(id).is_some()) {
            return Err(AssembleError::Duplicate(format!("manifest id '{id}'")));
        }

        self.files.log.line(format!("addChapter: {name} ({file_name}, {} parts)", parts.len()));
        for (part, (id, path)) in parts.into_iter().zip(&part_names) {
            let mut part = self.rewrite_html(part, options.external_references, &options.base_dir, &dir)?;
            if self.options.encode_html {
                part = encode_html(&part);
            }
            let index_points = Document::parse(&part).id_attributes();
            self.files.add_file(path, id, part.into_bytes(), XHTML_MIME_TYPE)?;
            self.set_index_points(path, index_points);
            self.files.opf.add_item_ref(id, true);
        }

        self.chapter_count += 1;
        let first = &part_names[0].1;
        let point = NavPoint::new(&decode_html_entities(name), Some(first)).with_id(basename(first));
        Ok(self.push_chapter(name, point))
    }

    /// Navigation-only chapter: an anchor into stored content, or the TOC
    /// page generated at finalize.
    fn add_chapter_entry(&mut self, name: &str, file_name: &str) -> Result<NavId> {
        let label = decode_html_entities(name);
        if let Some((path, anchor)) = file_name.split_once('#').filter(|(path, _)| !path.is_empty()) {
            let stem = path.split('.').next().unwrap_or(path);
            let target = self
                .files
                .opf
                .items_by_href_prefix(stem)
                .into_iter()
                .find(|item| item.has_index_point(anchor))
                .map(|item| format!("{}#{anchor}", item.href))
                .unwrap_or_else(|| file_name.to_string());

            self.chapter_count += 1;
            let id = format!("chapter{}", self.chapter_count);
            let point = NavPoint::new(&label, Some(&target)).with_id(&id);
            return Ok(self.push_chapter(name, point));
        }

        if file_name == "TOC.xhtml" {
            self.chapter_count += 1;
            let id = format!("chapter{}", self.chapter_count);
            self.files.opf.add_item_ref(TOC_REF_ID, true);
            self.toc_nav_added = true;
            let point = NavPoint::new(&label, Some(file_name)).with_id(&id);
            return Ok(self.push_chapter(name, point));
        }

        Err(AssembleError::Validation(format!(
            "chapter '{name}' has no content and '{file_name}' is neither an anchor nor TOC.xhtml"
        )))
    }

    fn push_chapter(&mut self, name: &str, point: NavPoint) -> NavId {
        let src = point.content_src.clone().unwrap_or_default();
        let id = self.nav.add_nav_point(point);
        self.chapters.push(Chapter {
            name: name.to_string(),
            point: id,
        });
        self.files.log.line(format!("addChapter: {name} -> {src}"));
        id
    }

    fn set_index_points(&mut self, href: &str, index_points: Vec<String>) {
        if let Some(item) = self.files.opf.item_by_href_mut(&normalize_file_name(href)) {
            item.index_points = index_points;
        }
    }

    fn rewrite_html(&mut self, html: String, policy: ExternalReferences, base_dir: &str, html_dir: &str) -> Result<String> {
        if policy == ExternalReferences::Ignore {
            return Ok(html);
        }
        let ctx = RewriteContext {
            policy,
            base_dir,
            html_dir,
            doc_root: self.options.doc_root.as_deref(),
            version: self.options.epub_version,
            strict_local: self.options.strict_local_resources,
        };
        ReferenceRewriter::new(self.fetcher.as_ref(), self.images.as_ref()).rewrite_html(&html, &ctx, &mut self.files)
    }

    // ---- Files ----------------------------------------------------------

    /// Store a file as is. Images are stored uncompressed.
    pub fn add_file(&mut self, file_name: &str, id: &str, data: Vec<u8>, mime: &str) -> Result<()> {
        self.ensure_open()?;
        self.files.add_file(file_name, id, data, mime)
    }

    /// Stage a file on disk; it is read when the archive is written.
    pub fn add_large_file(&mut self, file_name: &str, id: &str, path: &Path, mime: &str) -> Result<()> {
        self.ensure_open()?;
        self.files.add_large_file(file_name, id, path, mime)
    }

    /// Store a style sheet under the id `css_<id>`, optionally importing the
    /// resources its `url()` references point at.
    pub fn add_css_file(
        &mut self,
        file_name: &str,
        id: &str,
        css: &str,
        policy: ExternalReferences,
        base_dir: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        let file_name = normalize_file_name(&relativize(file_name));
        if self.files.contains(&file_name) {
            return Err(AssembleError::Duplicate(format!("file '{file_name}'")));
        }
        self.with_rollback(|book| book.store_css_file(&file_name, id, css, policy, base_dir))
    }

    fn store_css_file(&mut self, file_name: &str, id: &str, css: &str, policy: ExternalReferences, base_dir: &str) -> Result<()> {
        let css = if policy == ExternalReferences::Ignore {
            css.to_string()
        } else {
            let css_dir = archive_dir(file_name);
            let ctx = RewriteContext {
                policy,
                base_dir,
                html_dir: &css_dir,
                doc_root: self.options.doc_root.as_deref(),
                version: self.options.epub_version,
                strict_local: self.options.strict_local_resources,
            };
            ReferenceRewriter::new(self.fetcher.as_ref(), self.images.as_ref()).rewrite_css(css, &ctx, &css_dir, &mut self.files)?
        };
        self.files.add_file(file_name, &format!("css_{id}"), css.into_bytes(), "text/css")
    }

    pub fn add_file_to_meta_inf(&mut self, file_name: &str, data: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.files.add_meta_inf_file(file_name, data)
    }

    /// Add the cover image with its cover page and style sheet.
    ///
    /// Without `data`, `file_name` is read from disk (or below the document
    /// root) and passed through the image loader.
    pub fn set_cover_image(&mut self, file_name: &str, data: Option<Vec<u8>>, mime: Option<&str>) -> Result<()> {
        self.ensure_open()?;
        if self.cover_set || self.files.contains(COVER_PAGE_FILE) {
            return Err(AssembleError::State("cover image is already set".to_string()));
        }

        let (name, data, mime) = match data {
            Some(data) => {
                let mime = mime.map(str::to_string).unwrap_or_else(|| mime_from_name(file_name).to_string());
                (file_name.to_string(), data, mime)
            }
            None => {
                let bytes = self.read_cover(file_name)?;
                let image = self.images.load(&bytes, file_name)?.ok_or_else(|| {
                    AssembleError::Image(format!("{file_name} is not a supported image"))
                })?;
                let name = match extension(file_name) {
                    Some(ext) => format!("{}.{}", &file_name[..file_name.len() - ext.len() - 1], image.ext),
                    None => format!("{file_name}.{}", image.ext),
                };
                (name, image.data, image.mime)
            }
        };

        let image_path = format!("images/{}", basename(&name));
        for path in [image_path.as_str(), COVER_CSS_FILE] {
            if self.files.contains(path) {
                return Err(AssembleError::Duplicate(format!("file '{path}'")));
            }
        }

        self.with_rollback(|book| {
            book.add_css_file(COVER_CSS_FILE, "CoverPageCss", COVER_CSS, ExternalReferences::Ignore, "")?;
            book.files.add_file(&image_path, "CoverImage", data, &mime)?;
            if book.version() == EpubVersion::V3 {
                if let Some(item) = book.files.opf.item_by_href_mut(&image_path) {
                    item.properties = Some("cover-image".to_string());
                }
            }
            let page = pages::cover_page(book.version(), &image_path, book.options.viewport);
            book.add_reference_page("CoverPage", COVER_PAGE_FILE, &page, ReferenceType::Cover, ExternalReferences::Ignore, "")?;
            book.cover_set = true;
            Ok(())
        })
    }

    fn read_cover(&self, file_name: &str) -> Result<Vec<u8>> {
        let mut candidates = vec![PathBuf::from(file_name)];
        if let Some(root) = self.options.doc_root.as_deref() {
            candidates.push(Path::new(root).join(file_name.trim_start_matches('/')));
        }
        for path in &candidates {
            if let Some(data) = self.fetcher.read_local(path)? {
                return Ok(data);
            }
        }
        Err(AssembleError::ResourceNotFound {
            locator: file_name.to_string(),
            external: false,
        })
    }

    /// Add a reference page such as a dedication or a colophon. Fragments
    /// without an `<html>` element are wrapped in a page shell. The page
    /// gets the id `ref_<type>`, a spine entry and a guide entry.
    pub fn add_reference_page(
        &mut self,
        name: &str,
        file_name: &str,
        content: &str,
        kind: ReferenceType,
        policy: ExternalReferences,
        base_dir: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        if content.trim().is_empty() {
            return Ok(());
        }
        let file_name = normalize_file_name(&relativize(file_name));
        if self.files.contains(&file_name) {
            return Err(AssembleError::Duplicate(format!("file '{file_name}'")));
        }

        let mut page = if self.options.encode_html {
            encode_html(content)
        } else {
            content.to_string()
        };
        if !page.contains("<html") {
            page = pages::wrap_page(self.version(), &page);
        }
        self.with_rollback(|book| book.store_reference_page(name, file_name, page, kind, policy, base_dir))
    }

    fn store_reference_page(
        &mut self,
        name: &str,
        file_name: String,
        page: String,
        kind: ReferenceType,
        policy: ExternalReferences,
        base_dir: &str,
    ) -> Result<()> {
        let page = self.rewrite_html(page, policy, base_dir, &archive_dir(&file_name))?;

        let id = format!("ref_{}", kind.as_str());
        let index_points = Document::parse(&page).id_attributes();
        self.files.add_file(&file_name, &id, page.into_bytes(), XHTML_MIME_TYPE)?;
        self.set_index_points(&file_name, index_points);

        if kind != ReferenceType::Toc || !self.references.contains_key(&ReferenceType::Toc) {
            self.files.opf.add_item_ref(&id, true);
            self.files.opf.add_reference(kind.clone(), name, &file_name);
            self.references.insert(
                kind,
                ReferencePage {
                    href: file_name,
                    name: name.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Schedule the table of contents page, rendered at finalize.
    pub fn build_toc(&mut self, options: TocOptions) -> Result<()> {
        self.ensure_open()?;
        let mut options = options;
        options.file_name = normalize_file_name(&options.file_name);
        options.css_file = options
            .css_file
            .map(|css| normalize_file_name(&css))
            .filter(|css| !css.is_empty());
        if options.title.trim().is_empty() {
            options.title = DEFAULT_TOC_TITLE.to_string();
        }

        self.files
            .opf
            .add_reference(ReferenceType::Toc, &options.title, &options.file_name);
        if !self.toc_nav_added {
            self.files.opf.add_item_ref(TOC_REF_ID, false);
            if options.add_to_index {
                let point = NavPoint::new(&decode_html_entities(&options.title), Some(&options.file_name)).with_id(TOC_REF_ID);
                self.nav.add_nav_point(point);
            } else {
                self.references.insert(
                    ReferenceType::Toc,
                    ReferencePage {
                        href: options.file_name.clone(),
                        name: options.title.clone(),
                    },
                );
            }
        }
        self.files.log.line(format!("buildTOC: {}", options.file_name));
        self.toc = Some(options);
        Ok(())
    }

    // ---- Navigation -----------------------------------------------------

    /// With a point, add it and descend into it. Without one, descend into
    /// the most recently added point. The label is treated as HTML text.
    pub fn sub_level(&mut self, point: Option<NavPoint>) -> Result<Option<NavId>> {
        self.ensure_open()?;
        let point = point.map(|mut p| {
            p.label = decode_html_entities(&p.label);
            p
        });
        Ok(self.nav.sub_level(point))
    }

    pub fn back_level(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.nav.back_level();
        Ok(())
    }

    pub fn root_level(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.nav.root_level();
        Ok(())
    }

    pub fn set_current_level(&mut self, level: usize) -> Result<()> {
        self.ensure_open()?;
        self.nav.set_current_level(level);
        Ok(())
    }

    pub fn current_level(&self) -> usize {
        self.nav.current_level()
    }

    pub fn navigation(&self) -> &NavigationTree {
        &self.nav
    }

    // ---- Metadata -------------------------------------------------------

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.title = title.trim().to_string();
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn set_language(&mut self, language: &str) -> Result<()> {
        self.ensure_open()?;
        let language = language.trim();
        if !is_valid_language(language) {
            return Err(AssembleError::Validation(format!("invalid language code '{language}'")));
        }
        self.metadata.language = language.to_string();
        Ok(())
    }

    pub fn language(&self) -> &str {
        &self.metadata.language
    }

    pub fn set_identifier(&mut self, identifier: &str, kind: IdentifierType) -> Result<()> {
        self.ensure_open()?;
        self.metadata.identifier = identifier.trim().to_string();
        self.metadata.identifier_type = kind;
        Ok(())
    }

    pub fn identifier(&self) -> &str {
        &self.metadata.identifier
    }

    pub fn identifier_type(&self) -> IdentifierType {
        self.metadata.identifier_type
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.description = description.trim().to_string();
        Ok(())
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    /// `sort_key` is the `file-as` form, e.g. "Doe, Jane".
    pub fn set_author(&mut self, name: &str, sort_key: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.author = name.trim().to_string();
        self.metadata.author_sort_key = sort_key.trim().to_string();
        Ok(())
    }

    pub fn author(&self) -> &str {
        &self.metadata.author
    }

    pub fn author_sort_key(&self) -> &str {
        &self.metadata.author_sort_key
    }

    pub fn set_publisher(&mut self, name: &str, url: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.publisher_name = name.trim().to_string();
        self.metadata.publisher_url = url.trim().to_string();
        Ok(())
    }

    pub fn publisher_name(&self) -> &str {
        &self.metadata.publisher_name
    }

    pub fn publisher_url(&self) -> &str {
        &self.metadata.publisher_url
    }

    /// Publication date as seconds since the UNIX epoch.
    pub fn set_date(&mut self, unix_time: i64) -> Result<()> {
        self.ensure_open()?;
        self.metadata.date = Some(unix_time);
        Ok(())
    }

    pub fn date(&self) -> Option<i64> {
        self.metadata.date
    }

    pub fn set_rights(&mut self, rights: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.rights = rights.trim().to_string();
        Ok(())
    }

    pub fn rights(&self) -> &str {
        &self.metadata.rights
    }

    /// Add a `dc:subject`. May be called repeatedly.
    pub fn set_subject(&mut self, subject: &str) -> Result<()> {
        self.ensure_open()?;
        let subject = subject.trim();
        if !subject.is_empty() {
            self.metadata.subjects.push(subject.to_string());
        }
        Ok(())
    }

    pub fn subjects(&self) -> &[String] {
        &self.metadata.subjects
    }

    pub fn set_source_url(&mut self, url: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.source_url = url.trim().to_string();
        Ok(())
    }

    pub fn source_url(&self) -> &str {
        &self.metadata.source_url
    }

    pub fn set_coverage(&mut self, coverage: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.coverage = coverage.trim().to_string();
        Ok(())
    }

    pub fn coverage(&self) -> &str {
        &self.metadata.coverage
    }

    pub fn set_relation(&mut self, relation: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.relation = relation.trim().to_string();
        Ok(())
    }

    pub fn relation(&self) -> &str {
        &self.metadata.relation
    }

    pub fn set_generator(&mut self, generator: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.generator = generator.trim().to_string();
        Ok(())
    }

    pub fn generator(&self) -> &str {
        &self.metadata.generator
    }

    pub fn add_custom_namespace(&mut self, name: &str, uri: &str) -> Result<()> {
        self.ensure_open()?;
        self.files.opf.add_namespace(name, uri);
        Ok(())
    }

    /// EPUB 3 `prefix` attribute entry.
    pub fn add_custom_prefix(&mut self, name: &str, uri: &str) -> Result<()> {
        self.ensure_open()?;
        self.files.opf.add_prefix(name, uri);
        Ok(())
    }

    pub fn add_custom_meta_value(&mut self, value: MetaValue) -> Result<()> {
        self.ensure_open()?;
        self.files.opf.add_meta_value(value);
        Ok(())
    }

    pub fn add_custom_meta_property(&mut self, property: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        self.files.opf.add_meta_property(property, value);
        Ok(())
    }

    pub fn add_custom_metadata(&mut self, name: &str, content: &str) -> Result<()> {
        self.ensure_open()?;
        self.files.opf.add_meta(name, content);
        Ok(())
    }

    pub fn add_dublin_core_metadata(&mut self, term: DublinCoreTerm, value: &str) -> Result<()> {
        self.ensure_open()?;
        self.files
            .opf
            .add_meta_value(MetaValue::from_markup(&term.tag(), &decode_html_entities(value)));
        Ok(())
    }

    pub fn add_contributor(&mut self, name: &str, file_as: Option<&str>, role: Option<MarcRole>) -> Result<()> {
        self.ensure_open()?;
        self.files.opf.add_contributor(name, file_as, role);
        Ok(())
    }

    /// Set an EPUB 3 `rendition:*` property.
    pub fn set_rendition(&mut self, rendition: Rendition) -> Result<()> {
        self.ensure_open()?;
        if self.version() == EpubVersion::V2 {
            return Err(AssembleError::Validation("rendition properties need an EPUB 3 book".to_string()));
        }
        self.files.opf.add_prefix(RENDITION_PREFIX, RENDITION_PREFIX_URI);
        self.files.opf.add_meta_property(rendition.property(), rendition.value());
        Ok(())
    }

    /// Set or clear the viewport written into generated pages.
    pub fn set_viewport(&mut self, viewport: Option<(u32, u32)>) -> Result<()> {
        self.ensure_open()?;
        self.options.viewport = viewport;
        Ok(())
    }

    pub fn set_viewport_preset(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.options.set_viewport_preset(name)
    }

    pub fn set_references_order(&mut self, order: ReferencesOrder) -> Result<()> {
        self.ensure_open()?;
        self.references_order = order;
        Ok(())
    }

    /// Label, id and class of the navigation entry grouping the reference
    /// pages.
    pub fn set_references_title(&mut self, title: &str, id: &str, class: &str) -> Result<()> {
        self.ensure_open()?;
        self.references_title = ReferencesTitle {
            title: title.to_string(),
            id: id.to_string(),
            class: class.to_string(),
        };
        Ok(())
    }

    pub fn set_references_added_to_toc(&mut self, added: bool) -> Result<()> {
        self.ensure_open()?;
        self.options.references_added_to_toc = added;
        Ok(())
    }

    pub fn set_short_date_format(&mut self, short: bool) -> Result<()> {
        self.ensure_open()?;
        self.options.short_date_format = short;
        Ok(())
    }

    /// Change the package directory. Only possible before the first file
    /// is added.
    pub fn set_book_root(&mut self, root: &str) -> Result<()> {
        self.ensure_open()?;
        if self.files.initialized {
            return Err(AssembleError::State("book root cannot change after files were added".to_string()));
        }
        self.options.set_book_root(root);
        self.files.book_root = self.options.book_root.clone();
        Ok(())
    }

    pub fn set_split_size(&mut self, size: usize) -> Result<()> {
        self.ensure_open()?;
        self.options.set_split_size(size);
        Ok(())
    }

    pub fn split_size(&self) -> usize {
        self.options.effective_split_size()
    }

    // ---- Finalize -------------------------------------------------------

    /// Write the package documents and the archive.
    ///
    /// Fails when there are no chapters or the title or language is empty.
    /// On failure the book is left exactly as it was.
    pub fn finalize(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.chapter_count == 0 {
            return Err(AssembleError::Validation("book has no chapters".to_string()));
        }
        if self.metadata.title.is_empty() {
            return Err(AssembleError::Validation("book title is empty".to_string()));
        }
        if self.metadata.language.is_empty() {
            return Err(AssembleError::Validation("book language is empty".to_string()));
        }

        let now = self.ids.unix_time();
        let mut metadata = self.metadata.clone();
        if metadata.identifier.is_empty() {
            metadata.identifier = self.ids.uuid();
            metadata.identifier_type = IdentifierType::Uuid;
        }
        let date = *metadata.date.get_or_insert(now);
        if metadata.source_url.is_empty() {
            metadata.source_url = self.ids.source_url();
        }

        let mut opf = self.files.opf.clone();
        let mut nav = self.nav.clone();
        let mut references = self.references.clone();
        let mut staged: Vec<StagedEntry> = Vec::new();
        let mut generated: Vec<String> = Vec::new();

        let ncx_meta = self.write_metadata(&mut opf, &metadata, date);

        if let Some(first) = self.chapters.first() {
            if let Some(src) = nav.get(first.point).content_src.clone() {
                opf.add_reference(ReferenceType::Text, &decode_html_entities(&first.name), &src);
            }
        }

        if self.options.references_added_to_toc && !references.is_empty() {
            self.merge_references(&mut nav, &references);
        }

        if let Some(toc) = &self.toc {
            let page = self.render_toc_page(toc, &nav, &references);
            writer::ensure_well_formed(&toc.file_name, &page)?;
            if self.files.contains(&toc.file_name) {
                return Err(AssembleError::Duplicate(format!("file '{}'", toc.file_name)));
            }
            opf.add_item(ManifestItem::new(TOC_REF_ID, &toc.file_name, XHTML_MIME_TYPE))?;
            if !references.contains_key(&ReferenceType::Toc) {
                opf.add_item_ref(TOC_REF_ID, true);
                opf.add_reference(ReferenceType::Toc, &toc.title, &toc.file_name);
                references.insert(
                    ReferenceType::Toc,
                    ReferencePage {
                        href: toc.file_name.clone(),
                        name: toc.title.clone(),
                    },
                );
            }
            staged.push(StagedEntry::bytes(
                format!("{}{}", self.files.book_root, toc.file_name),
                page.into_bytes(),
                true,
            ));
            generated.push(toc.file_name.clone());
        }

        let ids = nav.assign_ids();
        let title = decode_html_entities(&metadata.title);
        let author = decode_html_entities(&metadata.author);
        let header = NavHeader {
            version: self.version(),
            uid: &metadata.identifier,
            language: &metadata.language,
            direction: self.options.writing_direction,
            title: &title,
            author: &author,
            meta: &ncx_meta,
        };

        if self.version() == EpubVersion::V3 {
            if self.files.contains(NAV_DOCUMENT_FILE) {
                return Err(AssembleError::Duplicate(format!("file '{NAV_DOCUMENT_FILE}'")));
            }
            let mut item = ManifestItem::new("toc", NAV_DOCUMENT_FILE, XHTML_MIME_TYPE);
            item.properties = Some("nav".to_string());
            opf.add_item(item)?;

            let landmarks: Vec<Landmark> = self
                .references_order
                .entries()
                .iter()
                .filter_map(|(kind, label)| {
                    references.get(kind).map(|page| Landmark {
                        kind: kind.clone(),
                        href: page.href.clone(),
                        label: if page.name.is_empty() {
                            escape_xml_text(label)
                        } else {
                            decode_html_entities(&page.name)
                        },
                    })
                })
                .collect();
            let doc = NavDocument {
                toc_title: DEFAULT_TOC_TITLE,
                css_file: None,
                viewport: self.options.viewport,
                landmarks_title: &self.references_title.title,
                landmarks: &landmarks,
            };
            let nav_doc = writer::render_nav_document(&header, &doc, &nav, &ids);
            writer::ensure_well_formed(NAV_DOCUMENT_FILE, &nav_doc)?;
            staged.push(StagedEntry::bytes(
                format!("{}{NAV_DOCUMENT_FILE}", self.files.book_root),
                nav_doc.into_bytes(),
                true,
            ));
            generated.push(NAV_DOCUMENT_FILE.to_string());
        }

        for itemref in opf.spine() {
            if opf.item_by_id(&itemref.idref).is_none() {
                return Err(AssembleError::Validation(format!(
                    "spine entry '{}' has no manifest item",
                    itemref.idref
                )));
            }
        }
        for point in nav.walk() {
            if let Some(src) = nav.get(point).content_src.as_deref() {
                let path = src.split('#').next().unwrap_or(src);
                if opf.item_by_href(path).is_none() {
                    log::warn!("Navigation entry points at {src}, which is not in the manifest");
                }
            }
        }

        let ncx = writer::render_ncx(&header, &nav, &ids);
        writer::ensure_well_formed(assemble_core::package::NCX_HREF, &ncx)?;
        let package = opf.render(now);
        writer::ensure_well_formed(OPF_FILE, &package)?;
        staged.push(StagedEntry::bytes(
            format!("{}{OPF_FILE}", self.files.book_root),
            package.into_bytes(),
            true,
        ));
        staged.push(StagedEntry::bytes(
            format!("{}{}", self.files.book_root, assemble_core::package::NCX_HREF),
            ncx.into_bytes(),
            true,
        ));

        let mut archive = ZipArchiveWriter::new();
        let entries: Vec<&StagedEntry> = self.files.entries.iter().chain(staged.iter()).collect();
        write_archive(&mut archive, &entries)?;
        archive
            .finish()
            .map_err(|e| AssembleError::Archive(format!("failed to finish archive: {e}")))?;

        // Commit.
        for name in &generated {
            self.files.registry.register(name, ResourceOrigin::Generated);
        }
        self.files.entries.clear();
        self.files.opf = opf;
        self.nav = nav;
        self.references = references;
        self.metadata = metadata;
        self.files.log.line(format!("finalize: {} bytes", archive.size()));
        log::info!("Finalized \"{}\" ({} bytes)", self.metadata.title, archive.size());
        self.archive = Some(archive);
        Ok(())
    }

    /// Dublin Core and `<meta>` entries. Returns the extra NCX head entries.
    fn write_metadata(&self, opf: &mut PackageDocument, metadata: &BookMetadata, date: i64) -> Vec<(String, String)> {
        let dc = |term: DublinCoreTerm, text: &str| MetaValue::from_markup(&term.tag(), &decode_html_entities(text));

        opf.add_meta_value(dc(DublinCoreTerm::Title, &metadata.title));
        opf.add_meta_value(MetaValue::new(&DublinCoreTerm::Language.tag(), &metadata.language));
        let ident = opf.ident().to_string();
        opf.add_meta_value(
            MetaValue::new(&DublinCoreTerm::Identifier.tag(), &metadata.identifier)
                .with_attr("id", &ident)
                .with_opf_attr("scheme", metadata.identifier_type.as_str()),
        );

        let when = UtcDateTime::from_unix(date);
        let date_text = if self.options.short_date_format {
            when.short_date()
        } else {
            when.long_date()
        };
        let mut date_value = MetaValue::new(&DublinCoreTerm::Date.tag(), &date_text);
        if self.version() == EpubVersion::V2 {
            date_value = date_value.with_opf_attr("event", "publication");
        }
        opf.add_meta_value(date_value);

        if !metadata.description.is_empty() {
            opf.add_meta_value(dc(DublinCoreTerm::Description, &metadata.description));
        }
        for subject in &metadata.subjects {
            opf.add_meta_value(dc(DublinCoreTerm::Subject, subject));
        }
        if !metadata.publisher_name.is_empty() {
            opf.add_meta_value(dc(DublinCoreTerm::Publisher, &metadata.publisher_name));
        }
        if !metadata.publisher_url.is_empty() {
            opf.add_meta_value(dc(DublinCoreTerm::Relation, &metadata.publisher_url));
        }
        if !metadata.author.is_empty() {
            let mut creator = dc(DublinCoreTerm::Creator, &metadata.author).with_opf_attr("role", MarcRole::Author.code());
            if !metadata.author_sort_key.is_empty() {
                creator = creator.with_opf_attr("file-as", &metadata.author_sort_key);
            }
            opf.add_meta_value(creator);
        }
        if !metadata.rights.is_empty() {
            opf.add_meta_value(dc(DublinCoreTerm::Rights, &metadata.rights));
        }
        if !metadata.coverage.is_empty() {
            opf.add_meta_value(dc(DublinCoreTerm::Coverage, &metadata.coverage));
        }
        if !metadata.source_url.is_empty() {
            opf.add_meta_value(MetaValue::new(&DublinCoreTerm::Source.tag(), &metadata.source_url));
        }
        if !metadata.relation.is_empty() {
            opf.add_meta_value(dc(DublinCoreTerm::Relation, &metadata.relation));
        }

        if self.cover_set {
            opf.add_meta("cover", "CoverImage");
        }
        let mut ncx_meta = Vec::new();
        if !metadata.generator.is_empty() {
            let generator = decode_html_entities(&metadata.generator);
            opf.add_meta("generator", &generator);
            ncx_meta.push(("dtb:generator".to_string(), generator));
        }
        if self.options.epub_mark {
            opf.add_meta("generator", &format!("epub-assemble {}", env!("CARGO_PKG_VERSION")));
        }
        ncx_meta
    }

    /// Append the reference pages under their own container at the root.
    fn merge_references(&self, nav: &mut NavigationTree, references: &HashMap<ReferenceType, ReferencePage>) {
        nav.root_level();
        let container = NavPoint::new(&decode_html_entities(&self.references_title.title), None)
            .with_id(&self.references_title.id)
            .with_class(&self.references_title.class);
        nav.sub_level(Some(container));
        let mut n = 0;
        for (kind, label) in self.references_order.entries() {
            if let Some(page) = references.get(kind) {
                n += 1;
                let name = if page.name.is_empty() { label } else { &page.name };
                nav.add_nav_point(NavPoint::new(&decode_html_entities(name), Some(&page.href)).with_id(&format!("ref-{n}")));
            }
        }
        nav.root_level();
    }

    fn render_toc_page(
        &self,
        toc: &TocOptions,
        nav: &NavigationTree,
        references: &HashMap<ReferenceType, ReferencePage>,
    ) -> String {
        let mut lines = Vec::new();
        for (kind, label) in self.references_order.entries() {
            if *kind == ReferenceType::Text {
                for chapter in &self.chapters {
                    let point = nav.get(chapter.point);
                    if let Some(src) = point.content_src.as_deref() {
                        lines.push(TocLine::chapter(src, &point.label, nav.level(chapter.point)));
                    }
                }
            } else if toc.add_references {
                if let Some(page) = references.get(kind) {
                    lines.push(TocLine::reference(&page.href, &escape_xml_text(label)));
                } else if *kind == ReferenceType::Toc {
                    lines.push(TocLine::reference(&toc.file_name, &escape_xml_text(&toc.title)));
                } else if *kind == ReferenceType::Cover && self.cover_set {
                    lines.push(TocLine::reference(COVER_PAGE_FILE, &escape_xml_text(label)));
                }
            }
        }
        let page = TocPage {
            title: &toc.title,
            css_class: &toc.css_class,
            css_file: toc.css_file.as_deref(),
            viewport: self.options.viewport,
        };
        pages::toc_page(self.version(), &page, &lines)
    }

    fn ensure_finalized(&mut self) -> Result<()> {
        if self.archive.is_none() {
            self.finalize()?;
        }
        Ok(())
    }

    // ---- Output ---------------------------------------------------------

    /// The finished archive, finalizing first when needed.
    pub fn book_bytes(&mut self) -> Result<&[u8]> {
        self.ensure_finalized()?;
        self.archive
            .as_ref()
            .and_then(|archive| archive.bytes())
            .ok_or_else(|| AssembleError::State("archive is not available".to_string()))
    }

    pub fn book_size(&mut self) -> Result<usize> {
        Ok(self.book_bytes()?.len())
    }

    /// Write the book to `dir`, appending `.epub` to the name when missing.
    /// Returns the path written.
    pub fn save_book(&mut self, file_name: &str, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = dir.as_ref().join(epub_file_name(file_name));
        std::fs::write(&path, self.book_bytes()?)?;
        self.files.log.line(format!("saveBook: {}", path.display()));
        log::info!("Wrote {}", path.display());
        Ok(path)
    }

    /// Hand the book to a delivery sink with the EPUB content type. Returns
    /// the file name used.
    pub fn send_book(&mut self, file_name: &str, sink: &mut dyn DeliverySink) -> Result<String> {
        self.ensure_finalized()?;
        let name = epub_file_name(file_name);
        let archive = self
            .archive
            .as_ref()
            .ok_or_else(|| AssembleError::State("archive is not available".to_string()))?;
        archive.stream_to(sink, &name, EPUB_MIME_TYPE)?;
        Ok(name)
    }

    // ---- Inspection -----------------------------------------------------

    /// Internal paths of every stored file, in the order they were added.
    pub fn file_list(&self) -> Vec<String> {
        self.files.registry.iter().map(|(path, _)| path.to_string()).collect()
    }

    pub fn chapter_count(&self) -> usize {
        self.chapter_count
    }

    pub fn is_finalized(&self) -> bool {
        self.archive.is_some()
    }

    pub fn package(&self) -> &PackageDocument {
        &self.files.opf
    }

    pub fn options(&self) -> &BookOptions {
        &self.options
    }

    pub fn log_lines(&self) -> &[String] {
        self.files.log.lines()
    }
}

fn epub_file_name(file_name: &str) -> String {
    if file_name.ends_with(".epub") {
        file_name.to_string()
    } else {
        format!("{file_name}.epub")
    }
}
