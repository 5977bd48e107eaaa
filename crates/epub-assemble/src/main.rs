//! epub-assemble — build an EPUB from a TOML book description.
//!
//! ```text
//! epub-assemble book.toml -o out/book.epub [--epub-version 3] [-v]
//! ```
//!
//! Paths inside the description are relative to the description file.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use assemble_epub::{
    BookAssembler, BookOptions, ChapterOptions, EpubVersion, ExternalReferences, IdentifierType, NavPoint,
    ReferenceType, TocOptions,
};

#[derive(Parser)]
#[command(name = "epub-assemble", version, about = "Assemble EPUB 2/3 books from HTML chapters")]
struct Cli {
    /// Book description (TOML)
    book: Option<PathBuf>,

    /// Output file. Defaults to the description name with `.epub`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// EPUB version: 2 or 3
    #[arg(long)]
    epub_version: Option<String>,

    /// Maximum image size (WxH or a preset name)
    #[arg(long)]
    max_image_size: Option<String>,

    /// JPEG quality for re-encoded images (1-100, default 80)
    #[arg(long)]
    jpeg_quality: Option<u8>,

    /// Split size in bytes for chapters marked `split`
    #[arg(long)]
    split_size: Option<usize>,

    /// Fail when a local resource referenced from a chapter is missing
    #[arg(long)]
    strict: bool,

    /// Dump effective merged config as TOML and exit
    #[arg(long)]
    dump_config: bool,
}

/// The book description file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BookSpec {
    metadata: MetadataSpec,
    cover: Option<CoverSpec>,
    css: Vec<CssSpec>,
    reference_pages: Vec<ReferencePageSpec>,
    chapters: Vec<ChapterSpec>,
    toc: Option<TocOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetadataSpec {
    title: String,
    language: Option<String>,
    identifier: Option<String>,
    identifier_type: IdentifierType,
    description: Option<String>,
    author: Option<String>,
    author_sort_key: Option<String>,
    publisher: Option<String>,
    publisher_url: Option<String>,
    /// Seconds since the UNIX epoch.
    date: Option<i64>,
    rights: Option<String>,
    subjects: Vec<String>,
    source_url: Option<String>,
    coverage: Option<String>,
    relation: Option<String>,
    generator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoverSpec {
    file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CssSpec {
    source: PathBuf,
    /// Name inside the book.
    file: String,
    id: String,
    #[serde(default)]
    references: ExternalReferences,
}

#[derive(Debug, Deserialize)]
struct ReferencePageSpec {
    title: String,
    file: String,
    source: PathBuf,
    #[serde(rename = "type")]
    kind: ReferenceType,
    #[serde(default)]
    references: ExternalReferences,
}

#[derive(Debug, Deserialize)]
struct ChapterSpec {
    title: String,
    /// Name inside the book; may be `file.xhtml#anchor` for a navigation
    /// entry into an earlier chapter.
    file: String,
    source: Option<PathBuf>,
    /// Navigation level, 1 being the top.
    #[serde(default = "top_level")]
    level: usize,
    #[serde(default)]
    split: bool,
    #[serde(default)]
    references: ExternalReferences,
    /// Add a navigation entry without a target and nest this chapter
    /// under it.
    group: Option<String>,
}

fn top_level() -> usize {
    1
}

/// Load config from global and project-local TOML files.
/// Later files override earlier ones. Missing files are silently ignored.
fn load_config() -> BookOptions {
    let mut opts = BookOptions::default();

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("epub-assemble").join("config.toml");
        if let Some(parsed) = read_config(&global_path) {
            opts = parsed;
        }
    }

    // serde(default) fills every missing field, so a local file fully
    // replaces the global one.
    if let Some(parsed) = read_config(Path::new(".epub-assemble.toml")) {
        opts = parsed;
    }
    opts
}

fn read_config(path: &Path) -> Option<BookOptions> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<BookOptions>(&contents) {
        Ok(parsed) => {
            log::debug!("Loaded config from {}", path.display());
            Some(parsed)
        }
        Err(e) => {
            log::warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

/// Apply CLI flags on top of config-loaded options.
fn apply_cli_overrides(opts: &mut BookOptions, cli: &Cli) -> Result<()> {
    if let Some(version) = cli.epub_version.as_deref() {
        opts.epub_version = match version {
            "2" | "2.0" => EpubVersion::V2,
            "3" | "3.0" => EpubVersion::V3,
            other => bail!("Unsupported EPUB version '{other}', expected 2 or 3"),
        };
    }
    if let Some(size) = cli.max_image_size.as_deref() {
        opts.max_image_size = Some(parse_size(size).with_context(|| format!("Invalid image size '{size}'"))?);
    }
    if let Some(quality) = cli.jpeg_quality {
        opts.jpeg_quality = quality.clamp(1, 100);
    }
    if let Some(size) = cli.split_size {
        opts.set_split_size(size);
    }
    if cli.strict {
        opts.strict_local_resources = true;
    }
    Ok(())
}

fn parse_size(s: &str) -> Option<(u32, u32)> {
    if let Some(size) = assemble_core::options::viewport_preset(s) {
        return Some(size);
    }
    let (w, h) = s.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut options = load_config();
    if let Err(e) = apply_cli_overrides(&mut options, &cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }

    if cli.dump_config {
        match toml::to_string_pretty(&options) {
            Ok(s) => {
                println!("{}", s);
                process::exit(0);
            }
            Err(e) => {
                eprintln!("Error serializing config: {}", e);
                process::exit(1);
            }
        }
    }

    let Some(book) = cli.book.as_deref() else {
        eprintln!("Usage: epub-assemble <book.toml> [-o <output.epub>] [options]");
        process::exit(1);
    };

    if let Err(e) = run(book, cli.output.as_deref(), options) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(description: &Path, output: Option<&Path>, options: BookOptions) -> Result<()> {
    let text = std::fs::read_to_string(description)
        .with_context(|| format!("Cannot read book description {}", description.display()))?;
    let spec: BookSpec =
        toml::from_str(&text).with_context(|| format!("Invalid book description {}", description.display()))?;
    let base = description.parent().unwrap_or(Path::new("")).to_path_buf();

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => description.with_extension("epub"),
    };
    log::info!("Assembling {} → {}", description.display(), output.display());

    let mut book = assemble(&spec, &base, options)?;
    let dir = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = output
        .file_name()
        .and_then(|n| n.to_str())
        .context("Output path has no file name")?;
    let written = book
        .save_book(name, dir)
        .with_context(|| format!("Cannot write {}", output.display()))?;
    log::info!(
        "Wrote {} ({} chapters, {} bytes)",
        written.display(),
        book.chapter_count(),
        book.book_size()?
    );
    Ok(())
}

fn assemble(spec: &BookSpec, base: &Path, options: BookOptions) -> Result<BookAssembler> {
    let mut book = BookAssembler::new(options);
    apply_metadata(&mut book, &spec.metadata)?;

    if let Some(cover) = &spec.cover {
        let path = base.join(&cover.file);
        book.set_cover_image(&path.to_string_lossy(), None, None)
            .with_context(|| format!("Cannot add cover {}", path.display()))?;
    }

    for css in &spec.css {
        let path = base.join(&css.source);
        let text = read_text(&path)?;
        book.add_css_file(&css.file, &css.id, &text, css.references, &dir_of(&path))
            .with_context(|| format!("Cannot add style sheet {}", css.file))?;
    }

    for page in &spec.reference_pages {
        let path = base.join(&page.source);
        let text = read_text(&path)?;
        book.add_reference_page(&page.title, &page.file, &text, page.kind.clone(), page.references, &dir_of(&path))
            .with_context(|| format!("Cannot add reference page {}", page.file))?;
    }

    for chapter in &spec.chapters {
        move_to_level(&mut book, chapter.level)?;
        if let Some(group) = &chapter.group {
            book.sub_level(Some(NavPoint::new(group, None)))?;
        }

        let (content, base_dir) = match &chapter.source {
            Some(source) => {
                let path = base.join(source);
                (read_text(&path)?, dir_of(&path))
            }
            None => (String::new(), base.to_string_lossy().to_string()),
        };
        let options = ChapterOptions {
            auto_split: chapter.split,
            external_references: chapter.references,
            base_dir,
        };
        book.add_chapter_with(&chapter.title, &chapter.file, content, &options)
            .with_context(|| format!("Cannot add chapter {}", chapter.file))?;

        if chapter.group.is_some() {
            book.back_level()?;
        }
    }

    if let Some(toc) = &spec.toc {
        book.build_toc(toc.clone()).context("Cannot add table of contents")?;
    }
    Ok(book)
}

fn apply_metadata(book: &mut BookAssembler, meta: &MetadataSpec) -> Result<()> {
    if meta.title.trim().is_empty() {
        bail!("The book description needs a metadata.title");
    }
    book.set_title(&meta.title)?;
    if let Some(language) = &meta.language {
        book.set_language(language)?;
    }
    if let Some(identifier) = &meta.identifier {
        book.set_identifier(identifier, meta.identifier_type)?;
    }
    if let Some(author) = &meta.author {
        book.set_author(author, meta.author_sort_key.as_deref().unwrap_or(""))?;
    }
    if let Some(publisher) = &meta.publisher {
        book.set_publisher(publisher, meta.publisher_url.as_deref().unwrap_or(""))?;
    }
    if let Some(date) = meta.date {
        book.set_date(date)?;
    }
    for subject in &meta.subjects {
        book.set_subject(subject)?;
    }

    let optional: [(&Option<String>, fn(&mut BookAssembler, &str) -> assemble_epub::Result<()>); 6] = [
        (&meta.description, BookAssembler::set_description),
        (&meta.rights, BookAssembler::set_rights),
        (&meta.source_url, BookAssembler::set_source_url),
        (&meta.coverage, BookAssembler::set_coverage),
        (&meta.relation, BookAssembler::set_relation),
        (&meta.generator, BookAssembler::set_generator),
    ];
    for (value, setter) in optional {
        if let Some(value) = value {
            setter(book, value)?;
        }
    }
    Ok(())
}

/// Position the navigation cursor so the next chapter lands at `level`.
fn move_to_level(book: &mut BookAssembler, level: usize) -> Result<()> {
    let level = level.max(1);
    if level < book.current_level() {
        book.set_current_level(level)?;
    }
    while book.current_level() < level {
        let before = book.current_level();
        book.sub_level(None)?;
        if book.current_level() == before {
            bail!("Chapter level {level} has no parent entry to nest under");
        }
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))
}

fn dir_of(path: &Path) -> String {
    path.parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"
[metadata]
title = "Sample Book"
author = "Jane Doe"
author_sort_key = "Doe, Jane"
subjects = ["Fiction", "Test"]
date = 1700000000

[[chapters]]
title = "Chapter 1"
file = "chapter1.xhtml"
source = "chapter1.html"

[[chapters]]
title = "Section 1.1"
file = "chapter1.xhtml#s1"
level = 2

[[chapters]]
title = "Chapter 2"
file = "chapter2.xhtml"
source = "chapter2.html"
references = "add"

[toc]
title = "Contents"
"#;

    fn chapter(title: &str, body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\
             <head><title>{title}</title></head><body><h1>{title}</h1>{body}</body></html>"
        )
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("800x600"), Some((800, 600)));
        assert_eq!(parse_size("ipad"), Some((768, 1024)));
        assert_eq!(parse_size("wide"), None);
    }

    #[test]
    fn test_parse_description() {
        let spec: BookSpec = toml::from_str(DESCRIPTION).unwrap();
        assert_eq!(spec.metadata.title, "Sample Book");
        assert_eq!(spec.chapters.len(), 3);
        assert_eq!(spec.chapters[1].level, 2);
        assert_eq!(spec.chapters[2].references, ExternalReferences::Add);
        assert_eq!(spec.toc.unwrap().title, "Contents");
    }

    #[test]
    fn test_assemble_from_description() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chapter1.html"), chapter("Chapter 1", "<h2 id=\"s1\">S1</h2>")).unwrap();
        std::fs::write(dir.path().join("chapter2.html"), chapter("Chapter 2", "<p>Two</p>")).unwrap();
        let description = dir.path().join("sample.toml");
        std::fs::write(&description, DESCRIPTION).unwrap();

        run(&description, None, BookOptions::default()).unwrap();
        let bytes = std::fs::read(dir.path().join("sample.epub")).unwrap();
        let names = assemble_utils::archive::list_zip_entries(&bytes).unwrap();
        assert_eq!(names[0], "mimetype");
        assert!(names.contains(&"OEBPS/TOC.xhtml".to_string()));
        assert!(names.contains(&"OEBPS/chapter2.xhtml".to_string()));
    }

    #[test]
    fn test_missing_title_rejected() {
        let spec: BookSpec = toml::from_str("[[chapters]]\ntitle = \"One\"\nfile = \"one.xhtml\"\n").unwrap();
        assert!(assemble(&spec, Path::new("."), BookOptions::default()).is_err());
    }
}
