//! Structural documents written at finalize: `container.xml`, the NCX and
//! the EPUB 3 navigation document.

use assemble_core::error::{AssembleError, Result};
use assemble_core::nav::{NavIds, NavigationTree};
use assemble_core::reference::ReferenceType;
use assemble_core::{EpubVersion, WritingDirection};
use assemble_utils::xml::{
    escape_xml_attr, is_well_formed, XmlBuilder, CONTAINER_NS, NCX_DOCTYPE, NCX_NS, OPS_NS, XHTML_NS,
};

use crate::pages::viewport_meta_line;

pub const OPF_FILE: &str = "book.opf";
pub const NAV_DOCUMENT_FILE: &str = "epub3toc.xhtml";

pub fn container_xml(book_root: &str) -> String {
    let full_path = format!("{book_root}{OPF_FILE}");
    let mut xml = XmlBuilder::new();
    xml.open_tag("container", &[("version", "1.0"), ("xmlns", CONTAINER_NS)])
        .open_tag("rootfiles", &[])
        .empty_tag(
            "rootfile",
            &[("full-path", &full_path), ("media-type", "application/oebps-package+xml")],
        )
        .close_tag("rootfiles")
        .close_tag("container");
    xml.build()
}

/// Fail with an XML error when a generated document does not parse.
pub fn ensure_well_formed(name: &str, xml: &str) -> Result<()> {
    if is_well_formed(xml) {
        Ok(())
    } else {
        Err(AssembleError::Xml(format!("generated {name} is not well-formed")))
    }
}

/// A guide page as listed in the navigation: type, href and label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landmark {
    pub kind: ReferenceType,
    pub href: String,
    pub label: String,
}

/// Book-level values shared by the NCX and the navigation document.
#[derive(Debug, Clone)]
pub struct NavHeader<'a> {
    pub version: EpubVersion,
    pub uid: &'a str,
    pub language: &'a str,
    pub direction: WritingDirection,
    /// Escaped markup.
    pub title: &'a str,
    /// Escaped markup.
    pub author: &'a str,
    /// Extra `<meta name content>` pairs for the NCX head.
    pub meta: &'a [(String, String)],
}

/// Render `book.ncx`.
pub fn render_ncx(header: &NavHeader<'_>, nav: &NavigationTree, ids: &NavIds) -> String {
    let mut nav_map = XmlBuilder::fragment(1);
    let depth = nav.render_ncx_nav_map(&mut nav_map, ids).to_string();

    let mut xml = XmlBuilder::new();
    if header.version == EpubVersion::V2 {
        xml.doctype(NCX_DOCTYPE);
    }
    xml.open_tag(
        "ncx",
        &[
            ("xmlns", NCX_NS),
            ("version", "2005-1"),
            ("xml:lang", header.language),
            ("dir", header.direction.as_str()),
        ],
    );
    xml.open_tag("head", &[]);
    xml.empty_tag("meta", &[("name", "dtb:uid"), ("content", header.uid)]);
    xml.empty_tag("meta", &[("name", "dtb:depth"), ("content", &depth)]);
    xml.empty_tag("meta", &[("name", "dtb:totalPageCount"), ("content", "0")]);
    xml.empty_tag("meta", &[("name", "dtb:maxPageNumber"), ("content", "0")]);
    for (name, content) in header.meta {
        xml.empty_tag("meta", &[("name", name), ("content", content)]);
    }
    xml.close_tag("head");

    xml.open_tag("docTitle", &[]);
    xml.markup_element("text", header.title, &[]);
    xml.close_tag("docTitle");
    xml.open_tag("docAuthor", &[]);
    xml.markup_element("text", header.author, &[]);
    xml.close_tag("docAuthor");

    xml.raw(&nav_map.build());
    xml.close_tag("ncx");
    xml.build()
}

/// Options for the EPUB 3 navigation document.
#[derive(Debug, Clone)]
pub struct NavDocument<'a> {
    /// Heading of the table of contents.
    pub toc_title: &'a str,
    pub css_file: Option<&'a str>,
    pub viewport: Option<(u32, u32)>,
    /// Heading of the landmarks list.
    pub landmarks_title: &'a str,
    pub landmarks: &'a [Landmark],
}

/// Render the EPUB 3 navigation document with its `toc` and `landmarks`
/// navs.
pub fn render_nav_document(header: &NavHeader<'_>, doc: &NavDocument<'_>, nav: &NavigationTree, ids: &NavIds) -> String {
    let dir = header.direction.as_str();
    let mut xml = XmlBuilder::new();
    xml.open_tag(
        "html",
        &[
            ("xmlns", XHTML_NS),
            ("xmlns:epub", OPS_NS),
            ("xml:lang", header.language),
            ("lang", header.language),
            ("dir", dir),
        ],
    );
    xml.open_tag("head", &[]);
    xml.markup_element("title", header.title, &[]);
    xml.empty_tag("meta", &[("http-equiv", "default-style"), ("content", "text/html; charset=utf-8")]);
    if let Some(line) = viewport_meta_line(doc.viewport) {
        xml.raw_line(&line);
    }
    if let Some(css) = doc.css_file {
        xml.empty_tag("link", &[("rel", "stylesheet"), ("href", css), ("type", "text/css")]);
    }
    xml.close_tag("head");

    xml.open_tag("body", &[("epub:type", "frontmatter toc")]);
    xml.open_tag("header", &[]);
    xml.text_element("h1", doc.toc_title, &[]);
    xml.close_tag("header");
    nav.render_toc_nav(&mut xml, ids);

    if !doc.landmarks.is_empty() {
        xml.open_tag("nav", &[("epub:type", "landmarks")]);
        if header.direction == WritingDirection::Rtl {
            xml.text_element("h2", doc.landmarks_title, &[("dir", "rtl")]);
        } else {
            xml.text_element("h2", doc.landmarks_title, &[]);
        }
        xml.open_tag("ol", &[]);
        for landmark in doc.landmarks {
            xml.raw_line(&format!(
                "<li><a epub:type=\"{}\" href=\"{}\">{}</a></li>",
                escape_xml_attr(landmark.kind.as_str()),
                escape_xml_attr(&landmark.href),
                landmark.label
            ));
        }
        xml.close_tag("ol");
        xml.close_tag("nav");
    }

    xml.close_tag("body");
    xml.close_tag("html");
    xml.build()
}
