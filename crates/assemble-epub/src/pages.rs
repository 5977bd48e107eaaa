//! Generated XHTML pages: the reference page shell, the cover page and the
//! human-readable table of contents.

use assemble_core::EpubVersion;
use assemble_utils::xml::{escape_xml_attr, XmlBuilder, OPS_NS, XHTML11_DOCTYPE, XHTML_NS};

pub const COVER_PAGE_FILE: &str = "CoverPage.xhtml";
pub const COVER_CSS_FILE: &str = "Styles/CoverPage.css";

pub const COVER_CSS: &str = "@page, body, div, img {\n\tpadding: 0pt;\n\tmargin:0pt;\n}\n\nbody {\n\ttext-align: center;\n}\n";

/// `<meta name="viewport">` line for fixed-layout pages.
pub fn viewport_meta_line(viewport: Option<(u32, u32)>) -> Option<String> {
    viewport.map(|(width, height)| format!("<meta name=\"viewport\" content=\"width={width}, height={height}\"/>"))
}

fn page_start(version: EpubVersion, lang: Option<&str>) -> XmlBuilder {
    let mut xml = XmlBuilder::new();
    match version {
        EpubVersion::V2 => {
            xml.doctype(XHTML11_DOCTYPE);
            let mut attrs: Vec<(&str, &str)> = vec![("xmlns", XHTML_NS)];
            if let Some(lang) = lang {
                attrs.push(("xml:lang", lang));
            }
            xml.open_tag("html", &attrs);
            xml.open_tag("head", &[]);
            xml.empty_tag("meta", &[("http-equiv", "Content-Type"), ("content", "text/html; charset=utf-8")]);
        }
        EpubVersion::V3 => {
            xml.open_tag("html", &[("xmlns", XHTML_NS), ("xmlns:epub", OPS_NS)]);
            xml.open_tag("head", &[]);
            xml.empty_tag("meta", &[("http-equiv", "Default-Style"), ("content", "text/html; charset=utf-8")]);
        }
    }
    xml
}

/// Wrap a body fragment in a complete XHTML document.
pub fn wrap_page(version: EpubVersion, content: &str) -> String {
    let mut xml = page_start(version, None);
    xml.text_element("title", "", &[]);
    xml.close_tag("head");
    xml.open_tag("body", &[]);
    xml.raw(content.trim_end());
    xml.raw("\n");
    xml.close_tag("body");
    xml.close_tag("html");
    xml.build()
}

pub fn cover_page(version: EpubVersion, image_path: &str, viewport: Option<(u32, u32)>) -> String {
    let mut xml = page_start(version, Some("en"));
    if let Some(line) = viewport_meta_line(viewport) {
        xml.raw_line(&line);
    }
    xml.text_element("title", "Cover Image", &[]);
    xml.empty_tag("link", &[("type", "text/css"), ("rel", "stylesheet"), ("href", COVER_CSS_FILE)]);
    xml.close_tag("head");
    xml.open_tag("body", &[]);
    let wrapper = match version {
        EpubVersion::V2 => {
            xml.open_tag("div", &[]);
            "div"
        }
        EpubVersion::V3 => {
            xml.open_tag("section", &[("epub:type", "cover")]);
            "section"
        }
    };
    xml.empty_tag("img", &[("src", image_path), ("alt", "Cover image"), ("style", "height: 100%")]);
    xml.close_tag(wrapper);
    xml.close_tag("body");
    xml.close_tag("html");
    xml.build()
}

/// One line of the table of contents page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocLine {
    pub href: String,
    /// Escaped markup.
    pub label: String,
    pub class: String,
}

impl TocLine {
    /// A chapter entry. Level 2 (children of the root) is indented least.
    pub fn chapter(href: &str, label: &str, nav_level: usize) -> Self {
        Self {
            href: href.to_string(),
            label: label.to_string(),
            class: format!("level{}", nav_level.saturating_sub(1).clamp(1, 7)),
        }
    }

    pub fn reference(href: &str, label: &str) -> Self {
        Self {
            href: href.to_string(),
            label: label.to_string(),
            class: "level1 reference".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TocPage<'a> {
    pub title: &'a str,
    pub css_class: &'a str,
    pub css_file: Option<&'a str>,
    pub viewport: Option<(u32, u32)>,
}

pub fn toc_page(version: EpubVersion, page: &TocPage<'_>, lines: &[TocLine]) -> String {
    let prefix = if page.css_class.is_empty() {
        String::new()
    } else {
        format!("{} ", page.css_class)
    };

    let mut xml = page_start(version, None);
    if let Some(line) = viewport_meta_line(page.viewport) {
        xml.raw_line(&line);
    }
    xml.open_tag("style", &[("type", "text/css")]);
    for level in 1..=7 {
        xml.raw_line(&format!("{prefix}.level{level} {{text-indent: {:>2}em;}}", (level - 1) * 2));
    }
    xml.raw_line(&format!("{prefix}.reference {{}}"));
    xml.close_tag("style");
    if let Some(css) = page.css_file {
        xml.empty_tag("link", &[("rel", "stylesheet"), ("type", "text/css"), ("href", css)]);
    }
    xml.text_element("title", page.title, &[]);
    xml.close_tag("head");

    xml.open_tag("body", &[]);
    xml.text_element("h3", page.title, &[]);
    if page.css_class.is_empty() {
        xml.open_tag("div", &[]);
    } else {
        xml.open_tag("div", &[("class", page.css_class)]);
    }
    for line in lines {
        xml.raw_line(&format!(
            "<p class=\"{}\"><a href=\"{}\">{}</a></p>",
            escape_xml_attr(&line.class),
            escape_xml_attr(&line.href),
            line.label
        ));
    }
    xml.close_tag("div");
    xml.close_tag("body");
    xml.close_tag("html");
    xml.build()
}
