//! XML building and inspection helpers.
//!
//! [`XmlBuilder`] writes the package documents (OPF, NCX, container.xml,
//! navigation pages). The quick-xml readers below are used to inspect
//! generated documents and SVG roots.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";

/// XHTML 1.1 DOCTYPE, required on EPUB 2 content documents.
pub const XHTML11_DOCTYPE: &str = "<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\"\n    \"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">";

pub const NCX_DOCTYPE: &str = "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\"\n  \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">";

pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
pub const OPS_NS: &str = "http://www.idpf.org/2007/ops";
pub const OPF_NS: &str = "http://www.idpf.org/2007/opf";
pub const NCX_NS: &str = "http://www.daisy.org/z3986/2005/ncx/";
pub const CONTAINER_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:container";
pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
pub const DCTERMS_NS: &str = "http://purl.org/dc/terms/";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Line-oriented XML writer with tab indentation.
pub struct XmlBuilder {
    content: String,
    indent_level: usize,
}

impl XmlBuilder {
    /// Start a document with the XML declaration.
    pub fn new() -> Self {
        let mut content = String::with_capacity(4096);
        content.push_str(XML_DECLARATION);
        content.push('\n');
        Self {
            content,
            indent_level: 0,
        }
    }

    /// Start without a declaration, at the given indentation depth.
    /// Used for fragments spliced into larger documents.
    pub fn fragment(indent_level: usize) -> Self {
        Self {
            content: String::new(),
            indent_level,
        }
    }

    pub fn doctype(&mut self, doctype: &str) -> &mut Self {
        self.content.push_str(doctype);
        self.content.push('\n');
        self
    }

    pub fn open_tag(&mut self, name: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.indent();
        self.start(name, attrs);
        self.content.push_str(">\n");
        self.indent_level += 1;
        self
    }

    pub fn close_tag(&mut self, name: &str) -> &mut Self {
        self.indent_level = self.indent_level.saturating_sub(1);
        self.indent();
        self.content.push_str("</");
        self.content.push_str(name);
        self.content.push_str(">\n");
        self
    }

    pub fn empty_tag(&mut self, name: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.indent();
        self.start(name, attrs);
        self.content.push_str(" />\n");
        self
    }

    pub fn text_element(&mut self, name: &str, text: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.indent();
        self.start(name, attrs);
        self.content.push('>');
        self.content.push_str(&escape_xml_text(text));
        self.content.push_str("</");
        self.content.push_str(name);
        self.content.push_str(">\n");
        self
    }

    /// Like [`text_element`](Self::text_element) but the content is trusted
    /// markup and is written as-is.
    pub fn markup_element(&mut self, name: &str, markup: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.indent();
        self.start(name, attrs);
        self.content.push('>');
        self.content.push_str(markup);
        self.content.push_str("</");
        self.content.push_str(name);
        self.content.push_str(">\n");
        self
    }

    /// Append text verbatim, without indentation or newline.
    pub fn raw(&mut self, text: &str) -> &mut Self {
        self.content.push_str(text);
        self
    }

    /// Append an indented line verbatim.
    pub fn raw_line(&mut self, line: &str) -> &mut Self {
        self.indent();
        self.content.push_str(line);
        self.content.push('\n');
        self
    }

    pub fn blank_line(&mut self) -> &mut Self {
        self.content.push('\n');
        self
    }

    pub fn depth(&self) -> usize {
        self.indent_level
    }

    pub fn build(self) -> String {
        self.content
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.content.push('<');
        self.content.push_str(name);
        for (key, value) in attrs {
            self.content.push(' ');
            self.content.push_str(key);
            self.content.push_str("=\"");
            self.content.push_str(&escape_xml_attr(value));
            self.content.push('"');
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.indent_level {
            self.content.push('\t');
        }
    }
}

impl Default for XmlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape special characters in XML text content.
pub fn escape_xml_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape special characters in XML attribute values.
pub fn escape_xml_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Collect the text content of every element with the given qualified name.
pub fn collect_text(xml: &str, tag_name: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    let mut results = Vec::new();
    let mut depth_in_target = 0usize;
    let mut buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.name().as_ref() == tag_name.as_bytes() {
                    if depth_in_target == 0 {
                        buf.clear();
                    }
                    depth_in_target += 1;
                }
            }
            Ok(Event::Text(ref e)) if depth_in_target > 0 => {
                if let Ok(text) = e.unescape() {
                    buf.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == tag_name.as_bytes() && depth_in_target > 0 {
                    depth_in_target -= 1;
                    if depth_in_target == 0 {
                        results.push(buf.clone());
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    results
}

/// Attributes of every element with the given qualified name, in document order.
pub fn collect_attributes(xml: &str, tag_name: &str) -> Vec<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut results = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == tag_name.as_bytes() {
                    let mut attrs = HashMap::new();
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                        let value = attr
                            .unescape_value()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
                        attrs.insert(key, value);
                    }
                    results.push(attrs);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    results
}

/// Whether the document parses as well-formed XML.
pub fn is_well_formed(xml: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Vec<u8>> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(e.name().as_ref().to_vec()),
            Ok(Event::End(ref e)) => match stack.pop() {
                Some(open) if open == e.name().as_ref() => {}
                _ => return false,
            },
            Ok(Event::Eof) => return stack.is_empty(),
            Err(_) => return false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xml_builder() {
        let mut builder = XmlBuilder::new();
        builder
            .open_tag("package", &[("xmlns", OPF_NS)])
            .text_element("dc:title", "Fish & Chips", &[])
            .empty_tag("item", &[("id", "ncx"), ("href", "book.ncx")])
            .close_tag("package");

        let xml = builder.build();
        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.contains("\t<dc:title>Fish &amp; Chips</dc:title>\n"));
        assert!(xml.contains("\t<item id=\"ncx\" href=\"book.ncx\" />\n"));
        assert!(xml.ends_with("</package>\n"));
        assert!(is_well_formed(&xml));
    }

    #[test]
    fn test_fragment_indent() {
        let mut builder = XmlBuilder::fragment(2);
        builder.empty_tag("br", &[]);
        assert_eq!(builder.build(), "\t\t<br />\n");
    }

    #[test]
    fn test_collect_text_and_attributes() {
        let xml = r#"<root><navLabel><text>One</text></navLabel><text>Two &amp; three</text><item id="a" href="x.xhtml"/></root>"#;
        assert_eq!(collect_text(xml, "text"), vec!["One", "Two & three"]);
        let items = collect_attributes(xml, "item");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["href"], "x.xhtml");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_xml_text("a < b & c"), "a &lt; b &amp; c");
        assert_eq!(escape_xml_attr("say \"hello\""), "say &quot;hello&quot;");
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed("<a><b/></a>"));
        assert!(!is_well_formed("<a><b></a>"));
    }
}
