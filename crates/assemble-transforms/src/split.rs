//! Splits oversized chapters into several complete XHTML documents.
//!
//! Every part repeats the original `<html>` attributes and `<head>`, and
//! reopens the elements that were open where the part begins, so each part
//! is well-formed on its own.

use regex::Regex;

use assemble_core::options::MIN_SPLIT_SIZE;
use assemble_core::EpubVersion;
use assemble_utils::text::{decode_html_entities, html_to_text};
use assemble_utils::xml::{XHTML11_DOCTYPE, XML_DECLARATION};

use crate::dom::{Document, NodeData, NodeId};

/// Where to start a new part when splitting at boundaries.
#[derive(Debug, Clone)]
pub enum SplitBoundary {
    /// An element whose markup begins with a tag followed by this text.
    Text(String),
    /// An element whose markup matches.
    Pattern(Regex),
}

impl SplitBoundary {
    fn matches(&self, markup: &str) -> bool {
        match self {
            SplitBoundary::Text(text) => markup
                .find('>')
                .is_some_and(|end| markup.starts_with('<') && markup[end + 1..].starts_with(text.as_str())),
            SplitBoundary::Pattern(pattern) => pattern.is_match(markup),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChapterSplitter {
    split_size: usize,
    version: EpubVersion,
}

#[derive(Default)]
struct Part {
    key: String,
    markup: String,
    size: usize,
    has_content: bool,
}

struct Walk<'a> {
    doc: &'a Document,
    budget: usize,
    boundary: Option<&'a SplitBoundary>,
    open: Vec<NodeId>,
    parts: Vec<Part>,
    current: Part,
}

impl ChapterSplitter {
    /// `split_size` is floored at 10240 bytes.
    pub fn new(split_size: usize, version: EpubVersion) -> Self {
        Self {
            split_size: split_size.max(MIN_SPLIT_SIZE),
            version,
        }
    }

    pub fn split_size(&self) -> usize {
        self.split_size
    }

    /// Split by size. A chapter no larger than the split size comes back
    /// unchanged as the only part.
    pub fn split(&self, chapter: &str) -> Vec<String> {
        if chapter.len() <= self.split_size {
            return vec![chapter.to_string()];
        }
        self.split_document(chapter, None)
            .into_iter()
            .map(|(_, doc)| doc)
            .collect()
    }

    /// Start a new part at every element matching `boundary`, ignoring the
    /// size budget. Parts are keyed by the text of the matching element;
    /// content before the first match is keyed by an empty string.
    pub fn split_at(&self, chapter: &str, boundary: &SplitBoundary) -> Vec<(String, String)> {
        self.split_document(chapter, Some(boundary))
    }

    fn split_document(&self, chapter: &str, boundary: Option<&SplitBoundary>) -> Vec<(String, String)> {
        let doc = Document::parse(chapter);
        let Some(body) = doc.body() else {
            return vec![(String::new(), chapter.to_string())];
        };

        let with_doctype = self.version == EpubVersion::V2;
        let mut header_size = XML_DECLARATION.len() + 1;
        if with_doctype {
            header_size += XHTML11_DOCTYPE.len() + 1;
        }
        if let Some(html) = doc.html() {
            header_size += doc.start_tag(html).len() + "</html>\n".len();
        }
        let head_size = header_size + doc.head().map_or(0, |head| doc.outer_xhtml(head).len());
        let body_size = doc.outer_xhtml(body).len();

        let mut budget = self.split_size.saturating_sub(head_size).max(1);
        if body_size > budget {
            let parts = body_size.div_ceil(budget);
            budget = (body_size / parts).saturating_sub(head_size).max(1);
        }
        log::debug!("Splitting {body_size} byte body into parts of at most {budget} bytes");

        let mut walk = Walk {
            doc: &doc,
            budget,
            boundary,
            open: Vec::new(),
            parts: Vec::new(),
            current: Part::default(),
        };
        walk.visit_children(body);
        let parts = walk.finish();

        parts
            .into_iter()
            .map(|part| {
                let mut fragment = doc.clone();
                fragment.clear_children(body);
                let raw = fragment.create_raw(&part.markup);
                fragment.append_child(body, raw);
                (part.key, fragment.to_xhtml(with_doctype))
            })
            .collect()
    }
}

impl Walk<'_> {
    fn visit_children(&mut self, parent: NodeId) {
        let children = self.doc.children(parent).to_vec();
        for node in children {
            let markup = self.doc.outer_xhtml(node);
            let size = markup.len();

            let is_element = matches!(self.doc.data(node), NodeData::Element(_));
            if is_element && size > self.budget && !self.doc.children(node).is_empty() {
                self.open_element(node);
                self.visit_children(node);
                self.close_element(node);
                continue;
            }

            let at_boundary = is_element && self.boundary.is_some_and(|b| b.matches(&markup));
            let over_budget = self.boundary.is_none() && self.current.size + size > self.budget;
            if self.current.has_content && (at_boundary || over_budget) {
                self.start_part();
            }
            if at_boundary {
                self.current.key = decode_html_entities(html_to_text(&markup).trim());
            }
            self.current.markup.push_str(&markup);
            self.current.size += size;
            self.current.has_content = true;
        }
    }

    fn open_element(&mut self, node: NodeId) {
        let tag = self.doc.start_tag(node);
        self.current.size += tag.len();
        self.current.markup.push_str(&tag);
        self.open.push(node);
    }

    fn close_element(&mut self, node: NodeId) {
        self.open.pop();
        let tag = self.doc.end_tag(node);
        self.current.size += tag.len();
        self.current.markup.push_str(&tag);
    }

    /// Close the open elements in the current part and reopen them as empty
    /// copies in a new one.
    fn start_part(&mut self) {
        for &node in self.open.iter().rev() {
            self.current.markup.push_str(&self.doc.end_tag(node));
        }
        let mut next = Part::default();
        for &node in &self.open {
            let tag = self.doc.start_tag(node);
            next.size += tag.len();
            next.markup.push_str(&tag);
        }
        self.parts.push(std::mem::replace(&mut self.current, next));
    }

    fn finish(mut self) -> Vec<Part> {
        if self.current.has_content || self.parts.is_empty() {
            self.parts.push(self.current);
        }
        self.parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assemble_utils::xml::is_well_formed;

    fn chapter(body: &str) -> String {
        format!(
            "<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"en\"><head><title>Long</title></head><body>{body}</body></html>"
        )
    }

    fn paragraphs(count: usize) -> String {
        (0..count)
            .map(|i| format!("<p id=\"p{i}\">Paragraph {i} with some filler text to take up a little room.</p>"))
            .collect()
    }

    fn body_markup(xhtml: &str) -> String {
        let doc = Document::parse(xhtml);
        doc.inner_xhtml(doc.body().unwrap())
    }

    #[test]
    fn test_small_chapter_unchanged() {
        let splitter = ChapterSplitter::new(250_000, EpubVersion::V2);
        let html = chapter("<p>short</p>");
        assert_eq!(splitter.split(&html), vec![html]);
    }

    #[test]
    fn test_split_size_floor() {
        assert_eq!(ChapterSplitter::new(100, EpubVersion::V2).split_size(), MIN_SPLIT_SIZE);
    }

    #[test]
    fn test_parts_rejoin_and_fit() {
        let splitter = ChapterSplitter::new(10_240, EpubVersion::V3);
        let html = chapter(&paragraphs(500));
        let parts = splitter.split(&html);
        assert!(parts.len() >= 4, "got {} parts", parts.len());

        let head_overhead = 400;
        for part in &parts {
            assert!(is_well_formed(part));
            assert!(part.len() <= splitter.split_size() + head_overhead, "part of {} bytes", part.len());
            assert!(part.contains("<title>Long</title>"));
            assert!(part.contains("xml:lang=\"en\""));
            assert!(!part.contains("<!DOCTYPE"));
        }
        let rejoined: String = parts.iter().map(|p| body_markup(p)).collect();
        assert_eq!(rejoined, body_markup(&html));
    }

    #[test]
    fn test_nested_wrappers_reopened() {
        let splitter = ChapterSplitter::new(10_240, EpubVersion::V2);
        let html = chapter(&format!("<div class=\"wrap\"><section>{}</section></div>", paragraphs(400)));
        let parts = splitter.split(&html);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(is_well_formed(part));
            assert!(part.contains("<!DOCTYPE html"));
            assert!(body_markup(part).starts_with("<div class=\"wrap\"><section>"));
        }
    }

    #[test]
    fn test_split_at_text_boundary() {
        let splitter = ChapterSplitter::new(250_000, EpubVersion::V3);
        let html = chapter(
            "<h2>Chapter 1</h2><p>one</p><h2>Chapter 2</h2><p>two</p><h2>Epilogue</h2><p>end</p>",
        );
        let parts = splitter.split_at(&html, &SplitBoundary::Text("Chapter ".to_string()));
        let keys: Vec<_> = parts.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Chapter 1", "Chapter 2"]);
        assert!(parts[1].1.contains("<h2>Epilogue</h2>"));
    }

    #[test]
    fn test_split_at_pattern_with_preamble() {
        let splitter = ChapterSplitter::new(250_000, EpubVersion::V3);
        let html = chapter("<p>intro</p><h1>Part A</h1><p>a</p><h1>Part B</h1><p>b</p>");
        let boundary = SplitBoundary::Pattern(Regex::new(r"^<h1\b").unwrap());
        let parts = splitter.split_at(&html, &boundary);
        let keys: Vec<_> = parts.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["", "Part A", "Part B"]);
        assert_eq!(body_markup(&parts[0].1), "<p>intro</p>");
    }
}
