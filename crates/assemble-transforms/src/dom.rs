//! Owned, mutable HTML tree.
//!
//! Documents are parsed with `scraper` and copied into an arena so the
//! rewriter can replace and remove nodes, then serialized back as XHTML.

use scraper::{Html, Node};

use assemble_utils::xml::{
    escape_xml_attr, escape_xml_text, OPS_NS, SVG_NS, XHTML11_DOCTYPE, XHTML_NS, XLINK_NS,
    XML_DECLARATION,
};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

impl ElementData {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
    /// Serialized markup written out verbatim.
    Raw(String),
}

#[derive(Debug, Clone)]
struct Slot {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
}

impl Document {
    /// Parse an HTML or XHTML string. Missing `html`, `head` and `body`
    /// elements are synthesized by the parser.
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut doc = Self {
            slots: vec![Slot {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        };
        let mut stack: Vec<_> = parsed
            .tree
            .root()
            .children()
            .map(|child| (doc.root(), child))
            .collect();
        stack.reverse();
        while let Some((parent, node)) = stack.pop() {
            let data = match node.value() {
                Node::Element(element) => NodeData::Element(ElementData {
                    name: element.name().to_string(),
                    attrs: element
                        .attrs()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                }),
                Node::Text(text) => NodeData::Text(String::from(&**text)),
                // The parser turns an XML declaration into a comment.
                Node::Comment(comment) if comment.starts_with("?xml") => continue,
                Node::Comment(comment) => NodeData::Comment(String::from(&**comment)),
                _ => continue,
            };
            let id = doc.push(data);
            doc.append_child(parent, id);
            let children: Vec<_> = node.children().collect();
            stack.extend(children.into_iter().rev().map(|child| (id, child)));
        }
        doc
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.slots[id.0].data
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slots[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.0].parent
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.slots[id.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match &mut self.slots[id.0].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.name.as_str())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.attr(name))
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(element) = self.element_mut(id) {
            match element.attrs.iter_mut().find(|(k, _)| k == name) {
                Some(pair) => pair.1 = value.to_string(),
                None => element.attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn create_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.push(NodeData::Element(ElementData {
            name: name.to_string(),
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_raw(&mut self, markup: &str) -> NodeId {
        self.push(NodeData::Raw(markup.to_string()))
    }

    /// Append `child` to `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.slots[child.0].parent = Some(parent);
        self.slots[parent.0].children.push(child);
    }

    /// Put `replacement` where `target` was. `target` ends up detached.
    pub fn replace(&mut self, target: NodeId, replacement: NodeId) {
        self.detach(replacement);
        let Some(parent) = self.slots[target.0].parent else {
            return;
        };
        if let Some(pos) = self.slots[parent.0].children.iter().position(|&c| c == target) {
            self.slots[parent.0].children[pos] = replacement;
            self.slots[replacement.0].parent = Some(parent);
            self.slots[target.0].parent = None;
        }
    }

    /// Remove a node and its subtree from the tree.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.slots[id.0].parent.take() {
            self.slots[parent.0].children.retain(|&c| c != id);
        }
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.slots[id.0].data {
            NodeData::Text(text) => out.push_str(text),
            _ => {
                for &child in &self.slots[id.0].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Replace the children of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        self.clear_children(id);
        let text = self.create_text(text);
        self.append_child(id, text);
    }

    pub fn clear_children(&mut self, id: NodeId) {
        for child in std::mem::take(&mut self.slots[id.0].children) {
            self.slots[child.0].parent = None;
        }
    }

    /// Attached descendants of `id` in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.slots[id.0].children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.slots[node.0].children.iter().rev().copied());
        }
        out
    }

    /// Attached elements named `tag` in document order.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&id| self.tag_name(id).is_some_and(|name| name.eq_ignore_ascii_case(tag)))
            .collect()
    }

    pub fn first_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.elements_by_tag(tag).into_iter().next()
    }

    pub fn html(&self) -> Option<NodeId> {
        self.first_by_tag("html")
    }

    pub fn head(&self) -> Option<NodeId> {
        self.first_by_tag("head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.first_by_tag("body")
    }

    /// Values of every `id` attribute in document order.
    pub fn id_attributes(&self) -> Vec<String> {
        self.descendants(self.root())
            .into_iter()
            .filter_map(|node| self.attr(node, "id"))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// XHTML markup of `id` and its subtree.
    pub fn outer_xhtml(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, false, &mut out);
        out
    }

    /// XHTML markup of the children of `id`.
    pub fn inner_xhtml(&self, id: NodeId) -> String {
        let mut out = String::new();
        let in_svg = self.tag_name(id) == Some("svg");
        for &child in &self.slots[id.0].children {
            self.write_node(child, in_svg, &mut out);
        }
        out
    }

    /// Opening tag of an element, e.g. `<div class="x">`.
    pub fn start_tag(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(element) = self.element(id) {
            write_start(element, false, &mut out);
            out.push('>');
        }
        out
    }

    pub fn end_tag(&self, id: NodeId) -> String {
        self.tag_name(id).map(|name| format!("</{name}>")).unwrap_or_default()
    }

    fn write_node(&self, id: NodeId, in_svg: bool, out: &mut String) {
        match &self.slots[id.0].data {
            NodeData::Document => {
                for &child in &self.slots[id.0].children {
                    self.write_node(child, false, out);
                }
            }
            NodeData::Text(text) => out.push_str(&escape_xml_text(text)),
            NodeData::Raw(markup) => out.push_str(markup),
            NodeData::Comment(text) => {
                out.push_str("<!--");
                out.push_str(&text.replace("--", "- -"));
                out.push_str("-->");
            }
            NodeData::Element(element) => {
                let in_svg = in_svg || element.name == "svg";
                write_start(element, in_svg, out);
                let children = &self.slots[id.0].children;
                if children.is_empty() && (in_svg || VOID_ELEMENTS.contains(&element.name.as_str())) {
                    out.push_str(" />");
                    return;
                }
                out.push('>');
                for &child in children {
                    self.write_node(child, in_svg, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }

    /// Serialize as a standalone XHTML document. The `html` element gets
    /// the XHTML namespace, and the OPS namespace when `epub:` attributes
    /// are present.
    pub fn to_xhtml(&self, with_doctype: bool) -> String {
        let mut out = String::from(XML_DECLARATION);
        out.push('\n');
        if with_doctype {
            out.push_str(XHTML11_DOCTYPE);
            out.push('\n');
        }
        let Some(html) = self.html() else {
            return out;
        };

        let mut root = self.clone();
        let uses_epub = self
            .descendants(self.root())
            .into_iter()
            .filter_map(|n| self.element(n))
            .any(|e| e.attrs.iter().any(|(k, _)| k.starts_with("epub:")));
        if let Some(element) = root.element_mut(html) {
            element.attrs.retain(|(k, _)| k != "xmlns");
            element.attrs.insert(0, ("xmlns".to_string(), XHTML_NS.to_string()));
            if uses_epub && element.attr("xmlns:epub").is_none() {
                element.attrs.insert(1, ("xmlns:epub".to_string(), OPS_NS.to_string()));
            }
        }
        root.write_node(html, false, &mut out);
        out.push('\n');
        out
    }
}

fn write_start(element: &ElementData, in_svg: bool, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    let is_svg_root = element.name == "svg";
    if is_svg_root && element.attr("xmlns").is_none() {
        out.push_str(&format!(" xmlns=\"{SVG_NS}\""));
    }
    let mut wrote_xlink_ns = false;
    for (name, value) in &element.attrs {
        if !is_attr_name(name) {
            continue;
        }
        // Namespaced SVG attributes lose their prefix in the HTML parser.
        let name = match name.as_str() {
            "xlink" if in_svg && value == XLINK_NS => "xmlns:xlink",
            "href" if in_svg && element.name != "a" => "xlink:href",
            other => other,
        };
        if name == "xmlns:xlink" {
            wrote_xlink_ns = true;
        }
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_xml_attr(value));
        out.push('"');
    }
    if is_svg_root && !wrote_xlink_ns {
        out.push_str(&format!(" xmlns:xlink=\"{XLINK_NS}\""));
    }
}

fn is_attr_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | '/' | '=' | '`'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assemble_utils::xml::is_well_formed;

    #[test]
    fn test_parse_and_serialize_void_elements() {
        let doc = Document::parse("<html><head><title>T</title></head><body><p>a<br>b</p><img src=\"x.png\"></body></html>");
        let body = doc.body().unwrap();
        assert_eq!(doc.inner_xhtml(body), "<p>a<br />b</p><img src=\"x.png\" />");
    }

    #[test]
    fn test_to_xhtml_is_well_formed() {
        let doc = Document::parse(
            "<?xml version=\"1.0\"?><html xml:lang=\"en\"><head><title>T &amp; U</title></head>\
             <body><section epub:type=\"chapter\"><p>x &lt; y</p></section></body></html>",
        );
        let xhtml = doc.to_xhtml(true);
        assert!(xhtml.starts_with(XML_DECLARATION));
        assert!(xhtml.contains("<!DOCTYPE html"));
        assert!(xhtml.contains("xmlns=\"http://www.w3.org/1999/xhtml\""));
        assert!(xhtml.contains("xmlns:epub=\"http://www.idpf.org/2007/ops\""));
        assert!(xhtml.contains("xml:lang=\"en\""));
        assert!(!xhtml.contains("?xml version=\"1.0\"?"));
        assert!(is_well_formed(&xhtml));
    }

    #[test]
    fn test_replace_and_detach() {
        let mut doc = Document::parse("<body><p><img src=\"a.png\" alt=\"A\"><img src=\"b.png\"></p></body>");
        let imgs = doc.elements_by_tag("img");
        assert_eq!(imgs.len(), 2);
        let em = doc.create_element("em", &[]);
        let text = doc.create_text("[A]");
        doc.append_child(em, text);
        doc.replace(imgs[0], em);
        doc.detach(imgs[1]);
        let p = doc.first_by_tag("p").unwrap();
        assert_eq!(doc.inner_xhtml(p), "<em>[A]</em>");
        assert!(doc.elements_by_tag("img").is_empty());
    }

    #[test]
    fn test_text_content_and_ids() {
        let mut doc = Document::parse("<body><h1 id=\"top\">Title</h1><style>p { }</style><p id=\"p1\">x</p></body>");
        assert_eq!(doc.id_attributes(), vec!["top", "p1"]);
        let style = doc.first_by_tag("style").unwrap();
        assert_eq!(doc.text_content(style), "p { }");
        doc.set_text_content(style, "\np { color: red }\n");
        assert_eq!(doc.text_content(style), "\np { color: red }\n");
    }

    #[test]
    fn test_svg_namespaces() {
        let doc = Document::parse(
            "<body><svg viewBox=\"0 0 10 10\"><image xlink:href=\"a.png\" width=\"10\" height=\"10\"></image></svg></body>",
        );
        let xhtml = doc.to_xhtml(false);
        assert!(xhtml.contains("xmlns=\"http://www.w3.org/2000/svg\""));
        assert!(xhtml.contains("xlink:href=\"a.png\""));
        assert!(is_well_formed(&xhtml));
    }
}
