//! The OPF package document: metadata, manifest, spine and guide.

use std::collections::HashMap;

use assemble_utils::xml::{self, XmlBuilder};

use crate::error::{AssembleError, Result};
use crate::metadata::{MarcRole, MetaValue};
use crate::options::EpubVersion;
use crate::reference::{Reference, ReferenceType};
use crate::timestamp::UtcDateTime;

pub const NCX_ID: &str = "ncx";
pub const NCX_HREF: &str = "book.ncx";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
    pub fallback: Option<String>,
    /// `id` attributes found inside the document, in document order.
    pub index_points: Vec<String>,
}

impl ManifestItem {
    pub fn new(id: &str, href: &str, media_type: &str) -> Self {
        Self {
            id: id.trim().to_string(),
            href: href.trim().to_string(),
            media_type: media_type.trim().to_string(),
            properties: None,
            fallback: None,
            index_points: Vec::new(),
        }
    }

    pub fn has_index_point(&self, anchor: &str) -> bool {
        self.index_points.iter().any(|p| p == anchor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItemRef {
    pub idref: String,
    pub linear: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MetaProperty {
    property: String,
    value: String,
}

/// In-memory OPF model. Rendering never mutates it, so a failed finalize
/// leaves it as it was.
#[derive(Debug, Clone)]
pub struct PackageDocument {
    version: EpubVersion,
    ident: String,
    dublin_core: Vec<MetaValue>,
    meta: Vec<(String, String)>,
    meta_properties: Vec<MetaProperty>,
    namespaces: Vec<(String, String)>,
    prefixes: Vec<(String, String)>,
    manifest: Vec<ManifestItem>,
    by_id: HashMap<String, usize>,
    by_href: HashMap<String, usize>,
    spine: Vec<SpineItemRef>,
    guide: Vec<Reference>,
}

impl PackageDocument {
    pub fn new(version: EpubVersion) -> Self {
        Self {
            version,
            ident: "BookId".to_string(),
            dublin_core: Vec::new(),
            meta: Vec::new(),
            meta_properties: Vec::new(),
            namespaces: vec![("xsi".to_string(), xml::XSI_NS.to_string())],
            prefixes: Vec::new(),
            manifest: Vec::new(),
            by_id: HashMap::new(),
            by_href: HashMap::new(),
            spine: Vec::new(),
            guide: Vec::new(),
        }
    }

    pub fn version(&self) -> EpubVersion {
        self.version
    }

    /// Id of the `dc:identifier` element named by `unique-identifier`.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Register a manifest item. Ids and hrefs are unique.
    pub fn add_item(&mut self, item: ManifestItem) -> Result<()> {
        if self.by_id.contains_key(&item.id) {
            return Err(AssembleError::Duplicate(format!("manifest id '{}'", item.id)));
        }
        if self.by_href.contains_key(&item.href) {
            return Err(AssembleError::Duplicate(format!("manifest href '{}'", item.href)));
        }
        let idx = self.manifest.len();
        self.by_id.insert(item.id.clone(), idx);
        self.by_href.insert(item.href.clone(), idx);
        self.manifest.push(item);
        Ok(())
    }

    pub fn item_by_id(&self, id: &str) -> Option<&ManifestItem> {
        self.by_id.get(id).map(|&idx| &self.manifest[idx])
    }

    pub fn item_by_href(&self, href: &str) -> Option<&ManifestItem> {
        self.by_href.get(href).map(|&idx| &self.manifest[idx])
    }

    pub fn item_by_href_mut(&mut self, href: &str) -> Option<&mut ManifestItem> {
        match self.by_href.get(href) {
            Some(&idx) => self.manifest.get_mut(idx),
            None => None,
        }
    }

    /// Items whose href starts with `prefix`, in manifest order.
    pub fn items_by_href_prefix(&self, prefix: &str) -> Vec<&ManifestItem> {
        self.manifest.iter().filter(|i| i.href.starts_with(prefix)).collect()
    }

    pub fn manifest(&self) -> &[ManifestItem] {
        &self.manifest
    }

    /// Append a spine entry. A second entry for the same idref is ignored;
    /// returns whether the entry was added.
    pub fn add_item_ref(&mut self, idref: &str, linear: bool) -> bool {
        let idref = idref.trim();
        if self.spine.iter().any(|r| r.idref == idref) {
            return false;
        }
        self.spine.push(SpineItemRef {
            idref: idref.to_string(),
            linear,
        });
        true
    }

    pub fn spine(&self) -> &[SpineItemRef] {
        &self.spine
    }

    /// Add a guide entry. An entry with the same type and href is kept as is.
    pub fn add_reference(&mut self, kind: ReferenceType, title: &str, href: &str) {
        let reference = Reference::new(kind, title, href);
        if self
            .guide
            .iter()
            .any(|r| r.kind == reference.kind && r.href == reference.href)
        {
            return;
        }
        self.guide.push(reference);
    }

    pub fn guide(&self) -> &[Reference] {
        &self.guide
    }

    pub fn add_meta_value(&mut self, value: MetaValue) {
        if value.name.is_empty() {
            return;
        }
        self.dublin_core.push(value);
    }

    /// Shorthand for a `dc:<name>` element with plain-text content.
    pub fn add_dublin_core_meta(&mut self, name: &str, text: &str) {
        self.add_meta_value(MetaValue::new(&format!("dc:{}", name.trim()), text));
    }

    /// `<meta name=".." content=".." />`. Blank names or contents are ignored.
    pub fn add_meta(&mut self, name: &str, content: &str) {
        let (name, content) = (name.trim(), content.trim());
        if name.is_empty() || content.is_empty() {
            return;
        }
        self.meta.push((name.to_string(), content.to_string()));
    }

    /// `<meta property="..">value</meta>`, EPUB 3 style.
    pub fn add_meta_property(&mut self, property: &str, value: &str) {
        let (property, value) = (property.trim(), value.trim());
        if property.is_empty() || value.is_empty() {
            return;
        }
        self.meta_properties.push(MetaProperty {
            property: property.to_string(),
            value: value.to_string(),
        });
    }

    pub fn has_meta_property(&self, property: &str) -> bool {
        self.meta_properties.iter().any(|m| m.property == property)
    }

    /// First registration of a prefix name wins.
    pub fn add_namespace(&mut self, name: &str, uri: &str) {
        add_unique(&mut self.namespaces, name, uri);
    }

    pub fn add_prefix(&mut self, name: &str, uri: &str) {
        add_unique(&mut self.prefixes, name, uri);
    }

    pub fn add_creator(&mut self, name: &str, file_as: Option<&str>, role: Option<MarcRole>) {
        self.add_person("dc:creator", name, file_as, role);
    }

    pub fn add_contributor(&mut self, name: &str, file_as: Option<&str>, role: Option<MarcRole>) {
        self.add_person("dc:contributor", name, file_as, role);
    }

    fn add_person(&mut self, tag: &str, name: &str, file_as: Option<&str>, role: Option<MarcRole>) {
        let mut value = MetaValue::new(tag, name);
        if let Some(file_as) = file_as {
            value = value.with_opf_attr("file-as", file_as);
        }
        if let Some(role) = role {
            value = value.with_opf_attr("role", role.code());
        }
        self.add_meta_value(value);
    }

    /// Dublin Core entries named `tag`, e.g. `dc:title`.
    pub fn meta_values(&self, tag: &str) -> impl Iterator<Item = &MetaValue> {
        let tag = tag.to_string();
        self.dublin_core.iter().filter(move |v| v.name == tag)
    }

    /// Render `book.opf`. `modified` is the UNIX time used for the EPUB 3
    /// `dcterms:modified` entry when none was supplied.
    pub fn render(&self, modified: i64) -> String {
        let epub3 = self.version == EpubVersion::V3;

        let mut namespaces = self.namespaces.clone();
        let mut properties = self.meta_properties.clone();
        if epub3 {
            add_unique(&mut namespaces, "dcterms", xml::DCTERMS_NS);
            if !self.has_meta_property("dcterms:modified") {
                properties.push(MetaProperty {
                    property: "dcterms:modified".to_string(),
                    value: UtcDateTime::from_unix(modified).modified(),
                });
            }
        } else {
            add_unique(&mut namespaces, "opf", xml::OPF_NS);
        }
        if !self.dublin_core.is_empty() {
            add_unique(&mut namespaces, "dc", xml::DC_NS);
        }

        let ns_attrs: Vec<(String, String)> = namespaces
            .iter()
            .map(|(name, uri)| (format!("xmlns:{name}"), uri.clone()))
            .collect();
        let prefix = self
            .prefixes
            .iter()
            .map(|(name, uri)| format!("{name}: {uri}"))
            .collect::<Vec<_>>()
            .join(" ");

        let mut attrs: Vec<(&str, &str)> = vec![("xmlns", xml::OPF_NS)];
        attrs.extend(ns_attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if epub3 && !prefix.is_empty() {
            attrs.push(("prefix", &prefix));
        }
        attrs.push(("unique-identifier", &self.ident));
        attrs.push(("version", self.version.package_version()));

        let mut out = XmlBuilder::new();
        out.open_tag("package", &attrs);

        out.open_tag("metadata", &[]);
        for (idx, value) in self.dublin_core.iter().enumerate() {
            self.render_meta_value(&mut out, value, idx);
        }
        for property in &properties {
            out.text_element("meta", &property.value, &[("property", &property.property)]);
        }
        for (name, content) in &self.meta {
            out.empty_tag("meta", &[("name", name), ("content", content)]);
        }
        out.close_tag("metadata");

        out.open_tag("manifest", &[]);
        for item in &self.manifest {
            let mut item_attrs: Vec<(&str, &str)> = vec![
                ("id", &item.id),
                ("href", &item.href),
                ("media-type", &item.media_type),
            ];
            if epub3 {
                if let Some(properties) = item.properties.as_deref() {
                    item_attrs.push(("properties", properties));
                }
            }
            if let Some(fallback) = item.fallback.as_deref() {
                item_attrs.push(("fallback", fallback));
            }
            out.empty_tag("item", &item_attrs);
        }
        out.close_tag("manifest");

        out.open_tag("spine", &[("toc", NCX_ID)]);
        for itemref in &self.spine {
            if itemref.linear {
                out.empty_tag("itemref", &[("idref", &itemref.idref)]);
            } else {
                out.empty_tag("itemref", &[("idref", &itemref.idref), ("linear", "no")]);
            }
        }
        out.close_tag("spine");

        if !self.guide.is_empty() {
            out.open_tag("guide", &[]);
            for reference in &self.guide {
                out.empty_tag(
                    "reference",
                    &[
                        ("type", reference.kind.as_str()),
                        ("title", &reference.title),
                        ("href", &reference.href),
                    ],
                );
            }
            out.close_tag("guide");
        }

        out.close_tag("package");
        out.build()
    }

    fn render_meta_value(&self, out: &mut XmlBuilder, value: &MetaValue, idx: usize) {
        let mut attrs: Vec<(String, String)> = value.attrs.clone();
        let mut refines = Vec::new();

        if self.version == EpubVersion::V2 {
            attrs.extend(
                value
                    .opf_attrs
                    .iter()
                    .map(|(k, v)| (format!("opf:{k}"), v.clone())),
            );
        } else if !value.opf_attrs.is_empty() {
            let id = match value.attr("id") {
                Some(id) => id.to_string(),
                None => {
                    let local = value.name.rsplit(':').next().unwrap_or(&value.name);
                    let id = format!("{local}-{idx}");
                    attrs.push(("id".to_string(), id.clone()));
                    id
                }
            };
            for (name, content) in &value.opf_attrs {
                let property = if name == "scheme" { "identifier-type" } else { name.as_str() };
                refines.push((format!("#{id}"), property.to_string(), content.clone()));
            }
        }

        let attr_refs: Vec<(&str, &str)> = attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        out.markup_element(&value.name, &value.value, &attr_refs);

        for (target, property, content) in &refines {
            let mut meta_attrs: Vec<(&str, &str)> = vec![("refines", target), ("property", property)];
            if property == "role" {
                meta_attrs.push(("scheme", "marc:relators"));
            }
            out.text_element("meta", content, &meta_attrs);
        }
    }
}

fn add_unique(pairs: &mut Vec<(String, String)>, name: &str, value: &str) {
    let name = name.trim();
    if name.is_empty() || pairs.iter().any(|(k, _)| k == name) {
        return;
    }
    pairs.push((name.to_string(), value.trim().to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use assemble_utils::xml::{collect_attributes, collect_text, is_well_formed};

    fn sample(version: EpubVersion) -> PackageDocument {
        let mut opf = PackageDocument::new(version);
        opf.add_item(ManifestItem::new(NCX_ID, NCX_HREF, NCX_MEDIA_TYPE)).unwrap();
        opf.add_item(ManifestItem::new("chapter1", "chapter1.xhtml", "application/xhtml+xml"))
            .unwrap();
        opf.add_item_ref("chapter1", true);
        opf.add_dublin_core_meta("title", "Test & Book");
        opf.add_creator("Jane Doe", Some("Doe, Jane"), Some(MarcRole::Author));
        opf.add_reference(ReferenceType::Text, "First Page", "chapter1.xhtml");
        opf
    }

    #[test]
    fn test_duplicate_items_rejected() {
        let mut opf = sample(EpubVersion::V2);
        let dup_id = opf.add_item(ManifestItem::new("chapter1", "other.xhtml", "application/xhtml+xml"));
        assert!(matches!(dup_id, Err(AssembleError::Duplicate(_))));
        let dup_href = opf.add_item(ManifestItem::new("other", "chapter1.xhtml", "application/xhtml+xml"));
        assert!(dup_href.is_err());
        assert_eq!(opf.manifest().len(), 2);
    }

    #[test]
    fn test_spine_dedup_first_wins() {
        let mut opf = sample(EpubVersion::V2);
        assert!(!opf.add_item_ref("chapter1", false));
        assert!(!opf.add_item_ref(" chapter1 ", false));
        assert_eq!(opf.spine().len(), 1);
        assert!(opf.spine()[0].linear);
        assert!(opf.add_item_ref(" chapter2", true));
        assert_eq!(opf.spine()[1].idref, "chapter2");
        assert!(!opf.add_item_ref("chapter2", true));
    }

    #[test]
    fn test_render_epub2() {
        let opf = sample(EpubVersion::V2).render(0);
        assert!(is_well_formed(&opf));
        assert!(opf.contains("version=\"2.0\""));
        assert!(opf.contains("xmlns:opf=\"http://www.idpf.org/2007/opf\""));
        assert!(!opf.contains("dcterms:modified"));
        assert!(opf.contains("<dc:title>Test &amp; Book</dc:title>"));
        assert!(opf.contains("opf:file-as=\"Doe, Jane\""));
        assert!(opf.contains("opf:role=\"aut\""));
        assert_eq!(collect_attributes(&opf, "itemref")[0]["idref"], "chapter1");
        assert_eq!(collect_attributes(&opf, "spine")[0]["toc"], "ncx");
        assert_eq!(collect_attributes(&opf, "reference")[0]["type"], "text");
    }

    #[test]
    fn test_render_epub3() {
        let mut opf = sample(EpubVersion::V3);
        opf.add_prefix("rendition", "http://www.idpf.org/vocab/rendition/#");
        let rendered = opf.render(1_698_420_605);
        assert!(is_well_formed(&rendered));
        assert!(rendered.contains("version=\"3.0\""));
        assert!(rendered.contains("prefix=\"rendition: http://www.idpf.org/vocab/rendition/#\""));
        assert!(!rendered.contains("opf:role"));
        assert!(rendered.contains("<meta refines=\"#creator-1\" property=\"role\" scheme=\"marc:relators\">aut</meta>"));
        let props: Vec<_> = collect_text(&rendered, "meta");
        assert!(props.contains(&"2023-10-27T15:30:05Z".to_string()));
    }

    #[test]
    fn test_namespace_order() {
        let rendered = sample(EpubVersion::V2).render(0);
        let xsi = rendered.find("xmlns:xsi").unwrap();
        let opf = rendered.find("xmlns:opf").unwrap();
        let dc = rendered.find("xmlns:dc").unwrap();
        assert!(xsi < opf && opf < dc);
    }

    #[test]
    fn test_index_points_and_prefix_lookup() {
        let mut opf = sample(EpubVersion::V2);
        opf.add_item(ManifestItem::new("chapter2_1", "chapter2_1.xhtml", "application/xhtml+xml"))
            .unwrap();
        opf.item_by_href_mut("chapter2_1.xhtml")
            .unwrap()
            .index_points
            .push("sec1".to_string());
        let found = opf.items_by_href_prefix("chapter2");
        assert_eq!(found.len(), 1);
        assert!(found[0].has_index_point("sec1"));
        assert_eq!(opf.item_by_id("chapter2_1").unwrap().href, "chapter2_1.xhtml");
    }
}
