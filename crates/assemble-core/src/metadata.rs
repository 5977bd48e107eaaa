//! Package metadata values: Dublin Core terms, relator roles, identifier
//! schemes and free-form meta entries.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use assemble_utils::xml::escape_xml_text;

use crate::error::AssembleError;

static LANGUAGE_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((([A-Za-z]{2,3}(-([A-Za-z]{3}(-[A-Za-z]{3}){0,2}))?)|[A-Za-z]{4}|[A-Za-z]{5,8})(-([A-Za-z]{2}|\d{3}))?)$")
        .expect("valid regex")
});

/// Whether `code` is an acceptable `xml:lang` value: a primary language
/// subtag with optional extended subtags and an optional region.
pub fn is_valid_language(code: &str) -> bool {
    LANGUAGE_CODE.is_match(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentifierType {
    #[default]
    Uuid,
    Uri,
    Isbn,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Uuid => "UUID",
            IdentifierType::Uri => "URI",
            IdentifierType::Isbn => "ISBN",
        }
    }
}

impl FromStr for IdentifierType {
    type Err = AssembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UUID" => Ok(IdentifierType::Uuid),
            "URI" => Ok(IdentifierType::Uri),
            "ISBN" => Ok(IdentifierType::Isbn),
            other => Err(AssembleError::Validation(format!("unknown identifier type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DublinCoreTerm {
    Contributor,
    Coverage,
    Creator,
    Date,
    Description,
    Format,
    Identifier,
    Language,
    Publisher,
    Relation,
    Rights,
    Source,
    Subject,
    Title,
    Type,
}

impl DublinCoreTerm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DublinCoreTerm::Contributor => "contributor",
            DublinCoreTerm::Coverage => "coverage",
            DublinCoreTerm::Creator => "creator",
            DublinCoreTerm::Date => "date",
            DublinCoreTerm::Description => "description",
            DublinCoreTerm::Format => "format",
            DublinCoreTerm::Identifier => "identifier",
            DublinCoreTerm::Language => "language",
            DublinCoreTerm::Publisher => "publisher",
            DublinCoreTerm::Relation => "relation",
            DublinCoreTerm::Rights => "rights",
            DublinCoreTerm::Source => "source",
            DublinCoreTerm::Subject => "subject",
            DublinCoreTerm::Title => "title",
            DublinCoreTerm::Type => "type",
        }
    }

    /// Qualified element name, e.g. `dc:title`.
    pub fn tag(&self) -> String {
        format!("dc:{}", self.as_str())
    }
}

/// MARC relator codes for creators and contributors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarcRole {
    Adapter,
    Annotator,
    Arranger,
    Artist,
    AssociatedName,
    Author,
    AuthorInQuotes,
    AuthorOfAfterword,
    AuthorOfIntroduction,
    BibliographicAntecedent,
    BookProducer,
    Collaborator,
    Commentator,
    Designer,
    Editor,
    Illustrator,
    Lyricist,
    MetadataContact,
    Musician,
    Narrator,
    Other,
    Photographer,
    Printer,
    Redactor,
    Reviewer,
    Sponsor,
    ThesisAdvisor,
    Transcriber,
    Translator,
}

impl MarcRole {
    pub fn code(&self) -> &'static str {
        match self {
            MarcRole::Adapter => "adp",
            MarcRole::Annotator => "ann",
            MarcRole::Arranger => "arr",
            MarcRole::Artist => "art",
            MarcRole::AssociatedName => "asn",
            MarcRole::Author => "aut",
            MarcRole::AuthorInQuotes => "aqt",
            MarcRole::AuthorOfAfterword => "aft",
            MarcRole::AuthorOfIntroduction => "aui",
            MarcRole::BibliographicAntecedent => "ant",
            MarcRole::BookProducer => "bkp",
            MarcRole::Collaborator => "clb",
            MarcRole::Commentator => "cmm",
            MarcRole::Designer => "dsr",
            MarcRole::Editor => "edt",
            MarcRole::Illustrator => "ill",
            MarcRole::Lyricist => "lyr",
            MarcRole::MetadataContact => "mdc",
            MarcRole::Musician => "mus",
            MarcRole::Narrator => "nrt",
            MarcRole::Other => "oth",
            MarcRole::Photographer => "pht",
            MarcRole::Printer => "prt",
            MarcRole::Redactor => "red",
            MarcRole::Reviewer => "rev",
            MarcRole::Sponsor => "spn",
            MarcRole::ThesisAdvisor => "ths",
            MarcRole::Transcriber => "trc",
            MarcRole::Translator => "trl",
        }
    }
}

impl fmt::Display for MarcRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One metadata element: `<name attr="..">value</name>`.
///
/// `value` holds XML-ready markup. `opf_attrs` render as `opf:` attributes
/// in EPUB 2 and as refining `<meta>` entries in EPUB 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaValue {
    pub name: String,
    pub value: String,
    pub attrs: Vec<(String, String)>,
    pub opf_attrs: Vec<(String, String)>,
}

impl MetaValue {
    /// Element with plain-text content, escaped on construction.
    pub fn new(name: &str, text: &str) -> Self {
        Self::from_markup(name, &escape_xml_text(text.trim()))
    }

    /// Element whose content is already escaped.
    pub fn from_markup(name: &str, markup: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            value: markup.to_string(),
            attrs: Vec::new(),
            opf_attrs: Vec::new(),
        }
    }

    pub fn dublin_core(term: DublinCoreTerm, text: &str) -> Self {
        Self::new(&term.tag(), text)
    }

    /// Add or replace an attribute. Empty values are ignored.
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        set_pair(&mut self.attrs, name, value);
        self
    }

    pub fn with_opf_attr(mut self, name: &str, value: &str) -> Self {
        set_pair(&mut self.opf_attrs, name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn opf_attr(&self, name: &str) -> Option<&str> {
        self.opf_attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

fn set_pair(pairs: &mut Vec<(String, String)>, name: &str, value: &str) {
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        return;
    }
    match pairs.iter_mut().find(|(k, _)| k == name) {
        Some(pair) => pair.1 = value.to_string(),
        None => pairs.push((name.to_string(), value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        for ok in ["en", "en-US", "eng", "zh-yue", "sgn-ase-US", "es-419"] {
            assert!(is_valid_language(ok), "{ok}");
        }
        for bad in ["", "e", "english-language-x", "en_US", "123"] {
            assert!(!is_valid_language(bad), "{bad}");
        }
    }

    #[test]
    fn test_meta_value_escapes_text() {
        let value = MetaValue::dublin_core(DublinCoreTerm::Title, " Fish & Chips ");
        assert_eq!(value.name, "dc:title");
        assert_eq!(value.value, "Fish &amp; Chips");
    }

    #[test]
    fn test_meta_value_attrs() {
        let value = MetaValue::dublin_core(DublinCoreTerm::Creator, "Jane Doe")
            .with_opf_attr("file-as", "Doe, Jane")
            .with_opf_attr("role", MarcRole::Author.code())
            .with_opf_attr("role", MarcRole::Editor.code())
            .with_attr("id", "");
        assert_eq!(value.opf_attr("file-as"), Some("Doe, Jane"));
        assert_eq!(value.opf_attr("role"), Some("edt"));
        assert_eq!(value.opf_attrs.len(), 2);
        assert!(value.attrs.is_empty());
    }

    #[test]
    fn test_identifier_type_parse() {
        assert_eq!("isbn".parse::<IdentifierType>().unwrap(), IdentifierType::Isbn);
        assert_eq!(IdentifierType::Uri.as_str(), "URI");
        assert!("doi".parse::<IdentifierType>().is_err());
    }
}
