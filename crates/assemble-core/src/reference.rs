//! Guide reference types and the order reference pages appear in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AssembleError, Result};

/// Structural role of a page, used for `<guide>` entries and EPUB 3
/// landmarks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Cover,
    TitlePage,
    Acknowledgements,
    Bibliography,
    Colophon,
    CopyrightPage,
    Dedication,
    Epigraph,
    Foreword,
    Toc,
    Notes,
    Preface,
    Text,
    ListOfIllustrations,
    ListOfTables,
    Glossary,
    Index,
    Frontmatter,
    Bodymatter,
    Backmatter,
    /// Custom type, written as `other.<name>` style values by callers.
    Other(String),
}

impl ReferenceType {
    pub fn as_str(&self) -> &str {
        match self {
            ReferenceType::Cover => "cover",
            ReferenceType::TitlePage => "titlepage",
            ReferenceType::Acknowledgements => "acknowledgements",
            ReferenceType::Bibliography => "bibliography",
            ReferenceType::Colophon => "colophon",
            ReferenceType::CopyrightPage => "copyright-page",
            ReferenceType::Dedication => "dedication",
            ReferenceType::Epigraph => "epigraph",
            ReferenceType::Foreword => "foreword",
            ReferenceType::Toc => "toc",
            ReferenceType::Notes => "notes",
            ReferenceType::Preface => "preface",
            ReferenceType::Text => "text",
            ReferenceType::ListOfIllustrations => "loi",
            ReferenceType::ListOfTables => "lot",
            ReferenceType::Glossary => "glossary",
            ReferenceType::Index => "index",
            ReferenceType::Frontmatter => "frontmatter",
            ReferenceType::Bodymatter => "bodymatter",
            ReferenceType::Backmatter => "backmatter",
            ReferenceType::Other(name) => name,
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = AssembleError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AssembleError::Validation("empty reference type".to_string()));
        }
        Ok(match s {
            "cover" => ReferenceType::Cover,
            "titlepage" | "title-page" => ReferenceType::TitlePage,
            "acknowledgements" => ReferenceType::Acknowledgements,
            "bibliography" => ReferenceType::Bibliography,
            "colophon" => ReferenceType::Colophon,
            "copyright-page" => ReferenceType::CopyrightPage,
            "dedication" => ReferenceType::Dedication,
            "epigraph" => ReferenceType::Epigraph,
            "foreword" => ReferenceType::Foreword,
            "toc" => ReferenceType::Toc,
            "notes" => ReferenceType::Notes,
            "preface" => ReferenceType::Preface,
            "text" => ReferenceType::Text,
            "loi" => ReferenceType::ListOfIllustrations,
            "lot" => ReferenceType::ListOfTables,
            "glossary" => ReferenceType::Glossary,
            "index" => ReferenceType::Index,
            "frontmatter" => ReferenceType::Frontmatter,
            "bodymatter" => ReferenceType::Bodymatter,
            "backmatter" => ReferenceType::Backmatter,
            other => ReferenceType::Other(other.to_string()),
        })
    }
}

impl Serialize for ReferenceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReferenceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One `<guide>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ReferenceType,
    pub title: String,
    pub href: String,
}

impl Reference {
    pub fn new(kind: ReferenceType, title: &str, href: &str) -> Self {
        Self {
            kind,
            title: title.to_string(),
            href: href.to_string(),
        }
    }
}

/// Ordered reference types with their display labels. Drives both the
/// "Guide" navigation entries and the human-readable contents page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencesOrder {
    entries: Vec<(ReferenceType, String)>,
}

impl ReferencesOrder {
    /// Fails unless the order contains [`ReferenceType::Text`], which marks
    /// where chapters are listed.
    pub fn new(entries: Vec<(ReferenceType, String)>) -> Result<Self> {
        if !entries.iter().any(|(kind, _)| *kind == ReferenceType::Text) {
            return Err(AssembleError::Validation(
                "references order must contain the 'text' entry".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(ReferenceType, String)] {
        &self.entries
    }

    pub fn label(&self, kind: &ReferenceType) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, label)| label.as_str())
    }
}

impl Default for ReferencesOrder {
    fn default() -> Self {
        let entries = [
            (ReferenceType::Cover, "Cover Page"),
            (ReferenceType::TitlePage, "Title Page"),
            (ReferenceType::Acknowledgements, "Acknowledgements"),
            (ReferenceType::Bibliography, "Bibliography"),
            (ReferenceType::Colophon, "Colophon"),
            (ReferenceType::CopyrightPage, "Copyright"),
            (ReferenceType::Dedication, "Dedication"),
            (ReferenceType::Epigraph, "Epigraph"),
            (ReferenceType::Foreword, "Foreword"),
            (ReferenceType::Toc, "Table of Contents"),
            (ReferenceType::Notes, "Notes"),
            (ReferenceType::Preface, "Preface"),
            (ReferenceType::Text, "First Page"),
            (ReferenceType::ListOfIllustrations, "List of Illustrations"),
            (ReferenceType::ListOfTables, "List of Tables"),
            (ReferenceType::Glossary, "Glossary"),
            (ReferenceType::Index, "Index"),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(kind, label)| (kind, label.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip_names() {
        for name in ["cover", "copyright-page", "loi", "text", "backmatter"] {
            assert_eq!(name.parse::<ReferenceType>().unwrap().as_str(), name);
        }
        assert_eq!(
            "other.afterword".parse::<ReferenceType>().unwrap(),
            ReferenceType::Other("other.afterword".to_string())
        );
        assert!("  ".parse::<ReferenceType>().is_err());
    }

    #[test]
    fn test_default_order() {
        let order = ReferencesOrder::default();
        assert_eq!(order.entries().len(), 17);
        assert_eq!(order.label(&ReferenceType::Toc), Some("Table of Contents"));
        assert_eq!(order.label(&ReferenceType::Text), Some("First Page"));
        assert_eq!(order.entries()[0].0, ReferenceType::Cover);
    }

    #[test]
    fn test_order_requires_text() {
        let bad = ReferencesOrder::new(vec![(ReferenceType::Cover, "Cover".into())]);
        assert!(bad.is_err());
        let good = ReferencesOrder::new(vec![
            (ReferenceType::Text, "Start".into()),
            (ReferenceType::Index, "Index".into()),
        ]);
        assert_eq!(good.unwrap().entries().len(), 2);
    }
}
