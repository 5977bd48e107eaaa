//! EPUB 3 rendition properties for fixed-layout books.

use serde::{Deserialize, Serialize};

pub const RENDITION_PREFIX: &str = "rendition";
pub const RENDITION_PREFIX_URI: &str = "http://www.idpf.org/vocab/rendition/#";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenditionLayout {
    Reflowable,
    PrePaginated,
}

impl RenditionLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenditionLayout::Reflowable => "reflowable",
            RenditionLayout::PrePaginated => "pre-paginated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenditionOrientation {
    Landscape,
    Portrait,
    Auto,
}

impl RenditionOrientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenditionOrientation::Landscape => "landscape",
            RenditionOrientation::Portrait => "portrait",
            RenditionOrientation::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenditionSpread {
    None,
    Landscape,
    Portrait,
    Both,
    Auto,
}

impl RenditionSpread {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenditionSpread::None => "none",
            RenditionSpread::Landscape => "landscape",
            RenditionSpread::Portrait => "portrait",
            RenditionSpread::Both => "both",
            RenditionSpread::Auto => "auto",
        }
    }
}

/// A single `rendition:*` package property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendition {
    Layout(RenditionLayout),
    Orientation(RenditionOrientation),
    Spread(RenditionSpread),
}

impl Rendition {
    pub fn property(&self) -> &'static str {
        match self {
            Rendition::Layout(_) => "rendition:layout",
            Rendition::Orientation(_) => "rendition:orientation",
            Rendition::Spread(_) => "rendition:spread",
        }
    }

    pub fn value(&self) -> &'static str {
        match self {
            Rendition::Layout(v) => v.as_str(),
            Rendition::Orientation(v) => v.as_str(),
            Rendition::Spread(v) => v.as_str(),
        }
    }
}
