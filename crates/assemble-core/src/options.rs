//! Book-wide settings that shape how content is assembled.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AssembleError, Result};

/// Smallest split size accepted by [`BookOptions::set_split_size`].
pub const MIN_SPLIT_SIZE: usize = 10240;
pub const DEFAULT_SPLIT_SIZE: usize = 250_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookOptions {
    pub epub_version: EpubVersion,
    pub language_code: String,
    pub writing_direction: WritingDirection,

    /// Byte budget for automatic chapter splitting.
    pub split_size: usize,

    #[serde(
        serialize_with = "serialize_image_size",
        deserialize_with = "deserialize_image_size"
    )]
    pub max_image_size: Option<(u32, u32)>,
    /// Keep GIFs as-is. When off, GIFs are converted to PNG.
    pub gif_images_enabled: bool,
    /// JPEG quality (1-100) used when re-encoding images.
    pub jpeg_quality: u8,

    pub references_added_to_toc: bool,
    /// Replace non-ASCII characters in chapters with character references.
    pub encode_html: bool,
    /// Write `dc:date` as `YYYY-MM-DD` instead of the full timestamp.
    pub short_date_format: bool,
    /// Add the assembler's own `generator` meta entry.
    pub epub_mark: bool,

    /// Directory inside the archive holding the package, `/`-terminated.
    pub book_root: String,
    /// Prefix tried for absolute and unresolvable local references.
    pub doc_root: Option<String>,
    #[serde(
        serialize_with = "serialize_image_size",
        deserialize_with = "deserialize_image_size"
    )]
    pub viewport: Option<(u32, u32)>,

    /// Report missing local resources as errors instead of leaving the
    /// reference for content generated later.
    pub strict_local_resources: bool,
}

impl Default for BookOptions {
    fn default() -> Self {
        Self {
            epub_version: EpubVersion::V2,
            language_code: "en".to_string(),
            writing_direction: WritingDirection::Ltr,
            split_size: DEFAULT_SPLIT_SIZE,
            max_image_size: Some((768, 1024)),
            gif_images_enabled: false,
            jpeg_quality: 80,
            references_added_to_toc: true,
            encode_html: false,
            short_date_format: false,
            epub_mark: true,
            book_root: "OEBPS/".to_string(),
            doc_root: None,
            viewport: None,
            strict_local_resources: false,
        }
    }
}

impl BookOptions {
    pub fn with_version(version: EpubVersion) -> Self {
        Self {
            epub_version: version,
            ..Self::default()
        }
    }

    pub fn set_split_size(&mut self, size: usize) {
        self.split_size = size.max(MIN_SPLIT_SIZE);
    }

    /// Split size with the floor applied, for options that came from a
    /// config file.
    pub fn effective_split_size(&self) -> usize {
        self.split_size.max(MIN_SPLIT_SIZE)
    }

    /// Set the package root directory. The value is normalized to end with
    /// a single `/`, with leading slashes and dots removed.
    pub fn set_book_root(&mut self, root: &str) {
        let trimmed = root.trim_start_matches(['/', '.']).trim_end_matches('/');
        self.book_root = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
    }

    /// Select a named viewport preset.
    pub fn set_viewport_preset(&mut self, name: &str) -> Result<()> {
        let size = viewport_preset(name)
            .ok_or_else(|| AssembleError::Validation(format!("unknown viewport preset '{name}'")))?;
        self.viewport = Some(size);
        Ok(())
    }

    pub fn is_epub2(&self) -> bool {
        self.epub_version == EpubVersion::V2
    }
}

/// Named viewport sizes for fixed-layout pages.
pub fn viewport_preset(name: &str) -> Option<(u32, u32)> {
    match name.to_ascii_lowercase().as_str() {
        "small" => Some((600, 800)),
        "medium" | "720p" => Some((720, 1280)),
        "ipad" => Some((768, 1024)),
        "large" | "2k" | "1080p" => Some((1080, 1920)),
        "ipad3" => Some((1536, 2048)),
        "4k" => Some((2160, 3840)),
        _ => None,
    }
}

fn serialize_image_size<S>(val: &Option<(u32, u32)>, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match val {
        Some((w, h)) => s.serialize_str(&format!("{w}x{h}")),
        None => s.serialize_none(),
    }
}

fn deserialize_image_size<'de, D>(d: D) -> std::result::Result<Option<(u32, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(d)?;
    let Some(s) = opt else {
        return Ok(None);
    };
    if let Some(size) = viewport_preset(&s) {
        return Ok(Some(size));
    }
    match s.split_once('x') {
        Some((w, h)) => {
            let w = w.trim().parse::<u32>().map_err(serde::de::Error::custom)?;
            let h = h.trim().parse::<u32>().map_err(serde::de::Error::custom)?;
            Ok(Some((w, h)))
        }
        None => Err(serde::de::Error::custom(
            "expected format 'WxH' (e.g. '768x1024') or a preset name",
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpubVersion {
    V2,
    V3,
}

impl EpubVersion {
    /// Value of the package `version` attribute.
    pub fn package_version(&self) -> &'static str {
        match self {
            EpubVersion::V2 => "2.0",
            EpubVersion::V3 => "3.0",
        }
    }
}

impl Serialize for EpubVersion {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            EpubVersion::V2 => serializer.serialize_str("2"),
            EpubVersion::V3 => serializer.serialize_str("3"),
        }
    }
}

impl<'de> Deserialize<'de> for EpubVersion {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "2" | "2.0" => Ok(EpubVersion::V2),
            "3" | "3.0" => Ok(EpubVersion::V3),
            _ => Err(serde::de::Error::custom("expected '2' or '3' for epub_version")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritingDirection {
    #[default]
    Ltr,
    Rtl,
}

impl WritingDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WritingDirection::Ltr => "ltr",
            WritingDirection::Rtl => "rtl",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = BookOptions::default();
        assert_eq!(opts.epub_version, EpubVersion::V2);
        assert_eq!(opts.split_size, 250_000);
        assert_eq!(opts.max_image_size, Some((768, 1024)));
        assert!(!opts.gif_images_enabled);
        assert!(opts.references_added_to_toc);
        assert_eq!(opts.book_root, "OEBPS/");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut opts = BookOptions::with_version(EpubVersion::V3);
        opts.max_image_size = Some((1200, 1600));
        opts.writing_direction = WritingDirection::Rtl;
        opts.viewport = Some((600, 800));

        let toml_str = toml::to_string_pretty(&opts).unwrap();
        let parsed: BookOptions = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.epub_version, EpubVersion::V3);
        assert_eq!(parsed.max_image_size, Some((1200, 1600)));
        assert_eq!(parsed.writing_direction, WritingDirection::Rtl);
        assert_eq!(parsed.viewport, Some((600, 800)));
    }

    #[test]
    fn test_toml_partial_config() {
        let opts: BookOptions = toml::from_str("epub_version = \"3\"\nviewport = \"ipad\"\n").unwrap();
        assert_eq!(opts.epub_version, EpubVersion::V3);
        assert_eq!(opts.viewport, Some((768, 1024)));
        assert_eq!(opts.jpeg_quality, 80);
    }

    #[test]
    fn test_bad_image_size() {
        assert!(toml::from_str::<BookOptions>("max_image_size = \"big\"").is_err());
        assert!(toml::from_str::<BookOptions>("epub_version = \"4\"").is_err());
    }

    #[test]
    fn test_split_size_floor() {
        let mut opts = BookOptions::default();
        opts.set_split_size(100);
        assert_eq!(opts.split_size, MIN_SPLIT_SIZE);
        opts.set_split_size(50_000);
        assert_eq!(opts.split_size, 50_000);
    }

    #[test]
    fn test_book_root_normalized() {
        let mut opts = BookOptions::default();
        opts.set_book_root("/content");
        assert_eq!(opts.book_root, "content/");
        opts.set_book_root("./");
        assert_eq!(opts.book_root, "");
    }

    #[test]
    fn test_viewport_presets() {
        assert_eq!(viewport_preset("1080p"), Some((1080, 1920)));
        assert_eq!(viewport_preset("4K"), Some((2160, 3840)));
        let mut opts = BookOptions::default();
        assert!(opts.set_viewport_preset("tiny").is_err());
    }
}
