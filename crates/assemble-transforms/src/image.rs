//! Image loading for the book: format sniffing, scaling to the configured
//! maximum size, and re-encoding.
//!
//! Raster images are resized with fast_image_resize (SIMD Lanczos3) and
//! fall back to the image crate's resizer. SVG images are scaled by
//! rewriting the root element's `width` and `height`.

use std::io::Cursor;

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;

use assemble_core::error::{AssembleError, Result};
use assemble_core::plugin::{ImageLoader, LoadedImage};
use assemble_core::BookOptions;
use assemble_utils::mime::{extension_from_mime, is_image, mime_from_name};

static SVG_LENGTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)(em|ex|px|pt|pc|cm|mm|in|%|)\s*$").expect("valid regex")
});
static LIST_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[,;]\s*|\s+").expect("valid regex"));

const DEFAULT_SVG_WIDTH: f64 = 512.0;

/// Loads images with the `image` crate and scales them to fit.
#[derive(Debug, Clone)]
pub struct RasterImageLoader {
    max_size: Option<(u32, u32)>,
    gif_enabled: bool,
    jpeg_quality: u8,
}

impl RasterImageLoader {
    pub fn new(max_size: Option<(u32, u32)>, gif_enabled: bool, jpeg_quality: u8) -> Self {
        Self {
            max_size,
            gif_enabled,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn from_options(options: &BookOptions) -> Self {
        Self::new(options.max_image_size, options.gif_images_enabled, options.jpeg_quality)
    }

    fn scale(&self, width: u32, height: u32) -> f64 {
        match self.max_size {
            Some((max_w, max_h)) => scale_ratio(width, height, max_w, max_h),
            None => 1.0,
        }
    }

    fn load_raster(&self, data: &[u8], source: &str) -> Result<Option<LoadedImage>> {
        let mime = match sniff_mime(data) {
            Some(mime) => mime,
            None => {
                let guessed = mime_from_name(source);
                if !is_image(guessed) {
                    return Ok(None);
                }
                guessed
            }
        };
        let img = match image::load_from_memory(data) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("Failed to decode image {source}: {e}");
                return Ok(None);
            }
        };
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Ok(None);
        }

        let ratio = self.scale(width, height);
        let is_gif = mime == "image/gif";
        if ratio >= 1.0 && !(is_gif && !self.gif_enabled) {
            return Ok(Some(LoadedImage {
                width,
                height,
                mime: mime.to_string(),
                ext: extension_from_mime(mime).to_string(),
                data: data.to_vec(),
            }));
        }

        let (new_w, new_h) = if ratio < 1.0 {
            fit_dimensions(width, height, ratio)
        } else {
            (width, height)
        };
        let resized = if (new_w, new_h) == (width, height) {
            img
        } else {
            resize_image(&img, new_w, new_h, source)
        };

        let out_mime = match mime {
            "image/png" => "image/png",
            "image/gif" if !self.gif_enabled => "image/png",
            "image/gif" => "image/gif",
            _ => "image/jpeg",
        };
        let encoded = encode_image(&resized, out_mime, self.jpeg_quality)
            .map_err(|e| AssembleError::Image(format!("{source}: {e}")))?;

        log::info!(
            "Rescaled {source} from {width}x{height} to {new_w}x{new_h} ({} -> {} bytes)",
            data.len(),
            encoded.len()
        );
        Ok(Some(LoadedImage {
            width: new_w,
            height: new_h,
            mime: out_mime.to_string(),
            ext: extension_from_mime(out_mime).to_string(),
            data: encoded,
        }))
    }

    fn load_svg(&self, data: &[u8], source: &str) -> Result<Option<LoadedImage>> {
        let Some(attrs) = svg_root_attributes(data) else {
            log::warn!("No <svg> root element in {source}");
            return Ok(None);
        };
        let Some((width, height)) = svg_dimensions(&attrs) else {
            return Ok(None);
        };

        let ratio = self.scale(width, height);
        let (data, width, height) = if ratio < 1.0 {
            let (new_w, new_h) = (f64::from(width) * ratio, f64::from(height) * ratio);
            let rewritten = rewrite_svg_size(data, new_w, new_h)
                .map_err(|e| AssembleError::Xml(format!("{source}: {e}")))?;
            (rewritten, new_w.round() as u32, new_h.round() as u32)
        } else {
            (data.to_vec(), width, height)
        };

        Ok(Some(LoadedImage {
            width,
            height,
            mime: "image/svg+xml".to_string(),
            ext: "svg".to_string(),
            data,
        }))
    }
}

impl ImageLoader for RasterImageLoader {
    fn load(&self, data: &[u8], source: &str) -> Result<Option<LoadedImage>> {
        if data.is_empty() {
            return Ok(None);
        }
        if looks_like_svg(data) {
            self.load_svg(data, source)
        } else {
            self.load_raster(data, source)
        }
    }
}

/// Media type from the leading magic bytes.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.starts_with(b"\x89PNG\r\n") {
        Some("image/png")
    } else if data.starts_with(b"BM") {
        Some("image/bmp")
    } else if data.starts_with(b"II\x2a\x00") || data.starts_with(b"II\x00\x4a") {
        Some("image/tiff")
    } else {
        None
    }
}

fn looks_like_svg(data: &[u8]) -> bool {
    let head = &data[..data.len().min(4096)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start();
    trimmed.starts_with("<svg") || ((trimmed.starts_with("<?xml") || trimmed.starts_with("<!")) && text.contains("<svg"))
}

/// Scale factor that fits `width`x`height` inside the maximum box.
pub fn scale_ratio(width: u32, height: u32, max_w: u32, max_h: u32) -> f64 {
    let ratio_w = f64::from(max_w) / f64::from(width);
    let ratio_h = f64::from(max_h) / f64::from(height);
    ratio_w.min(ratio_h).min(1.0)
}

fn fit_dimensions(width: u32, height: u32, ratio: f64) -> (u32, u32) {
    let new_w = (f64::from(width) * ratio).round() as u32;
    let new_h = (f64::from(height) * ratio).round() as u32;
    (new_w.max(1), new_h.max(1))
}

fn resize_image(img: &image::DynamicImage, new_w: u32, new_h: u32, source: &str) -> image::DynamicImage {
    use fast_image_resize::images::Image;
    use fast_image_resize::Resizer;

    let src = image::DynamicImage::ImageRgba8(img.to_rgba8());
    let mut dst = Image::new(new_w, new_h, fast_image_resize::PixelType::U8x4);
    let mut resizer = Resizer::new();
    if let Err(e) = resizer.resize(&src, &mut dst, None) {
        log::warn!("fast_image_resize failed for {source}: {e}, falling back");
        return img.resize_exact(new_w, new_h, image::imageops::FilterType::Lanczos3);
    }
    match image::RgbaImage::from_raw(new_w, new_h, dst.into_vec()) {
        Some(rgba) => image::DynamicImage::ImageRgba8(rgba),
        None => img.resize_exact(new_w, new_h, image::imageops::FilterType::Lanczos3),
    }
}

fn encode_image(img: &image::DynamicImage, mime: &str, jpeg_quality: u8) -> image::ImageResult<Vec<u8>> {
    use image::ImageEncoder;

    let mut buf = Vec::new();
    match mime {
        "image/png" => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?,
        "image/gif" => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Gif)?,
        _ => {
            let rgb = img.to_rgb8();
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, jpeg_quality);
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)?;
        }
    }
    Ok(buf)
}

/// Length in pixels of an SVG length. Percentages are taken of `port`.
fn svg_length(value: &str, port: f64) -> f64 {
    let Some(caps) = SVG_LENGTH.captures(value) else {
        return value.trim().parse().unwrap_or(0.0);
    };
    let length: f64 = caps[1].parse().unwrap_or(0.0);
    let scale = match &caps[2] {
        "%" => return length * 0.01 * port,
        "pt" => 1.25,
        "pc" => 15.0,
        "mm" => 3.543307,
        "cm" => 35.43307,
        "in" => 90.0,
        "em" => 16.0,
        "ex" => 12.0,
        _ => 1.0,
    };
    length * scale
}

fn svg_root_attributes(data: &[u8]) -> Option<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(data);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"svg" => {
                return Some(
                    e.attributes()
                        .flatten()
                        .map(|a| {
                            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
                            let value = a
                                .unescape_value()
                                .map(|v| v.into_owned())
                                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned());
                            (key, value)
                        })
                        .collect(),
                );
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Rendered size of an SVG from its root `width`, `height` and `viewBox`.
/// A missing dimension follows the viewBox aspect ratio; with neither, the
/// width defaults to 512.
fn svg_dimensions(attrs: &[(String, String)]) -> Option<(u32, u32)> {
    let get = |name: &str| attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    let (mut view_w, mut view_h, mut aspect) = (0.0, 0.0, 1.0);
    if let Some(view_box) = get("viewBox") {
        let parts: Vec<&str> = LIST_SEPARATOR.split(view_box.trim()).collect();
        if parts.len() == 4 {
            view_w = svg_length(parts[2], DEFAULT_SVG_WIDTH);
            view_h = svg_length(parts[3], DEFAULT_SVG_WIDTH);
            if view_w > 0.0 && view_h > 0.0 {
                aspect = view_w / view_h;
            }
        }
    }

    let width = get("width").map(|w| svg_length(w, view_w));
    let height = get("height").map(|h| svg_length(h, view_h));
    let (width, height) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, w / aspect),
        (None, Some(h)) => (h * aspect, h),
        (None, None) => (DEFAULT_SVG_WIDTH, DEFAULT_SVG_WIDTH / aspect),
    };
    if width > 0.0 && height > 0.0 {
        Some((width.round() as u32, height.round() as u32))
    } else {
        None
    }
}

/// Copy the document, replacing `width` and `height` on the root element.
fn rewrite_svg_size(data: &[u8], width: f64, height: f64) -> std::result::Result<Vec<u8>, quick_xml::Error> {
    let mut reader = Reader::from_reader(data);
    let mut writer = Writer::new(Vec::with_capacity(data.len()));
    let mut root_done = false;
    let (width, height) = (format_length(width), format_length(height));

    loop {
        let event = reader.read_event()?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if !root_done && e.local_name().as_ref() == b"svg" => {
                root_done = true;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut root = BytesStart::new(name);
                for attr in e.attributes().flatten() {
                    let key = attr.key.as_ref();
                    if key != b"width" && key != b"height" {
                        root.push_attribute(attr);
                    }
                }
                root.push_attribute(("width", width.as_str()));
                root.push_attribute(("height", height.as_str()));
                let rewritten = match event {
                    Event::Empty(_) => Event::Empty(root),
                    _ => Event::Start(root),
                };
                writer.write_event(rewritten)?;
            }
            other => writer.write_event(other)?,
        }
    }
    Ok(writer.into_inner())
}

fn format_length(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::new(width, height);
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn gif(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::new(width, height);
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Gif)
            .unwrap();
        buf
    }

    #[test]
    fn test_scale_ratio() {
        assert_eq!(scale_ratio(100, 100, 768, 1024), 1.0);
        assert_eq!(scale_ratio(1536, 1024, 768, 1024), 0.5);
        assert_eq!(scale_ratio(500, 2048, 768, 1024), 0.5);
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&png(1, 1)), Some("image/png"));
        assert_eq!(sniff_mime(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_mime(&[0xff, 0xd8, 0xff, 0xe0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"hello"), None);
    }

    #[test]
    fn test_small_png_passes_through() {
        let loader = RasterImageLoader::new(Some((768, 1024)), false, 80);
        let data = png(20, 10);
        let loaded = loader.load(&data, "a.png").unwrap().unwrap();
        assert_eq!((loaded.width, loaded.height), (20, 10));
        assert_eq!(loaded.ext, "png");
        assert_eq!(loaded.data, data);
    }

    #[test]
    fn test_large_png_is_scaled() {
        let loader = RasterImageLoader::new(Some((50, 50)), false, 80);
        let loaded = loader.load(&png(100, 200), "big.png").unwrap().unwrap();
        assert_eq!((loaded.width, loaded.height), (25, 50));
        assert_eq!(loaded.mime, "image/png");
        let decoded = image::load_from_memory(&loaded.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (25, 50));
    }

    #[test]
    fn test_gif_converted_when_disabled() {
        let disabled = RasterImageLoader::new(Some((768, 1024)), false, 80);
        let loaded = disabled.load(&gif(4, 4), "anim.gif").unwrap().unwrap();
        assert_eq!(loaded.mime, "image/png");
        assert_eq!(loaded.ext, "png");

        let enabled = RasterImageLoader::new(Some((768, 1024)), true, 80);
        let loaded = enabled.load(&gif(4, 4), "anim.gif").unwrap().unwrap();
        assert_eq!(loaded.mime, "image/gif");
    }

    #[test]
    fn test_not_an_image() {
        let loader = RasterImageLoader::new(None, false, 80);
        assert!(loader.load(b"plain text", "notes.txt").unwrap().is_none());
    }

    #[test]
    fn test_svg_dimensions() {
        let attrs = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        assert_eq!(svg_dimensions(&attrs(&[("width", "100"), ("height", "50")])), Some((100, 50)));
        assert_eq!(svg_dimensions(&attrs(&[("viewBox", "0 0 200 100"), ("width", "1in")])), Some((90, 45)));
        assert_eq!(svg_dimensions(&attrs(&[("viewBox", "0,0,100,200")])), Some((512, 1024)));
        assert_eq!(svg_dimensions(&attrs(&[("width", "50%"), ("height", "10pt"), ("viewBox", "0 0 400 40")])), Some((200, 13)));
    }

    #[test]
    fn test_svg_scaled_by_attributes() {
        let loader = RasterImageLoader::new(Some((100, 100)), false, 80);
        let svg = br#"<?xml version="1.0"?><svg xmlns="http://www.w3.org/2000/svg" width="400" height="200"><rect width="10" height="10"/></svg>"#;
        let loaded = loader.load(svg, "pic.svg").unwrap().unwrap();
        assert_eq!(loaded.mime, "image/svg+xml");
        assert_eq!((loaded.width, loaded.height), (100, 50));
        let text = String::from_utf8(loaded.data).unwrap();
        assert!(text.contains("width=\"100\""));
        assert!(text.contains("height=\"50\""));
        assert!(text.contains("<rect width=\"10\" height=\"10\"/>"));
    }
}
