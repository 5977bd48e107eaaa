//! Media type lookup for book resources.

use std::path::Path;

/// Media type for a file extension. Unknown extensions fall back to the
/// `mime_guess` table and finally to `application/octet-stream`.
pub fn mime_from_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "xhtml" | "xhtm" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",

        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",

        "ttf" => "application/x-font-ttf",
        "otf" => "application/vnd.ms-opentype",
        "woff" => "application/font-woff",
        "woff2" => "font/woff2",

        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "smil" => "application/smil+xml",

        "xml" => "application/xml",
        "opf" => "application/oebps-package+xml",
        "ncx" => "application/x-dtbncx+xml",
        "txt" => "text/plain",

        other => mime_guess::from_ext(other)
            .first_raw()
            .unwrap_or("application/octet-stream"),
    }
}

pub fn mime_from_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .map(mime_from_extension)
        .unwrap_or("application/octet-stream")
}

/// Media type for a file name or URL path. Query and fragment are ignored.
pub fn mime_from_name(name: &str) -> &'static str {
    mime_from_path(Path::new(name.split(['?', '#']).next().unwrap_or(name)))
}

pub fn is_image(mime: &str) -> bool {
    mime.starts_with("image/")
}

/// Standard file extension for a media type.
pub fn extension_from_mime(mime: &str) -> &'static str {
    match mime {
        "application/xhtml+xml" => "xhtml",
        "text/html" => "html",
        "text/css" => "css",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tif",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        "text/plain" => "txt",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension("xhtml"), "application/xhtml+xml");
        assert_eq!(mime_from_extension("JPG"), "image/jpeg");
        assert_eq!(mime_from_extension("mp3"), "audio/mpeg");
        assert_eq!(mime_from_extension("zzzunknown"), "application/octet-stream");
    }

    #[test]
    fn test_mime_guess_fallback() {
        assert_eq!(mime_from_extension("pdf"), "application/pdf");
    }

    #[test]
    fn test_mime_from_name_ignores_query() {
        assert_eq!(mime_from_name("images/a.png?v=2"), "image/png");
        assert_eq!(mime_from_name("Styles/main.css"), "text/css");
    }

    #[test]
    fn test_extension_from_mime() {
        assert_eq!(extension_from_mime("image/png"), "png");
        assert!(is_image("image/svg+xml"));
        assert!(!is_image("text/css"));
    }
}
