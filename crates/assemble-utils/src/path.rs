//! Archive path arithmetic and reference classification.
//!
//! Every function here is total: odd input yields a best-effort path, never
//! an error.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

static REMOTE_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(http|ftp)s?://").expect("valid regex"));
static DIR_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^/]+/").expect("valid regex"));
static LEADING_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[/.]+").expect("valid regex"));
static DASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s-]+").expect("valid regex"));

const UNSAFE_FILE_CHARS: &[char] = &[
    '?', '[', ']', '/', '\\', '=', '<', '>', ':', ';', ',', '\'', '"', '&', '$', '#', '*', '(',
    ')', '|', '~', '`', '!', '{', '}', '%', '+',
];

/// Where a referenced resource lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// `http`, `https`, `ftp` or `ftps` URL.
    Remote {
        scheme: String,
        host: String,
        path: String,
    },
    /// Path starting with `/`, resolved against the document root.
    Absolute(String),
    /// Anything else, resolved against the caller's base directory.
    Relative(String),
}

impl SourceRef {
    pub fn is_remote(&self) -> bool {
        matches!(self, SourceRef::Remote { .. })
    }

    /// Path part of the reference, percent-encoded as written.
    pub fn path(&self) -> &str {
        match self {
            SourceRef::Remote { path, .. } => path,
            SourceRef::Absolute(path) | SourceRef::Relative(path) => path,
        }
    }
}

pub fn classify(source: &str) -> SourceRef {
    if REMOTE_SCHEME.is_match(source) {
        if let Ok(url) = Url::parse(source) {
            return SourceRef::Remote {
                scheme: url.scheme().to_string(),
                host: url.host_str().unwrap_or_default().to_string(),
                path: url.path().to_string(),
            };
        }
    }
    if source.starts_with('/') {
        SourceRef::Absolute(source.to_string())
    } else {
        SourceRef::Relative(source.to_string())
    }
}

/// Resolve `.` and `..` segments and drop leading `/`, `./` and `../`,
/// producing a path that stays inside the archive.
pub fn relativize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = segments.join("/");
    if path.ends_with('/') && !out.is_empty() {
        out.push('/');
    }
    out
}

/// One `../` per `/`-terminated segment of `dir`.
pub fn back_path(dir: &str) -> String {
    DIR_SEGMENT.replace_all(dir, "../").into_owned()
}

/// Strip leading slashes and dots.
pub fn normalize_file_name(name: &str) -> String {
    LEADING_DOTS.replace(name, "").into_owned()
}

/// Make a string safe to use as a single archive file name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !UNSAFE_FILE_CHARS.contains(c)).collect();
    let dashed = DASH_RUNS.replace_all(&cleaned, "-");
    dashed.trim_matches(|c| c == '.' || c == '-' || c == '_').to_string()
}

pub fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Directory part of a path: `.` when there is none, `/` for root files.
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => ".",
    }
}

pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// File name without its last extension.
pub fn file_stem(path: &str) -> &str {
    let base = basename(path);
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    }
}

pub fn extension(path: &str) -> Option<&str> {
    let base = basename(path);
    match base.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < base.len() => Some(&base[idx + 1..]),
        _ => None,
    }
}

/// Directory of a file inside the archive, `/`-terminated, or empty at the root.
pub fn archive_dir(file_name: &str) -> String {
    let dir = dirname(file_name);
    let dir = normalize_file_name(&format!("{dir}/"));
    if dir.is_empty() || dir == "/" {
        String::new()
    } else {
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relativize() {
        assert_eq!(relativize("./a/b/../c.html"), "a/c.html");
        assert_eq!(relativize("../../x.png"), "x.png");
        assert_eq!(relativize("/abs/y.css"), "abs/y.css");
        assert_eq!(relativize("images//http/host/./a.png"), "images/http/host/a.png");
        assert_eq!(relativize("dir/"), "dir/");
        assert_eq!(relativize(""), "");
    }

    #[test]
    fn test_back_path() {
        assert_eq!(back_path(""), "");
        assert_eq!(back_path("Text/"), "../");
        assert_eq!(back_path("a/b/"), "../../");
        assert_eq!(back_path("a/b"), "../b");
    }

    #[test]
    fn test_classify() {
        match classify("https://example.com/img/a.png?x=1") {
            SourceRef::Remote { scheme, host, path } => {
                assert_eq!(scheme, "https");
                assert_eq!(host, "example.com");
                assert_eq!(path, "/img/a.png");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(classify("/root/a.png"), SourceRef::Absolute("/root/a.png".into()));
        assert_eq!(classify("img/a.png"), SourceRef::Relative("img/a.png".into()));
        assert!(classify("FTP://host/a").is_remote());
        assert!(!classify("data:image/png;base64,xx").is_remote());
    }

    #[test]
    fn test_names() {
        assert_eq!(normalize_file_name(".././/Text/c.xhtml"), "Text/c.xhtml");
        assert_eq!(sanitize_file_name("my (best) image?.png"), "my-best-image.png");
        assert_eq!(percent_decode("a%20b.png"), "a b.png");
    }

    #[test]
    fn test_path_parts() {
        assert_eq!(dirname("a/b/c.png"), "a/b");
        assert_eq!(dirname("c.png"), ".");
        assert_eq!(dirname("/c.png"), "/");
        assert_eq!(basename("a/b/c.png"), "c.png");
        assert_eq!(file_stem("Text/chapter.1.xhtml"), "chapter.1");
        assert_eq!(extension("Text/chapter.xhtml"), Some("xhtml"));
        assert_eq!(extension("README"), None);
        assert_eq!(archive_dir("Text/ch1.xhtml"), "Text/");
        assert_eq!(archive_dir("ch1.xhtml"), "");
    }
}
