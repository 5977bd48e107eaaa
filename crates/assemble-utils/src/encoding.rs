//! Decoding of fetched text resources (CSS, linked documents, chapters read
//! from disk).

use encoding_rs::Encoding;

/// Decode bytes to a UTF-8 string, returning the encoding that was used.
///
/// Order of precedence: byte order mark, a `@charset` or XML `encoding=`
/// declaration, valid UTF-8, Windows-1252.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return (text.into_owned(), encoding.name());
    }

    if let Some(label) = declared_charset(bytes) {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return (text.into_owned(), encoding.name());
        }
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), encoding_rs::UTF_8.name()),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            (text.into_owned(), encoding_rs::WINDOWS_1252.name())
        }
    }
}

/// Charset named by a leading `@charset "..."` rule or an XML/HTML
/// `encoding=`/`charset=` declaration in the first 512 bytes.
pub fn declared_charset(bytes: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    for marker in ["@charset", "encoding=", "charset="] {
        if let Some(start) = head.find(marker) {
            let rest = head[start + marker.len()..].trim_start();
            let quote = rest.chars().next()?;
            if quote == '"' || quote == '\'' {
                let rest = &rest[1..];
                if let Some(end) = rest.find(quote) {
                    return Some(rest[..end].to_string());
                }
            } else {
                let value: String = rest
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                    .collect();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8() {
        let (text, enc) = decode_text("h1 { content: \"é\" }".as_bytes());
        assert_eq!(text, "h1 { content: \"é\" }");
        assert_eq!(enc, "UTF-8");
    }

    #[test]
    fn test_decode_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"body{}");
        assert_eq!(decode_text(&bytes).0, "body{}");
    }

    #[test]
    fn test_decode_declared_latin1() {
        let bytes = b"@charset \"iso-8859-1\";\np::after { content: \"\xe9\" }";
        let (text, enc) = decode_text(bytes);
        assert!(text.contains('é'));
        assert_eq!(enc, "windows-1252");
    }

    #[test]
    fn test_fallback_windows_1252() {
        let (text, _) = decode_text(b"caf\xe9");
        assert_eq!(text, "café");
    }

    #[test]
    fn test_declared_charset() {
        assert_eq!(
            declared_charset(b"<?xml version=\"1.0\" encoding=\"utf-8\"?>").as_deref(),
            Some("utf-8")
        );
        assert_eq!(
            declared_charset(b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=Shift_JIS\">").as_deref(),
            Some("Shift_JIS")
        );
        assert_eq!(declared_charset(b"body {}"), None);
    }
}
