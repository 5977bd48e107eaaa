//! Text cleanup for labels, metadata and chapter markup.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static BR_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*<br\s*/*\s*>\s*").expect("valid regex"));
static BLOCK_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*</(p|div)\s*>\s*").expect("valid regex"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static NAMED_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("valid regex"));
static NUMERIC_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&amp;(#[xX]?[a-fA-F0-9]+;)").expect("valid regex"));
static LOOSE_COMMENT_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"--\s+>").expect("valid regex"));
static LOOSE_COMMENT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*!\s*--").expect("valid regex"));

/// Named HTML entities understood by [`decode_html_entities`].
static ENTITIES: &[(&str, char)] = &[
    ("quot", '"'), ("amp", '&'), ("apos", '\''), ("lt", '<'), ("gt", '>'),
    ("nbsp", '\u{a0}'), ("iexcl", '¡'), ("cent", '¢'), ("pound", '£'), ("curren", '¤'),
    ("yen", '¥'), ("brvbar", '¦'), ("sect", '§'), ("uml", '¨'), ("copy", '©'),
    ("ordf", 'ª'), ("laquo", '«'), ("not", '¬'), ("shy", '\u{ad}'), ("reg", '®'),
    ("macr", '¯'), ("deg", '°'), ("plusmn", '±'), ("sup2", '²'), ("sup3", '³'),
    ("acute", '´'), ("micro", 'µ'), ("para", '¶'), ("middot", '·'), ("cedil", '¸'),
    ("sup1", '¹'), ("ordm", 'º'), ("raquo", '»'), ("frac14", '¼'), ("frac12", '½'),
    ("frac34", '¾'), ("iquest", '¿'), ("Agrave", 'À'), ("Aacute", 'Á'), ("Acirc", 'Â'),
    ("Atilde", 'Ã'), ("Auml", 'Ä'), ("Aring", 'Å'), ("AElig", 'Æ'), ("Ccedil", 'Ç'),
    ("Egrave", 'È'), ("Eacute", 'É'), ("Ecirc", 'Ê'), ("Euml", 'Ë'), ("Igrave", 'Ì'),
    ("Iacute", 'Í'), ("Icirc", 'Î'), ("Iuml", 'Ï'), ("ETH", 'Ð'), ("Ntilde", 'Ñ'),
    ("Ograve", 'Ò'), ("Oacute", 'Ó'), ("Ocirc", 'Ô'), ("Otilde", 'Õ'), ("Ouml", 'Ö'),
    ("times", '×'), ("Oslash", 'Ø'), ("Ugrave", 'Ù'), ("Uacute", 'Ú'), ("Ucirc", 'Û'),
    ("Uuml", 'Ü'), ("Yacute", 'Ý'), ("THORN", 'Þ'), ("szlig", 'ß'), ("agrave", 'à'),
    ("aacute", 'á'), ("acirc", 'â'), ("atilde", 'ã'), ("auml", 'ä'), ("aring", 'å'),
    ("aelig", 'æ'), ("ccedil", 'ç'), ("egrave", 'è'), ("eacute", 'é'), ("ecirc", 'ê'),
    ("euml", 'ë'), ("igrave", 'ì'), ("iacute", 'í'), ("icirc", 'î'), ("iuml", 'ï'),
    ("eth", 'ð'), ("ntilde", 'ñ'), ("ograve", 'ò'), ("oacute", 'ó'), ("ocirc", 'ô'),
    ("otilde", 'õ'), ("ouml", 'ö'), ("divide", '÷'), ("oslash", 'ø'), ("ugrave", 'ù'),
    ("uacute", 'ú'), ("ucirc", 'û'), ("uuml", 'ü'), ("yacute", 'ý'), ("thorn", 'þ'),
    ("yuml", 'ÿ'), ("OElig", 'Œ'), ("oelig", 'œ'), ("Scaron", 'Š'), ("scaron", 'š'),
    ("Yuml", 'Ÿ'), ("fnof", 'ƒ'), ("circ", 'ˆ'), ("tilde", '˜'), ("ensp", '\u{2002}'),
    ("emsp", '\u{2003}'), ("thinsp", '\u{2009}'), ("zwnj", '\u{200c}'), ("zwj", '\u{200d}'),
    ("ndash", '–'), ("mdash", '—'), ("lsquo", '‘'), ("rsquo", '’'), ("sbquo", '‚'),
    ("ldquo", '“'), ("rdquo", '”'), ("bdquo", '„'), ("dagger", '†'), ("Dagger", '‡'),
    ("bull", '•'), ("hellip", '…'), ("permil", '‰'), ("prime", '′'), ("Prime", '″'),
    ("lsaquo", '‹'), ("rsaquo", '›'), ("oline", '‾'), ("frasl", '⁄'), ("euro", '€'),
    ("trade", '™'), ("larr", '←'), ("uarr", '↑'), ("rarr", '→'), ("darr", '↓'),
    ("harr", '↔'), ("minus", '−'), ("infin", '∞'), ("ne", '≠'), ("le", '≤'), ("ge", '≥'),
];

fn lookup_entity(name: &str) -> Option<char> {
    ENTITIES.iter().find(|(n, _)| *n == name).map(|(_, c)| *c)
}

/// Reduce HTML to plain text suitable for metadata and navigation labels.
///
/// `<br>` becomes a newline, closing `p`/`div` a blank line, all other tags
/// are dropped, named entities are decoded, and `&`, `<`, `>` are escaped
/// again. Numeric character references survive unchanged.
pub fn decode_html_entities(input: &str) -> String {
    let s = BR_TAG.replace_all(input, "\n");
    let s = BLOCK_END.replace_all(&s, "\n\n");
    let s = ANY_TAG.replace_all(&s, "");
    let s = NAMED_ENTITY.replace_all(&s, |caps: &Captures| match lookup_entity(&caps[1]) {
        Some(c) => c.to_string(),
        None => caps[0].to_string(),
    });
    let s = s.replace('&', "&amp;").replace("&amp;amp;", "&amp;");
    let s = NUMERIC_REF.replace_all(&s, "&$1");
    s.replace('<', "&lt;").replace('>', "&gt;")
}

/// Strip every tag, leaving entities alone.
pub fn html_to_text(input: &str) -> String {
    ANY_TAG.replace_all(input, "").into_owned()
}

/// Replace non-ASCII characters with numeric character references. Markup is
/// left intact.
pub fn encode_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            out.push_str(&format!("&#{};", c as u32));
        }
    }
    out
}

/// Remove HTML comments, tolerating sloppy delimiters and nested openers.
/// An unterminated comment swallows the rest of the document.
pub fn remove_comments(doc: &str) -> String {
    let doc = LOOSE_COMMENT_END.replace_all(doc, "-->");
    let mut doc = LOOSE_COMMENT_START.replace_all(&doc, "<!--").into_owned();

    while let Some(start) = doc.find("<!--") {
        let mut depth = 0usize;
        let mut pos = start;
        let mut end = doc.len();
        loop {
            let open = doc[pos..].find("<!--").map(|i| i + pos);
            let close = doc[pos..].find("-->").map(|i| i + pos);
            match (open, close) {
                (Some(o), Some(c)) if o < c => {
                    depth += 1;
                    pos = o + 4;
                }
                (_, Some(c)) => {
                    depth = depth.saturating_sub(1);
                    pos = c + 3;
                    if depth == 0 {
                        end = pos;
                        break;
                    }
                }
                (_, None) => break,
            }
        }
        doc.replace_range(start..end, "");
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_html_entities() {
        assert_eq!(decode_html_entities("Fish &amp; Chips"), "Fish &amp; Chips");
        assert_eq!(decode_html_entities("<b>A</b> &lt;B&gt;"), "A &lt;B&gt;");
        assert_eq!(decode_html_entities("caf&eacute;"), "café");
        assert_eq!(decode_html_entities("one<br/>two"), "one\ntwo");
        assert_eq!(decode_html_entities("<p>one</p><p>two</p>"), "one\n\ntwo\n\n");
        assert_eq!(decode_html_entities("&#169; 2020"), "&#169; 2020");
        assert_eq!(decode_html_entities("R&D"), "R&amp;D");
    }

    #[test]
    fn test_encode_html() {
        assert_eq!(encode_html("<p>café</p>"), "<p>caf&#233;</p>");
    }

    #[test]
    fn test_remove_comments() {
        assert_eq!(remove_comments("a<!-- x -->b"), "ab");
        assert_eq!(remove_comments("a< ! -- x -- >b"), "ab");
        assert_eq!(remove_comments("a<!-- <!-- x --> y -->b"), "ab");
        assert_eq!(remove_comments("a<!-- open"), "a");
        assert_eq!(remove_comments("plain"), "plain");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(html_to_text("<h1>Chapter <i>1</i></h1>"), "Chapter 1");
    }
}
