use std::borrow::Cow;

/// Collapses every run of whitespace (spaces, tabs, newlines) into a single
/// space and trims the ends.
///
/// Scraped HTML and feed XML both arrive with arbitrary internal whitespace;
/// all text that ends up in article records goes through this first so that
/// length invariants and deduplication operate on stable strings.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ellipsis appended when text is cut.
const ELLIPSIS: &str = "...";

/// Truncates a string to at most `max_chars` characters, appending "..."
/// when anything was cut.
///
/// Counts characters, not bytes, so multi-byte text never gets split in the
/// middle of a code point. Returns `Cow::Borrowed` when the string already
/// fits (the common case — no allocation).
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let cut = s
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS))
}

/// Strips control characters that are not legal in XML 1.0 text.
///
/// Feed titles and descriptions come from untrusted origin markup; C0
/// control bytes other than tab/newline/CR would make the emitted RSS
/// unparseable, so they are dropped before assembly. Returns
/// `Cow::Borrowed` when the input is already clean.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_bad = |c: char| (c < ' ' && c != '\t' && c != '\n' && c != '\r') || c == '\u{7f}';

    if !s.chars().any(is_bad) {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.chars().filter(|&c| !is_bad(c)).collect())
}

/// Removes HTML tags from a fragment, yielding the text between them.
///
/// This is a tolerant single-pass scan used on feed descriptions (which are
/// frequently HTML) before they are emitted as plain text. It is not a
/// parser: entities are left as-is and malformed tags are skipped to the
/// next `>`.
pub fn strip_html_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  c  "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace("single"), "single");
    }

    #[test]
    fn test_truncate_fits_borrowed() {
        let result = truncate_chars("short", 10);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "short");
    }

    #[test]
    fn test_truncate_exact_fit() {
        assert_eq!(truncate_chars("12345", 5), "12345");
    }

    #[test]
    fn test_truncate_cuts_with_ellipsis() {
        assert_eq!(truncate_chars("Hello World", 8), "Hello...");
    }

    #[test]
    fn test_truncate_multibyte_no_panic() {
        let s = "důležité zprávy z celého světa";
        let out = truncate_chars(s, 10);
        assert!(out.chars().count() <= 10);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_strip_control_clean_borrowed() {
        let input = "clean text\nwith newline";
        let result = strip_control_chars(input);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, input);
    }

    #[test]
    fn test_strip_control_removes_c0() {
        assert_eq!(strip_control_chars("a\x00b\x07c\x1bd"), "abcd");
    }

    #[test]
    fn test_strip_control_keeps_tab_newline_cr() {
        assert_eq!(strip_control_chars("a\tb\nc\rd"), "a\tb\nc\rd");
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(
            strip_html_tags("<p>Hello <b>world</b></p>"),
            "Hello world"
        );
        assert_eq!(strip_html_tags("no tags here"), "no tags here");
        assert_eq!(strip_html_tags("<img src='x'>after"), "after");
    }
}
