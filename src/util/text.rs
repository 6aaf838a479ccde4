use std::borrow::Cow;

/// Ellipsis string used for truncation
pub const ELLIPSIS: &str = "...";
/// Length of the ellipsis in characters
const ELLIPSIS_LEN: usize = 3;

/// Truncates a string to at most `max_chars` Unicode scalar values.
///
/// If truncation is necessary, the first `max_chars - 3` characters are kept
/// and "..." is appended, so the result is exactly `max_chars` characters long.
/// Cutting happens on `char_indices` boundaries, so a multi-byte character is
/// never split.
///
/// # Returns
///
/// A `Cow<str>`:
/// - If the string fits, returns `Cow::Borrowed(s)` (no allocation)
/// - If `max_chars <= 3`, returns the first `max_chars` characters without ellipsis
/// - Otherwise returns `Cow::Owned` with the truncated text and "..." appended
///
/// # Examples
///
/// ```
/// use shopfeed::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 8), "Hello...");
/// assert_eq!(truncate_chars("Perché sì", 8), "Perch...");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    // Byte index of the character at position `max_chars`; None means it fits
    let Some((overflow_at, _)) = s.char_indices().nth(max_chars) else {
        return Cow::Borrowed(s);
    };

    if max_chars <= ELLIPSIS_LEN {
        return Cow::Owned(s[..overflow_at].to_string());
    }

    let keep = max_chars - ELLIPSIS_LEN;
    let cut = s.char_indices().nth(keep).map(|(idx, _)| idx).unwrap_or(s.len());
    Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS))
}

/// Removes HTML tags and collapses all whitespace runs to a single space.
///
/// This is a lexical strip, not an HTML parser: anything between `<` and the
/// next `>` is dropped. Entities are left as-is (the XML writer escapes them).
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                // Tags separate words: "<p>a</p><p>b</p>" must not become "ab"
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits a delimited list into trimmed, non-empty entries in source order.
///
/// `None` and empty input both yield an empty `Vec`.
pub fn split_list(value: Option<&str>, delimiter: char) -> Vec<String> {
    value
        .map(|v| {
            v.split(delimiter)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Returns true for characters XML 1.0 forbids in text content.
fn is_xml_forbidden(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{fffe}' | '\u{ffff}')
}

/// Strips characters that are illegal in XML 1.0 text (C0 controls other than
/// tab, newline and carriage return, plus U+FFFE/U+FFFF).
///
/// Catalog text is merchant-entered and occasionally carries pasted control
/// bytes; a single one makes the whole feed unparseable for the platform.
///
/// Returns `Cow::Borrowed` when the input is already clean (common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_xml_forbidden) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_xml_forbidden(*c)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ascii_truncation() {
        // "Hello World" = 11 chars, max 8 -> keep 5 + "..."
        assert_eq!(truncate_chars("Hello World", 8), "Hello...");
        assert_eq!(truncate_chars("Short", 10), "Short");
    }

    #[test]
    fn test_exact_fit_is_borrowed() {
        let result = truncate_chars("12345", 5);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "12345");
    }

    #[test]
    fn test_multibyte_truncation_counts_characters() {
        // 'è' and 'ü' are two bytes each; counting must be per character
        let input = "Scarpe in pelle è comode ü";
        let result = truncate_chars(input, 12);
        assert_eq!(result.chars().count(), 12);
        assert_eq!(result, "Scarpe in...");

        let cjk = "日本語テキストです";
        assert_eq!(truncate_chars(cjk, 6), "日本語...");
    }

    #[test]
    fn test_narrow_limits_skip_ellipsis() {
        assert_eq!(truncate_chars("Test", 0), "");
        assert_eq!(truncate_chars("Testing", 1), "T");
        assert_eq!(truncate_chars("Testing", 3), "Tes");
        assert_eq!(truncate_chars("Testing", 4), "T...");
    }

    #[test]
    fn test_strip_html_removes_tags_and_collapses_whitespace() {
        let html = "<p>Sneaker <strong>dipinta</strong>\n a mano</p><ul><li>Pelle</li></ul>";
        assert_eq!(strip_html(html), "Sneaker dipinta a mano Pelle");
    }

    #[test]
    fn test_strip_html_plain_text_untouched() {
        assert_eq!(strip_html("  just   text  "), "just text");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(Some("nike, sneakers ,, Summer Collection"), ','),
            vec!["nike", "sneakers", "Summer Collection"]
        );
        assert!(split_list(None, ',').is_empty());
        assert!(split_list(Some("  "), ',').is_empty());
    }

    #[test]
    fn test_strip_control_chars() {
        let clean = "Converse Chuck 70\tHi";
        assert!(matches!(strip_control_chars(clean), Cow::Borrowed(_)));

        assert_eq!(strip_control_chars("Air\u{0}Max\u{1b} 90"), "AirMax 90");
        assert_eq!(strip_control_chars("line1\nline2\r\n"), "line1\nline2\r\n");
    }

    proptest! {
        #[test]
        fn prop_truncation_never_exceeds_limit(s in "\\PC{0,120}", max in 0usize..100) {
            let out = truncate_chars(&s, max);
            prop_assert!(out.chars().count() <= max);
            if s.chars().count() > max && max > ELLIPSIS_LEN {
                prop_assert_eq!(out.chars().count(), max);
                prop_assert!(out.ends_with(ELLIPSIS));
            }
        }

        #[test]
        fn prop_truncation_preserves_prefix(s in "\\PC{0,120}", max in 4usize..100) {
            let out = truncate_chars(&s, max);
            let body = out.strip_suffix(ELLIPSIS).unwrap_or(&out);
            prop_assert!(s.starts_with(body));
        }
    }
}
