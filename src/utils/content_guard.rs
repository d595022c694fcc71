/// Appended to extracted text cut down to the caller's `maxLength`.
pub const TRUNCATION_NOTICE: &str = "\n\n... [Content truncated due to length]";

/// Safely truncates a UTF-8 string without breaking character boundaries.
/// If `s` is longer than `max` bytes, the result is cut at a char boundary and
/// ends with `suffix`, staying within `max` bytes. When `max` cannot even hold
/// the suffix, the text is cut to `max` bytes without it.
pub fn safe_truncate_utf8(s: &str, max: usize, suffix: &str) -> String {
    if s.len() <= max {
        return s.to_string();
    }

    let budget = if max > suffix.len() { max - suffix.len() } else { max };
    let end = floor_char_boundary(s, budget);

    let mut result = String::with_capacity(end + suffix.len());
    result.push_str(&s[..end]);
    if max > suffix.len() {
        result.push_str(suffix);
    }
    result
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Limits extracted document text for a tool response.
pub fn limit_extracted_text(text: &str, max_length: Option<usize>) -> String {
    match max_length {
        Some(max) => safe_truncate_utf8(text, max, TRUNCATION_NOTICE),
        None => text.to_string(),
    }
}
