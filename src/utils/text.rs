pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Single-line, bounded rendering of raw channel bytes for log output.
pub fn preview_bytes(data: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(data);
    let flattened: String = text
        .chars()
        .map(|c| match c {
            '\n' => '⏎',
            c if c.is_control() => '·',
            c => c,
        })
        .collect();
    let truncated = truncate_utf8_prefix(&flattened, max_bytes);
    if truncated.len() < flattened.len() {
        format!("{}…", truncated)
    } else {
        truncated
    }
}

pub fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
