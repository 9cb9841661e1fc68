//! Helpers for sanitizing data before it is logged or stored.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Same as [`redact_path`] for locations held as strings.
pub fn redact_location(location: &str) -> String {
    redact_path(Path::new(location))
}

/// Strips characters that are unsafe to persist and trims the result.
///
/// Removes C0 controls other than tab, newline and carriage return, DEL,
/// the noncharacters U+FDD0..U+FDEF and U+FFFE/U+FFFF, and the invisible
/// format characters U+200B..U+200F, U+202A..U+202E and U+2060..U+206F.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|&c| !is_unsafe_char(c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_unsafe_char(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => false,
        '\u{00}'..='\u{1F}' | '\u{7F}' => true,
        '\u{FDD0}'..='\u{FDEF}' | '\u{FFFE}' | '\u{FFFF}' => true,
        '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{206F}' => true,
        _ => false,
    }
}
