//! Filename sanitizing for on-disk storage.

/// Longest stored filename, in bytes.
pub const MAX_FILENAME_BYTES: usize = 200;

const FALLBACK: &str = "attachment";

const RESERVED_STEMS: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Makes a filename safe to use as a single path component.
///
/// Control, path and reserved characters become `_`, device names are
/// prefixed, and the result is capped at [`MAX_FILENAME_BYTES`] while
/// keeping the extension.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced.trim().trim_end_matches('.').trim_start_matches('.');
    if trimmed.is_empty() {
        return FALLBACK.to_string();
    }

    let mut name = trimmed.to_string();
    let stem = name.split('.').next().unwrap_or_default().to_ascii_lowercase();
    if RESERVED_STEMS.contains(&stem.as_str()) {
        name.insert(0, '_');
    }

    truncate_preserving_extension(&name, MAX_FILENAME_BYTES)
}

/// Makes an identifier safe to use as a directory name.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        truncate_at_boundary(cleaned, MAX_FILENAME_BYTES).to_string()
    }
}

fn truncate_preserving_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() + 2 <= max => {
            let stem = truncate_at_boundary(stem, max - ext.len() - 1);
            format!("{stem}.{ext}")
        }
        _ => truncate_at_boundary(name, max).to_string(),
    }
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn replaces_path_and_control_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("a\u{0}b\nc.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("what?.pdf"), "what_.pdf");
    }

    #[test]
    fn empty_and_dot_names() {
        assert_eq!(sanitize_filename(""), "attachment");
        assert_eq!(sanitize_filename(".."), "attachment");
        assert_eq!(sanitize_filename("   "), "attachment");
    }

    #[test]
    fn reserved_device_names() {
        assert_eq!(sanitize_filename("CON.txt"), "_CON.txt");
        assert_eq!(sanitize_filename("console.txt"), "console.txt");
    }

    #[test]
    fn long_names_keep_extension() {
        let long = format!("{}.pdf", "ä".repeat(150));
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.len() <= MAX_FILENAME_BYTES);
        assert!(sanitized.ends_with(".pdf"));
    }

    #[test]
    fn components() {
        assert_eq!(sanitize_component("user/1"), "user_1");
        assert_eq!(sanitize_component(".."), "unknown");
    }

    proptest! {
        #[test]
        fn sanitized_is_single_bounded_component(name in "\\PC{0,300}") {
            let sanitized = sanitize_filename(&name);
            prop_assert!(!sanitized.is_empty());
            prop_assert!(sanitized.len() <= MAX_FILENAME_BYTES);
            prop_assert!(!sanitized.contains('/'));
            prop_assert!(!sanitized.contains('\\'));
            prop_assert!(sanitized != "." && sanitized != "..");
        }
    }
}
