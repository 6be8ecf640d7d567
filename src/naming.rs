//! Filesystem-safe names for Document directories and output files.

use std::path::{Path, PathBuf};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Name used when a title has no usable characters left.
pub const FALLBACK_NAME: &str = "document";

const RESERVED: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "lpt1", "lpt2", "lpt3",
];

/// Turn a human title into a portable file name component.
///
/// Diacritics are removed (`Élan` → `Elan`), path separators, shell
/// metacharacters and whitespace become `_` (runs collapsed), and the result
/// is capped at `max_len` characters. Applying it to its own output is a
/// no-op.
pub fn safe_name(title: &str, max_len: usize) -> String {
    let folded: String = title.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let mut out = String::with_capacity(folded.len());
    let mut prev_sep = false;
    for ch in folded.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    let capped: String = trimmed.chars().take(max_len).collect();
    let capped = capped.trim_end_matches(|c| c == '_' || c == '.').to_string();

    if capped.is_empty() {
        return FALLBACK_NAME.to_string();
    }
    if RESERVED.contains(&capped.to_ascii_lowercase().as_str()) {
        return format!("{capped}_");
    }
    capped
}

/// Directory holding the units and output of the Document titled `title`.
pub fn document_dir(output_root: &Path, title: &str, max_len: usize) -> PathBuf {
    output_root.join(safe_name(title, max_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_diacritics() {
        assert_eq!(safe_name("Élan vital: Über Café", 120), "Elan_vital_Uber_Cafe");
    }

    #[test]
    fn test_separators_collapse() {
        assert_eq!(safe_name("a / b \\ c?", 120), "a_b_c");
        assert_eq!(safe_name("..hidden", 120), "hidden");
    }

    #[test]
    fn test_length_cap() {
        let name = safe_name(&"x".repeat(300), 50);
        assert_eq!(name.chars().count(), 50);
        assert_eq!(safe_name("abc def", 4), "abc");
    }

    #[test]
    fn test_fallback_and_reserved() {
        assert_eq!(safe_name("???", 120), FALLBACK_NAME);
        assert_eq!(safe_name("", 120), FALLBACK_NAME);
        assert_eq!(safe_name("CON", 120), "CON_");
    }

    #[test]
    fn test_idempotent() {
        for title in ["Élan vital: Über Café", "a / b", "Linear Algebra (3rd ed.)", "CON"] {
            let once = safe_name(title, 120);
            assert_eq!(safe_name(&once, 120), once, "title {title:?}");
        }
    }

    #[test]
    fn test_document_dir() {
        assert_eq!(
            document_dir(Path::new("books"), "Café: Vol. 2", 120),
            Path::new("books/Cafe_Vol._2")
        );
    }

    #[test]
    fn test_keeps_non_latin_letters() {
        assert_eq!(safe_name("数学 入門", 120), "数学_入門");
    }
}
