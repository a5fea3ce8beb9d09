//! Text normalization and tokenization.
//!
//! Everything the pipeline compares — question tokens, catalog keywords,
//! synonyms, intent vocabularies — goes through the same two steps:
//!
//! 1. Unicode NFD decomposition with combining marks stripped ("últimos" →
//!    "ultimos"), then lowercasing.
//! 2. Tokenization into alphanumeric runs of length ≥ 2.
//!
//! Normalization is idempotent: stripping marks from already-stripped text is
//! a no-op, and lowercasing is stable.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]{2,}").expect("valid regex"));

/// Strip accents (combining marks after NFD) and lowercase.
pub fn unaccent_lower(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Tokenize into normalized alphanumeric runs of length ≥ 2, in order,
/// repeats preserved.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = unaccent_lower(text);
    TOKEN_RE
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Tokenize every value in a list and concatenate the results.
pub fn tokenize_all<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for v in values {
        out.extend(tokenize(v.as_ref()));
    }
    out
}
