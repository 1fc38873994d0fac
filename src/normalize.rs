// src/normalize.rs

use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    // Separator and punctuation runs commonly found in scraped chapter
    // titles and hand-edited folder names, full-width and half-width
    // variants alike.
    static ref STRIP_CHARS: Regex = Regex::new(
        "[\\s\\-_\\[\\]（）()【】{}:：~·•.,，。!！?？'\"`＿]+"
    ).unwrap();
}

/// Canonicalizes a title or folder name into a comparison key: NFC
/// normalization, lowercasing, then removal of whitespace and the
/// separator set above. Total and deterministic; any character outside
/// the strip set passes through unchanged after case folding.
pub fn normalize(s: &str) -> String {
    let folded: String = s.nfc().collect::<String>().to_lowercase();
    STRIP_CHARS.replace_all(&folded, "").into_owned()
}

/// Similarity of two raw strings after normalization, in `[0, 1]`.
pub fn fuzzy_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize(a), &normalize(b))
}
