// src/chapter_index.rs

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Unit a chapter name is counted in: bound volumes (卷), serialized
/// episodes (回/話/话) or extras (特典/番外). `Unknown` means the name
/// carried no recognizable marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Volume,
    Episode,
    Special,
    Unknown,
}

/// A chapter's ordinal position extracted from a folder name or title,
/// e.g. "连载第093.2話" -> episode 93 sub 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChapterIndex {
    pub unit: UnitKind,
    pub main: u32,
    pub sub: Option<u32>,
    /// Digit count of the main token as written ("093" -> 3). Preserved
    /// so the renumber pass can keep the original zero fill; matching
    /// never looks at it.
    pub pad: usize,
}

impl ChapterIndex {
    /// True when two indices point at the same chapter position (unit
    /// aside): main and sub must both agree, including sub being absent
    /// on both sides.
    pub fn same_position(&self, other: &ChapterIndex) -> bool {
        self.main == other.main && self.sub == other.sub
    }
}

lazy_static! {
    // Page-count suffixes like "_24p" / " 24P" confuse the numeric scan.
    static ref PAGE_COUNT: Regex = Regex::new(r"(?i)[-_\s]\d{1,4}p\b").unwrap();

    // First pattern that hits wins. Main numbers are capped at four
    // digits so year-like strings never parse as chapter 2025.
    static ref INDEX_PATTERNS: Vec<(&'static str, Regex)> = vec![
        // 连载第093.2話 / 第093_2话 / 093-2話
        (
            "sub-with-marker",
            Regex::new(r"[第连載载]?\s*(\d{1,4})[._\-＿\s]+(\d{1,2})\s*[話话]").unwrap(),
        ),
        // bare sub-chapter: 093.2 / 093_2 / 093-2, sub not running into
        // further digits
        (
            "sub-bare",
            Regex::new(r"[第连載载]?\s*(\d{1,4})[._\-＿\s]+(\d{1,2})(?:\D|$)").unwrap(),
        ),
        // main only with marker: 第093話 / 连载第093话 / 093話
        (
            "main-with-marker",
            Regex::new(r"[第连載载]?\s*(\d{1,4})\s*[話话]").unwrap(),
        ),
        // looser fallback: first digit run in the string, at most four
        // digits long
        (
            "leading-digits",
            Regex::new(r"^\D*?(\d{1,4})(?:\D|$)").unwrap(),
        ),
    ];

    static ref VOLUME_MARK: Regex = Regex::new(r"卷").unwrap();
    static ref EPISODE_MARK: Regex = Regex::new(r"[回話话]").unwrap();
    static ref SPECIAL_MARK: Regex = Regex::new(r"特典|特別|特别|番外|\bSP\b").unwrap();

    // Numeric folder prefix for the renumber pass: "001-第01卷" -> "001",
    // "12_特典" -> "12". The loose form catches prefixes glued straight
    // onto text.
    static ref PREFIX_FULL: Regex = Regex::new(r"^(\d+)(?:[-_\s].*)?$").unwrap();
    static ref PREFIX_LOOSE: Regex = Regex::new(r"^(\d+)").unwrap();
}

/// Classifies which unit a name counts in. Extras are checked before the
/// volume/episode markers so "第12話 特典" lands on `Special`.
pub fn classify_unit(text: &str) -> UnitKind {
    if SPECIAL_MARK.is_match(text) {
        UnitKind::Special
    } else if VOLUME_MARK.is_match(text) {
        UnitKind::Volume
    } else if EPISODE_MARK.is_match(text) {
        UnitKind::Episode
    } else {
        UnitKind::Unknown
    }
}

/// Extracts a chapter index from a folder name or title. Returns `None`
/// when no number can be read reliably; this function never errors.
pub fn parse_index(name: &str) -> Option<ChapterIndex> {
    let cleaned = PAGE_COUNT.replace_all(name, " ");
    for (_pat_name, pat) in INDEX_PATTERNS.iter() {
        if let Some(caps) = pat.captures(&cleaned) {
            let main_tok = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let main: u32 = match main_tok.parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let sub = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
            return Some(ChapterIndex {
                unit: classify_unit(name),
                main,
                sub,
                pad: main_tok.len(),
            });
        }
    }
    None
}

/// Numeric prefix of a chapter folder name with its zero fill intact,
/// e.g. "001-第01卷" -> "001". Used to write back `<Number>`.
pub fn parse_prefix_number(folder_name: &str) -> Option<&str> {
    if let Some(caps) = PREFIX_FULL.captures(folder_name) {
        return caps.get(1).map(|m| m.as_str());
    }
    PREFIX_LOOSE
        .captures(folder_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(name: &str) -> ChapterIndex {
        parse_index(name).expect(name)
    }

    #[test]
    fn test_sub_chapter_with_marker() {
        let i = idx("第093.2話");
        assert_eq!((i.main, i.sub), (93, Some(2)));
        assert_eq!(i.unit, UnitKind::Episode);
        assert_eq!(i.pad, 3);
    }

    #[test]
    fn test_sub_chapter_with_page_count_noise() {
        let i = idx("连载第093_2話_24p");
        assert_eq!((i.main, i.sub), (93, Some(2)));
    }

    #[test]
    fn test_main_only_forms() {
        assert_eq!((idx("第093話").main, idx("第093話").sub), (93, None));
        assert_eq!(idx("连载第093话").main, 93);
        assert_eq!((idx("093-2").main, idx("093-2").sub), (93, Some(2)));
    }

    #[test]
    fn test_leading_digit_fallback() {
        let i = idx("012_特典");
        assert_eq!((i.main, i.sub), (12, None));
        assert_eq!(i.unit, UnitKind::Special);
        assert_eq!(i.pad, 3);
    }

    #[test]
    fn test_volume_folder() {
        let i = idx("001-第01卷");
        assert_eq!(i.unit, UnitKind::Volume);
        assert_eq!(i.main, 1);
        assert_eq!(i.pad, 3);
    }

    #[test]
    fn test_no_digits_yields_none() {
        assert!(parse_index("特別收録").is_none());
        assert!(parse_index("描き下ろし").is_none());
        assert!(parse_index("").is_none());
    }

    #[test]
    fn test_long_digit_runs_rejected() {
        // Date-like strings must not parse as chapter numbers.
        assert!(parse_index("20250101").is_none());
    }

    #[test]
    fn test_classify_unit() {
        assert_eq!(classify_unit("第3卷"), UnitKind::Volume);
        assert_eq!(classify_unit("第12話"), UnitKind::Episode);
        assert_eq!(classify_unit("第12回"), UnitKind::Episode);
        assert_eq!(classify_unit("012_特典"), UnitKind::Special);
        assert_eq!(classify_unit("番外 第2話"), UnitKind::Special);
        assert_eq!(classify_unit("cover gallery"), UnitKind::Unknown);
    }

    #[test]
    fn test_same_position() {
        let a = idx("104");
        let b = idx("104.2");
        assert!(!a.same_position(&b));
        assert!(idx("104.2").same_position(&idx("第104.2話")));
    }

    #[test]
    fn test_parse_prefix_number() {
        assert_eq!(parse_prefix_number("001-第01卷"), Some("001"));
        assert_eq!(parse_prefix_number("12_特典"), Some("12"));
        assert_eq!(parse_prefix_number("3 第3话"), Some("3"));
        assert_eq!(parse_prefix_number("007"), Some("007"));
        assert_eq!(parse_prefix_number("第3话"), None);
    }
}
