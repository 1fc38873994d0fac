// src/matcher.rs

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::chapter_index::{classify_unit, parse_index, ChapterIndex, UnitKind};
use crate::normalize::normalize;

/// Which textual signal similarity scoring runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Title,
    Folder,
    Both,
}

impl Strategy {
    fn bases(&self) -> &'static [MatchBasis] {
        match self {
            Strategy::Title => &[MatchBasis::Title],
            Strategy::Folder => &[MatchBasis::Folder],
            Strategy::Both => &[MatchBasis::Title, MatchBasis::Folder],
        }
    }
}

/// The signal that produced a winning score. `Title` sorts first and
/// wins score ties, see `match_records`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchBasis {
    Title,
    Folder,
}

/// Comparison signals derived once from a raw name: the normalized key,
/// the counting unit and the numeric chapter index, when present.
#[derive(Debug, Clone)]
pub struct MatchKey {
    pub raw: String,
    pub norm: String,
    pub unit: UnitKind,
    pub index: Option<ChapterIndex>,
}

impl MatchKey {
    pub fn new(raw: &str) -> Self {
        MatchKey {
            raw: raw.to_string(),
            norm: normalize(raw),
            unit: classify_unit(raw),
            index: parse_index(raw),
        }
    }
}

/// One parsed ComicInfo.xml waiting to be paired with an archive.
#[derive(Debug, Clone)]
pub struct MetadataRecord {
    pub xml_path: PathBuf,
    pub xml_bytes: Vec<u8>,
    pub title_key: MatchKey,
    pub folder_key: MatchKey,
}

impl MetadataRecord {
    pub fn new(xml_path: PathBuf, folder_name: &str, title: &str, xml_bytes: Vec<u8>) -> Self {
        MetadataRecord {
            xml_path,
            xml_bytes,
            title_key: MatchKey::new(title),
            folder_key: MatchKey::new(folder_name),
        }
    }

    /// The record's counting unit. The title is authoritative; when it
    /// carries no marker, the chapter folder name decides. A record is
    /// one chapter, so it has one unit however many names it goes by.
    pub fn unit(&self) -> UnitKind {
        if self.title_key.unit != UnitKind::Unknown {
            self.title_key.unit
        } else {
            self.folder_key.unit
        }
    }
}

/// One physical chapter archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub key: MatchKey,
    pub has_comicinfo: bool,
}

impl ArchiveEntry {
    pub fn new(path: PathBuf, has_comicinfo: bool) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        ArchiveEntry {
            path,
            key: MatchKey::new(&stem),
            has_comicinfo,
        }
    }
}

/// An accepted (record, entry) pairing. Indices are stable positions in
/// the input slices.
#[derive(Debug, Clone, Serialize)]
pub struct MatchPair {
    pub record: usize,
    pub entry: usize,
    pub score: f64,
    pub basis: MatchBasis,
    pub index_exact: bool,
}

/// The resolved one-to-one mapping. Every record and entry index appears
/// in at most one pair; the rest are listed explicitly.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Assignment {
    pub pairs: Vec<MatchPair>,
    pub unmatched_records: Vec<usize>,
    pub unmatched_entries: Vec<usize>,
}

/// Scores one (query, candidate) key pair, or `None` when the pair is
/// disqualified outright:
/// - record and entry units both known but different (a volume never
///   pairs with an episode, whatever the text says); the record's unit
///   is passed in as `query_unit` since it spans both of its names;
/// - both sides carry a numeric index and the positions disagree
///   (104 vs 104.2 is a different chapter, not a near-miss).
///
/// Normalized-equal names score 1.0; agreeing indices raise the score to
/// at least 0.99 ("index-exact"); everything else falls back to fuzzy
/// similarity of the normalized keys.
fn score_pair(query: &MatchKey, query_unit: UnitKind, cand: &MatchKey) -> Option<(f64, bool)> {
    if query_unit != UnitKind::Unknown
        && cand.unit != UnitKind::Unknown
        && query_unit != cand.unit
    {
        return None;
    }

    let mut score = if !query.norm.is_empty() && query.norm == cand.norm {
        1.0
    } else {
        0.0
    };
    let mut index_exact = false;

    match (query.index, cand.index) {
        (Some(q), Some(c)) => {
            if q.same_position(&c) {
                index_exact = true;
                if score < 0.99 {
                    score = 0.99;
                }
            } else {
                return None;
            }
        }
        _ => {
            if score < 1.0 {
                score = strsim::normalized_levenshtein(&query.norm, &cand.norm);
            }
        }
    }

    if score > 0.0 {
        Some((score, index_exact))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    record: usize,
    entry: usize,
    score: f64,
    basis: MatchBasis,
    index_exact: bool,
}

/// Resolves records against entries into a unique one-to-one assignment.
///
/// All surviving candidates are ranked globally (score descending, then
/// index-exact pairs, then Title over Folder, then input order) and
/// accepted greedily while both endpoints are free and the score clears
/// `threshold`. Greedy-by-score is deliberate over optimal bipartite
/// assignment: the unit and index hard filters already remove nearly all
/// false candidates, and the greedy pass is deterministic and easy to
/// audit.
pub fn match_records(
    records: &[MetadataRecord],
    entries: &[ArchiveEntry],
    strategy: Strategy,
    threshold: f64,
) -> Result<Assignment> {
    if !(0.0..=1.0).contains(&threshold) {
        bail!("threshold must be within [0, 1], got {}", threshold);
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    for (ri, record) in records.iter().enumerate() {
        for (ei, entry) in entries.iter().enumerate() {
            // Under Both, the better basis survives per pair; Title wins
            // exact ties.
            let mut best: Option<Candidate> = None;
            for &basis in strategy.bases() {
                let query = match basis {
                    MatchBasis::Title => &record.title_key,
                    MatchBasis::Folder => &record.folder_key,
                };
                if let Some((score, index_exact)) = score_pair(query, record.unit(), &entry.key) {
                    let cand = Candidate {
                        record: ri,
                        entry: ei,
                        score,
                        basis,
                        index_exact,
                    };
                    let better = match best {
                        None => true,
                        Some(b) => score > b.score,
                    };
                    if better {
                        best = Some(cand);
                    }
                }
            }
            if let Some(cand) = best {
                candidates.push(cand);
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.index_exact.cmp(&a.index_exact))
            .then_with(|| a.basis.cmp(&b.basis))
            .then_with(|| a.record.cmp(&b.record))
            .then_with(|| a.entry.cmp(&b.entry))
    });

    let mut record_taken = vec![false; records.len()];
    let mut entry_taken = vec![false; entries.len()];
    let mut pairs = Vec::new();
    for cand in candidates {
        if cand.score < threshold || record_taken[cand.record] || entry_taken[cand.entry] {
            continue;
        }
        record_taken[cand.record] = true;
        entry_taken[cand.entry] = true;
        pairs.push(MatchPair {
            record: cand.record,
            entry: cand.entry,
            score: cand.score,
            basis: cand.basis,
            index_exact: cand.index_exact,
        });
    }

    let unmatched_records = (0..records.len()).filter(|&i| !record_taken[i]).collect();
    let unmatched_entries = (0..entries.len()).filter(|&i| !entry_taken[i]).collect();
    Ok(Assignment {
        pairs,
        unmatched_records,
        unmatched_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn record(folder: &str, title: &str) -> MetadataRecord {
        MetadataRecord::new(
            PathBuf::from(format!("/meta/{}/ComicInfo.xml", folder)),
            folder,
            title,
            Vec::new(),
        )
    }

    fn entry(file_name: &str) -> ArchiveEntry {
        ArchiveEntry::new(PathBuf::from(format!("/comic/{}", file_name)), false)
    }

    #[test]
    fn test_folder_strategy_matches_identical_names() {
        let records = vec![
            record("001-第01卷", "Foo Vol1"),
            record("002-第02卷", "Foo Vol2"),
        ];
        let entries = vec![entry("001-第01卷.cbz"), entry("002-第02卷.cbz")];

        let a = match_records(&records, &entries, Strategy::Folder, 0.6).unwrap();
        assert_eq!(a.pairs.len(), 2);
        assert!(a.unmatched_records.is_empty());
        assert!(a.unmatched_entries.is_empty());
        for p in &a.pairs {
            assert_eq!(p.record, p.entry);
            assert_eq!(p.basis, MatchBasis::Folder);
            assert_eq!(p.score, 1.0);
        }
    }

    #[test]
    fn test_unit_hard_filter_beats_threshold_zero() {
        // Special-unit archive vs volume-unit record with otherwise
        // identical text: excluded even with the threshold wide open.
        let records = vec![record("012-第12卷", "012 第12卷")];
        let entries = vec![entry("012_特典.cbz")];

        let a = match_records(&records, &entries, Strategy::Both, 0.0).unwrap();
        assert!(a.pairs.is_empty());
        assert_eq!(a.unmatched_records, vec![0]);
        assert_eq!(a.unmatched_entries, vec![0]);
    }

    #[test]
    fn test_record_unit_falls_back_to_folder() {
        // Title carries no unit marker; the folder's volume marker still
        // blocks pairing with a special-unit archive sharing the number.
        let records = vec![record("012-第12卷", "天漫浮世錄 012")];
        let entries = vec![entry("012_特典.cbz")];

        let a = match_records(&records, &entries, Strategy::Both, 0.0).unwrap();
        assert!(a.pairs.is_empty());
    }

    #[test]
    fn test_index_exact_bonus_over_weak_text() {
        let records = vec![record("連載第093_2話_24p", "第093.2話")];
        let entries = vec![entry("完全不同的名字 093.2.cbz")];

        let a = match_records(&records, &entries, Strategy::Both, 0.6).unwrap();
        assert_eq!(a.pairs.len(), 1);
        assert!(a.pairs[0].index_exact);
        assert!(a.pairs[0].score >= 0.99);
    }

    #[test]
    fn test_sub_chapter_mismatch_disqualifies() {
        // 104 vs 104.2 must never pair, even at threshold 0.
        let records = vec![record("第104話", "第104話")];
        let entries = vec![entry("第104.2話.cbz")];

        let a = match_records(&records, &entries, Strategy::Both, 0.0).unwrap();
        assert!(a.pairs.is_empty());
    }

    #[test]
    fn test_one_to_one_never_reuses_an_archive() {
        // Two records both closest to the same archive: only one wins,
        // the other stays unmatched rather than doubling up.
        let records = vec![record("第005話 雨", "第005話 雨"), record("第005話 雪", "第005話 雪")];
        let entries = vec![entry("第005話 雨.cbz")];

        let a = match_records(&records, &entries, Strategy::Both, 0.3).unwrap();
        assert_eq!(a.pairs.len(), 1);
        assert_eq!(a.pairs[0].record, 0);
        assert_eq!(a.unmatched_records, vec![1]);
    }

    #[test]
    fn test_invalid_threshold_is_config_error() {
        assert!(match_records(&[], &[], Strategy::Both, -0.1).is_err());
        assert!(match_records(&[], &[], Strategy::Both, 1.5).is_err());
    }

    #[test]
    fn test_empty_inputs_yield_empty_assignment() {
        let a = match_records(&[], &[], Strategy::Both, 0.6).unwrap();
        assert!(a.pairs.is_empty());
        assert!(a.unmatched_records.is_empty());
        assert!(a.unmatched_entries.is_empty());

        let a = match_records(&[record("001", "x")], &[], Strategy::Both, 0.6).unwrap();
        assert!(a.pairs.is_empty());
        assert_eq!(a.unmatched_records, vec![0]);
    }

    #[test]
    fn test_assignment_is_unique_both_ways_over_generated_pools() {
        // Deterministic pseudo-random pools; every run must keep the
        // one-to-one invariant at a permissive threshold.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for round in 0..20 {
            let n_records = (next() % 12) as usize;
            let n_entries = (next() % 12) as usize;
            let records: Vec<MetadataRecord> = (0..n_records)
                .map(|_| {
                    let main = next() % 20;
                    record(
                        &format!("{:03}-第{:02}話", main, main),
                        &format!("series{} 第{}話", round, main),
                    )
                })
                .collect();
            let entries: Vec<ArchiveEntry> = (0..n_entries)
                .map(|_| {
                    let main = next() % 20;
                    entry(&format!("{:03}-第{:02}話.cbz", main, main))
                })
                .collect();

            let a = match_records(&records, &entries, Strategy::Both, 0.1).unwrap();
            let mut seen_r = HashSet::new();
            let mut seen_e = HashSet::new();
            for p in &a.pairs {
                assert!(seen_r.insert(p.record), "record matched twice");
                assert!(seen_e.insert(p.entry), "entry matched twice");
            }
            // Unmatched lists account for exactly the leftovers.
            assert_eq!(a.pairs.len() + a.unmatched_records.len(), records.len());
            assert_eq!(a.pairs.len() + a.unmatched_entries.len(), entries.len());
        }
    }

    #[test]
    fn test_deterministic_tie_break_prefers_input_order() {
        // Two entries equally similar to one record: the earlier entry
        // wins, and repeated runs agree.
        let records = vec![record("第010話", "第010話")];
        let entries = vec![entry("第010話 a.cbz"), entry("第010話 b.cbz")];

        let first = match_records(&records, &entries, Strategy::Both, 0.5).unwrap();
        let second = match_records(&records, &entries, Strategy::Both, 0.5).unwrap();
        assert_eq!(first.pairs[0].entry, 0);
        assert_eq!(second.pairs[0].entry, 0);
    }
}
