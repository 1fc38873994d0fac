// src/runner.rs

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{self, RewriteOutcome};
use crate::chapter_index::parse_prefix_number;
use crate::comicinfo::{self, ComicFields, METADATA_NAME};
use crate::matcher::{match_records, ArchiveEntry, MatchBasis, MetadataRecord, Strategy};

/// Where a chapter folder keeps its metadata file. Resolved once per
/// folder, not probed again downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataLayout {
    /// `chapter/ComicInfo.xml`
    Direct,
    /// `chapter/xml/ComicInfo.xml`
    NestedXml,
}

fn resolve_layout(chapter_dir: &Path) -> Option<(MetadataLayout, PathBuf)> {
    let direct = chapter_dir.join(METADATA_NAME);
    if direct.is_file() {
        return Some((MetadataLayout::Direct, direct));
    }
    let nested = chapter_dir.join("xml").join(METADATA_NAME);
    if nested.is_file() {
        return Some((MetadataLayout::NestedXml, nested));
    }
    None
}

/// Options for one matching/rewrite run, supplied by the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub xml_root: PathBuf,
    pub comic_dir: PathBuf,
    pub strategy: Strategy,
    pub threshold: f64,
    pub force: bool,
    pub dry_run: bool,
}

/// Per-archive outcome in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemOutcome {
    Applied,
    SkippedExists,
    SkippedDryRun,
    Failed(String),
}

impl From<RewriteOutcome> for ItemOutcome {
    fn from(o: RewriteOutcome) -> Self {
        match o {
            RewriteOutcome::Applied => ItemOutcome::Applied,
            RewriteOutcome::SkippedExists => ItemOutcome::SkippedExists,
            RewriteOutcome::SkippedDryRun => ItemOutcome::SkippedDryRun,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedItem {
    pub title: String,
    pub folder: String,
    pub archive: String,
    pub score: f64,
    pub basis: MatchBasis,
    pub index_exact: bool,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnmatchedRecord {
    pub title: String,
    pub folder: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFolder {
    pub folder: String,
    pub reason: String,
}

/// Fully enumerated result of one run, usable both as a dry-run preview
/// and as a post-hoc audit record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub matched: Vec<MatchedItem>,
    pub unmatched_records: Vec<UnmatchedRecord>,
    pub unmatched_entries: Vec<String>,
    pub skipped_folders: Vec<SkippedFolder>,
}

impl Report {
    pub fn applied(&self) -> usize {
        self.matched
            .iter()
            .filter(|m| m.outcome == ItemOutcome::Applied)
            .count()
    }
}

/// Walks the metadata root and parses one record per chapter folder.
/// Folders without a readable ComicInfo.xml (either layout) or without a
/// usable Title are collected as skipped, never fatal.
fn discover_records(xml_root: &Path) -> Result<(Vec<MetadataRecord>, Vec<SkippedFolder>)> {
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    let mut chapter_dirs: Vec<PathBuf> = fs::read_dir(xml_root)
        .with_context(|| format!("listing {}", xml_root.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    chapter_dirs.sort();

    for chapter_dir in chapter_dirs {
        let folder_name = chapter_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some((layout, xml_path)) = resolve_layout(&chapter_dir) else {
            skipped.push(SkippedFolder {
                folder: folder_name,
                reason: "no ComicInfo.xml in either layout".to_string(),
            });
            continue;
        };
        debug!("{}: metadata layout {:?}", folder_name, layout);
        let xml_bytes = match fs::read(&xml_path) {
            Ok(b) => b,
            Err(e) => {
                skipped.push(SkippedFolder {
                    folder: folder_name,
                    reason: format!("unreadable {}: {}", xml_path.display(), e),
                });
                continue;
            }
        };
        let Some(title) = comicinfo::read_title(&xml_bytes) else {
            skipped.push(SkippedFolder {
                folder: folder_name,
                reason: "malformed XML or empty Title".to_string(),
            });
            continue;
        };
        records.push(MetadataRecord::new(xml_path, &folder_name, &title, xml_bytes));
    }
    Ok((records, skipped))
}

/// Lists chapter archives directly under `comic_dir`, sorted by file
/// name so scores that tie resolve the same way on every run.
fn list_entries(comic_dir: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(comic_dir)
        .with_context(|| format!("listing {}", comic_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_archive_ext(p))
        .collect();
    paths.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

    let mut entries = Vec::new();
    for path in paths {
        let has_comicinfo = match archive::has_comicinfo(&path) {
            Ok(v) => v,
            Err(e) => {
                // Corrupt container: still listed so the rewrite step can
                // report it per-item instead of dropping it silently.
                warn!("{}: {:#}", path.display(), e);
                false
            }
        };
        entries.push(ArchiveEntry::new(path, has_comicinfo));
    }
    Ok(entries)
}

fn is_archive_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            e == "zip" || e == "cbz"
        })
        .unwrap_or(false)
}

/// Matches every scraped ComicInfo.xml under `xml_root` against the
/// archives in `comic_dir` and rewrites each matched archive. One bad
/// archive never aborts the batch; its failure lands in the report.
pub fn run(opts: &RunOptions) -> Result<Report> {
    if !(0.0..=1.0).contains(&opts.threshold) {
        bail!("threshold must be within [0, 1], got {}", opts.threshold);
    }
    if !opts.xml_root.is_dir() {
        bail!("metadata root does not exist: {}", opts.xml_root.display());
    }
    if !opts.comic_dir.is_dir() {
        bail!("archive directory does not exist: {}", opts.comic_dir.display());
    }

    if !opts.dry_run {
        archive::sweep_stale_staging(&opts.comic_dir)?;
    }

    let (records, skipped_folders) = discover_records(&opts.xml_root)?;
    let entries = list_entries(&opts.comic_dir)?;
    info!(
        "found {} metadata records, {} archives",
        records.len(),
        entries.len()
    );

    let assignment = match_records(&records, &entries, opts.strategy, opts.threshold)?;

    let mut matched = Vec::new();
    for pair in &assignment.pairs {
        let record = &records[pair.record];
        let entry = &entries[pair.entry];
        let archive_name = entry
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "matched ({:.2}, by {:?}): '{}' | '{}' -> {}",
            pair.score, pair.basis, record.title_key.raw, record.folder_key.raw, archive_name
        );
        let outcome =
            match archive::update_archive(&entry.path, &record.xml_bytes, opts.force, opts.dry_run)
            {
                Ok(o) => ItemOutcome::from(o),
                Err(e) => {
                    warn!("failed to update {}: {:#}", archive_name, e);
                    ItemOutcome::Failed(format!("{:#}", e))
                }
            };
        matched.push(MatchedItem {
            title: record.title_key.raw.clone(),
            folder: record.folder_key.raw.clone(),
            archive: archive_name,
            score: pair.score,
            basis: pair.basis,
            index_exact: pair.index_exact,
            outcome,
        });
    }

    let unmatched_records = assignment
        .unmatched_records
        .iter()
        .map(|&i| UnmatchedRecord {
            title: records[i].title_key.raw.clone(),
            folder: records[i].folder_key.raw.clone(),
        })
        .collect();
    let unmatched_entries = assignment
        .unmatched_entries
        .iter()
        .map(|&i| {
            entries[i]
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();

    Ok(Report {
        matched,
        unmatched_records,
        unmatched_entries,
        skipped_folders,
    })
}

/// Outcome of one folder in the renumber pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumberOutcome {
    Updated,
    Unchanged,
    SkippedDryRun,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct NumberItem {
    pub folder: String,
    pub number: String,
    pub outcome: NumberOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NumberReport {
    pub items: Vec<NumberItem>,
    pub skipped_folders: Vec<SkippedFolder>,
}

/// Sets each chapter's `<Number>` from its folder's zero-padded numeric
/// prefix ("001-第01卷" writes Number 001). Folders are processed in
/// prefix order; prefixless folders sort last and are skipped.
pub fn renumber(manga_dir: &Path, dry_run: bool) -> Result<NumberReport> {
    if !manga_dir.is_dir() {
        bail!("manga directory does not exist: {}", manga_dir.display());
    }

    let mut chapter_dirs: Vec<PathBuf> = fs::read_dir(manga_dir)
        .with_context(|| format!("listing {}", manga_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    chapter_dirs.sort_by_key(|p| {
        let folder = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match parse_prefix_number(&folder).and_then(|n| n.parse::<u64>().ok()) {
            Some(n) => (0, n, folder),
            None => (1, 0, folder),
        }
    });

    let mut report = NumberReport::default();
    for chapter_dir in chapter_dirs {
        let folder = chapter_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(prefix) = parse_prefix_number(&folder).map(|s| s.to_string()) else {
            report.skipped_folders.push(SkippedFolder {
                folder,
                reason: "no numeric prefix".to_string(),
            });
            continue;
        };
        let Some((_, xml_path)) = resolve_layout(&chapter_dir) else {
            report.skipped_folders.push(SkippedFolder {
                folder,
                reason: "no ComicInfo.xml in either layout".to_string(),
            });
            continue;
        };

        let outcome = renumber_one(&xml_path, &prefix, dry_run);
        if let NumberOutcome::Failed(ref reason) = outcome {
            warn!("{}: {}", folder, reason);
        } else {
            info!("Number -> {}: {}", prefix, xml_path.display());
        }
        report.items.push(NumberItem {
            folder,
            number: prefix,
            outcome,
        });
    }
    Ok(report)
}

fn renumber_one(xml_path: &Path, number: &str, dry_run: bool) -> NumberOutcome {
    let xml_bytes = match fs::read(xml_path) {
        Ok(b) => b,
        Err(e) => return NumberOutcome::Failed(format!("unreadable: {}", e)),
    };
    if comicinfo::read_number(&xml_bytes).as_deref() == Some(number) {
        return NumberOutcome::Unchanged;
    }
    let updated = match comicinfo::set_number(&xml_bytes, number) {
        Ok(b) => b,
        Err(e) => return NumberOutcome::Failed(format!("{:#}", e)),
    };
    if dry_run {
        return NumberOutcome::SkippedDryRun;
    }
    match fs::write(xml_path, updated) {
        Ok(()) => NumberOutcome::Updated,
        Err(e) => NumberOutcome::Failed(format!("write failed: {}", e)),
    }
}

/// One archive in the audit listing.
#[derive(Debug, Clone, Serialize)]
pub struct ScanItem {
    pub file: String,
    pub has_comicinfo: bool,
    pub fields: ComicFields,
}

/// Recursively lists archives under `root` with the descriptive fields
/// of their embedded metadata, for audit output. Read-only.
pub fn scan(root: &Path) -> Result<Vec<ScanItem>> {
    if !root.is_dir() {
        bail!("directory does not exist: {}", root.display());
    }
    let mut items = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_archive_ext(entry.path()) {
            continue;
        }
        let file = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        match archive::read_comicinfo(entry.path()) {
            Ok(Some(bytes)) => items.push(ScanItem {
                file,
                has_comicinfo: true,
                fields: comicinfo::read_fields(&bytes),
            }),
            Ok(None) => items.push(ScanItem {
                file,
                has_comicinfo: false,
                fields: ComicFields::default(),
            }),
            Err(e) => {
                warn!("{}: {:#}", file, e);
                items.push(ScanItem {
                    file,
                    has_comicinfo: false,
                    fields: ComicFields::default(),
                });
            }
        }
    }
    Ok(items)
}
