// src/archive.rs

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::comicinfo::METADATA_NAME;

/// Prefix for staged replacement archives. Left-over files with this
/// prefix come from an interrupted run and are swept by the next scan.
pub const STAGING_PREFIX: &str = "tmp_update_";

/// Outcome of one archive rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteOutcome {
    Applied,
    SkippedExists,
    SkippedDryRun,
}

fn is_metadata_entry(name: &str) -> bool {
    name.eq_ignore_ascii_case(METADATA_NAME)
}

/// Whether the archive already carries a ComicInfo.xml at its root
/// (matched case-insensitively, as sources disagree on casing).
pub fn has_comicinfo(path: &Path) -> Result<bool> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let archive =
        ZipArchive::new(file).with_context(|| format!("reading zip {}", path.display()))?;
    let has = archive.file_names().any(is_metadata_entry);
    Ok(has)
}

/// Reads the embedded ComicInfo.xml, or `None` when the archive has no
/// metadata entry. An exact-case entry wins over a case-folded one.
pub fn read_comicinfo(path: &Path) -> Result<Option<Vec<u8>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("reading zip {}", path.display()))?;
    let name = archive
        .file_names()
        .find(|n| *n == METADATA_NAME)
        .or_else(|| archive.file_names().find(|n| is_metadata_entry(n)))
        .map(|n| n.to_string());
    let Some(name) = name else {
        return Ok(None);
    };
    let mut entry = archive.by_name(&name)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

/// Replaces (or inserts) the ComicInfo.xml entry of `path` with
/// `xml_bytes`.
///
/// The replacement archive is staged as a temporary file next to the
/// original and renamed over it only once fully written, so a crash or
/// I/O failure mid-way never leaves the original truncated. Existing
/// metadata is preserved unless `force` is set; `dry_run` reports the
/// decision without touching the filesystem.
pub fn update_archive(
    path: &Path,
    xml_bytes: &[u8],
    force: bool,
    dry_run: bool,
) -> Result<RewriteOutcome> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("reading zip {}", path.display()))?;
    let has_existing = archive.file_names().any(is_metadata_entry);

    if has_existing && !force {
        debug!("{}: ComicInfo.xml present, not overwriting", path.display());
        return Ok(RewriteOutcome::SkippedExists);
    }
    if dry_run {
        return Ok(RewriteOutcome::SkippedDryRun);
    }

    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let mut staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".zip")
        .tempfile_in(dir)
        .context("creating staging file")?;

    // Failure anywhere below drops `staging`, which removes the temp
    // file and leaves the original archive untouched.
    {
        let mut writer = ZipWriter::new(staging.as_file_mut());
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .with_context(|| format!("reading entry {} of {}", i, path.display()))?;
            if is_metadata_entry(entry.name()) {
                continue;
            }
            // Raw copy keeps the original compressed data byte for byte.
            writer.raw_copy_file(entry)?;
        }
        writer.start_file(
            METADATA_NAME,
            FileOptions::default().compression_method(CompressionMethod::Deflated),
        )?;
        writer.write_all(xml_bytes)?;
        writer.finish()?;
    }

    replace_archive(staging, path)?;
    info!("updated {}", path.display());
    Ok(RewriteOutcome::Applied)
}

fn replace_archive(staging: NamedTempFile, path: &Path) -> Result<()> {
    staging
        .persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Removes staged archives orphaned by an interrupted run.
pub fn sweep_stale_staging(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(STAGING_PREFIX) && entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("removing stale {}", name))?;
            info!("removed stale staging file {}", name);
            removed += 1;
        }
    }
    Ok(removed)
}
