use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cbzinfo::runner::{self, ItemOutcome, NumberOutcome, RunOptions};
use cbzinfo::Strategy;

#[derive(Parser)]
#[command(
    name = "cbzinfo",
    version,
    about = "Match scraped ComicInfo.xml metadata to chapter archives and write it in place"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fuzzy-match ComicInfo.xml files to .cbz/.zip archives and embed them
    Apply {
        /// Directory holding the chapter archives
        comic_dir: PathBuf,
        /// Metadata root with one subfolder per chapter
        xml_root: PathBuf,
        /// Minimum similarity score for an accepted match
        #[arg(long, default_value_t = 0.60)]
        threshold: f64,
        /// Which textual signal to score on
        #[arg(long, value_enum, default_value = "both")]
        strategy: Strategy,
        /// Overwrite a ComicInfo.xml already present in an archive
        #[arg(long)]
        force: bool,
        /// Report what would happen without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Emit the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Set each chapter's <Number> from its folder's numeric prefix
    Number {
        /// Manga directory with one subfolder per chapter
        manga_dir: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// List archives and their embedded metadata fields
    Scan {
        /// Directory to walk for .cbz/.zip files
        root: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Apply {
            comic_dir,
            xml_root,
            threshold,
            strategy,
            force,
            dry_run,
            json,
        } => {
            let report = runner::run(&RunOptions {
                xml_root,
                comic_dir,
                strategy,
                threshold,
                force,
                dry_run,
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render_run_report(&report, dry_run, threshold);
            }
        }
        Command::Number {
            manga_dir,
            dry_run,
            json,
        } => {
            let report = runner::renumber(&manga_dir, dry_run)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render_number_report(&report, dry_run);
            }
        }
        Command::Scan { root, json } => {
            let items = runner::scan(&root)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for item in &items {
                    if item.has_comicinfo {
                        println!(
                            "{}\tTitle='{}' Series='{}' Number='{}'",
                            item.file, item.fields.title, item.fields.series, item.fields.number
                        );
                    } else {
                        println!("{}\t(no ComicInfo.xml)", item.file);
                    }
                }
            }
        }
    }
    Ok(())
}

fn render_run_report(report: &runner::Report, dry_run: bool, threshold: f64) {
    for m in &report.matched {
        let outcome = match &m.outcome {
            ItemOutcome::Applied => "applied".to_string(),
            ItemOutcome::SkippedExists => "skipped (ComicInfo.xml exists, use --force)".to_string(),
            ItemOutcome::SkippedDryRun => "dry-run".to_string(),
            ItemOutcome::Failed(e) => format!("FAILED: {}", e),
        };
        println!(
            "match {:.2} ({:?}): '{}' | '{}' -> {} [{}]",
            m.score, m.basis, m.title, m.folder, m.archive, outcome
        );
    }
    for u in &report.unmatched_records {
        println!("unmatched record: Title='{}' Folder='{}'", u.title, u.folder);
    }
    for name in &report.unmatched_entries {
        println!("unmatched archive: {}", name);
    }
    for s in &report.skipped_folders {
        println!("skipped folder: {} ({})", s.folder, s.reason);
    }
    println!(
        "done: {} matched, {} applied, {} unmatched records, {} unmatched archives, dry-run={}, threshold={:.2}",
        report.matched.len(),
        report.applied(),
        report.unmatched_records.len(),
        report.unmatched_entries.len(),
        dry_run,
        threshold
    );
}

fn render_number_report(report: &runner::NumberReport, dry_run: bool) {
    for item in &report.items {
        let outcome = match &item.outcome {
            NumberOutcome::Updated => "updated".to_string(),
            NumberOutcome::Unchanged => "unchanged".to_string(),
            NumberOutcome::SkippedDryRun => "dry-run".to_string(),
            NumberOutcome::Failed(e) => format!("FAILED: {}", e),
        };
        println!("Number -> {}: {} [{}]", item.number, item.folder, outcome);
    }
    for s in &report.skipped_folders {
        println!("skipped folder: {} ({})", s.folder, s.reason);
    }
    let updated = report
        .items
        .iter()
        .filter(|i| i.outcome == NumberOutcome::Updated)
        .count();
    println!(
        "done: {} folders, {} updated, dry-run={}",
        report.items.len(),
        updated,
        dry_run
    );
}
