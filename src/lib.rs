pub mod archive;
pub mod chapter_index;
pub mod comicinfo;
pub mod matcher;
pub mod normalize;
pub mod runner;

pub use matcher::{ArchiveEntry, Assignment, MetadataRecord, Strategy};
pub use runner::{renumber, run, scan, Report, RunOptions};
