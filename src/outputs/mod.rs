//! Writing harvest results to disk.
//!
//! # Submodules
//!
//! - [`csv`]: the per-region table of records, plus a reader for the same schema
//! - [`json`]: the per-region run report
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! └── emilia_romagna/
//!     ├── emilia_romagna_laws.csv
//!     ├── report.json
//!     └── pdfs/
//!         ├── Emilia-Romagna_11_2022-07-20.pdf
//!         └── Emilia-Romagna_Unknown_0000-00-00.pdf
//! ```

pub mod csv;
pub mod json;

use std::path::{Path, PathBuf};

/// Every path a region run writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionPaths {
    pub dir: PathBuf,
    pub csv: PathBuf,
    pub report: PathBuf,
    pub pdfs: PathBuf,
}

impl RegionPaths {
    pub fn new(output_dir: &Path, slug: &str) -> Self {
        let dir = output_dir.join(slug);
        Self {
            csv: dir.join(format!("{slug}_laws.csv")),
            report: dir.join("report.json"),
            pdfs: dir.join("pdfs"),
            dir,
        }
    }
}
