//! Data models for harvested law listings and run summaries.
//!
//! This module defines the core data structures used throughout the application:
//! - [`LawRecord`]: One row of metadata per listing entry on a regional portal
//! - [`DownloadStatus`]: Outcome of the document download for a record
//! - [`Field`]: Metadata fields that may be absent on a portal
//! - [`RunReport`]: Counters and paths summarising one region run

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// A metadata field that can be missing from a listing entry.
///
/// Missing fields are left blank on the record and flagged here, so the
/// exported table shows which values the portal did not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Date,
    Number,
    Link,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Date => "date",
            Field::Number => "number",
            Field::Link => "link",
        }
    }

    pub fn parse(s: &str) -> Option<Field> {
        match s.trim() {
            "title" => Some(Field::Title),
            "date" => Some(Field::Date),
            "number" => Some(Field::Number),
            "link" => Some(Field::Link),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the download stage for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Not yet processed by the downloader.
    #[default]
    Pending,
    /// The PDF was fetched and written during this run.
    Downloaded,
    /// The target file was already on disk and kept (`--skip-existing`).
    Existing,
    /// The entry has no document link, so nothing was attempted.
    NoLink,
    /// A download was attempted and failed.
    Failed,
    /// Downloads were disabled for this run (`--no-download`).
    Skipped,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloaded => "downloaded",
            DownloadStatus::Existing => "existing",
            DownloadStatus::NoLink => "no_link",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<DownloadStatus> {
        match s.trim() {
            "pending" => Some(DownloadStatus::Pending),
            "downloaded" => Some(DownloadStatus::Downloaded),
            "existing" => Some(DownloadStatus::Existing),
            "no_link" => Some(DownloadStatus::NoLink),
            "failed" => Some(DownloadStatus::Failed),
            "skipped" => Some(DownloadStatus::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One legislative act discovered on a regional portal.
///
/// A record is created by the extractor, enriched by the downloader
/// (resolved PDF link, local path, status) and consumed once by the
/// exporter. `local_path` is only ever set through [`LawRecord::mark_stored`],
/// which keeps it paired with a successful status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LawRecord {
    /// Position in portal listing order, counted across pages.
    pub index: usize,
    /// Region display name.
    pub region: String,
    /// Free-text description of the act; blank when missing.
    pub title: String,
    /// Act or issue number as printed by the portal; blank when missing.
    pub act_number: String,
    /// Publication date exactly as printed; blank when missing.
    pub date_text: String,
    /// Parsed publication date.
    pub publication_date: Option<NaiveDate>,
    /// Absolute URL of the act's detail page.
    pub detail_url: Option<String>,
    /// Absolute URL of the PDF, known from the listing or resolved later.
    pub pdf_url: Option<String>,
    local_path: Option<PathBuf>,
    status: DownloadStatus,
    /// Fields the portal did not provide.
    pub missing: BTreeSet<Field>,
}

impl LawRecord {
    pub fn new(index: usize, region: impl Into<String>) -> Self {
        Self {
            index,
            region: region.into(),
            title: String::new(),
            act_number: String::new(),
            date_text: String::new(),
            publication_date: None,
            detail_url: None,
            pdf_url: None,
            local_path: None,
            status: DownloadStatus::Pending,
            missing: BTreeSet::new(),
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    /// Record that the document is stored at `path`.
    ///
    /// `fresh` distinguishes a download made by this run from a file that
    /// was already present and kept.
    pub fn mark_stored(&mut self, path: PathBuf, fresh: bool) {
        self.local_path = Some(path);
        self.status = if fresh {
            DownloadStatus::Downloaded
        } else {
            DownloadStatus::Existing
        };
    }

    /// Set a terminal status that carries no file.
    pub fn mark(&mut self, status: DownloadStatus) {
        debug_assert!(!matches!(
            status,
            DownloadStatus::Downloaded | DownloadStatus::Existing
        ));
        self.local_path = None;
        self.status = status;
    }

    /// Any link that leads to the document, directly or through a detail page.
    pub fn has_link(&self) -> bool {
        self.pdf_url.is_some() || self.detail_url.is_some()
    }

    /// The URL used to identify this entry when deduplicating a listing.
    pub fn link_key(&self) -> Option<&str> {
        self.detail_url.as_deref().or(self.pdf_url.as_deref())
    }

    /// Identity of the entry within a listing: its link, or else its printed
    /// title, number and date. `None` when the entry carries none of them.
    pub fn fingerprint(&self) -> Option<String> {
        if let Some(key) = self.link_key() {
            return Some(key.to_string());
        }
        let parts = [self.title.trim(), self.act_number.trim(), self.date_text.trim()];
        if parts.iter().all(|p| p.is_empty()) {
            return None;
        }
        Some(parts.join("|"))
    }

    /// Recompute the blank-and-flag markers from the current field values.
    pub fn refresh_missing(&mut self) {
        self.missing.clear();
        if self.title.trim().is_empty() {
            self.missing.insert(Field::Title);
        }
        if self.publication_date.is_none() {
            self.missing.insert(Field::Date);
        }
        if self.act_number.trim().is_empty() {
            self.missing.insert(Field::Number);
        }
        if !self.has_link() {
            self.missing.insert(Field::Link);
        }
    }

    /// Rebuild a record from its stored parts (used by the CSV reader).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        index: usize,
        region: String,
        title: String,
        act_number: String,
        date_text: String,
        publication_date: Option<NaiveDate>,
        detail_url: Option<String>,
        pdf_url: Option<String>,
        local_path: Option<PathBuf>,
        status: DownloadStatus,
        missing: BTreeSet<Field>,
    ) -> Self {
        Self {
            index,
            region,
            title,
            act_number,
            date_text,
            publication_date,
            detail_url,
            pdf_url,
            local_path,
            status,
            missing,
        }
    }
}

/// Summary of one region run, written as `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub region: String,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub records: usize,
    pub downloaded: usize,
    pub existing: usize,
    pub failed: usize,
    pub no_link: usize,
    pub skipped: usize,
    pub missing_title: usize,
    pub missing_date: usize,
    pub missing_number: usize,
    pub csv_path: Option<PathBuf>,
}

impl RunReport {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            started_at: Local::now(),
            finished_at: None,
            pages_fetched: 0,
            pages_failed: 0,
            records: 0,
            downloaded: 0,
            existing: 0,
            failed: 0,
            no_link: 0,
            skipped: 0,
            missing_title: 0,
            missing_date: 0,
            missing_number: 0,
            csv_path: None,
        }
    }

    /// Fill the record counters from the final record set.
    pub fn tally(&mut self, records: &[LawRecord]) {
        self.records = records.len();
        self.downloaded = 0;
        self.existing = 0;
        self.failed = 0;
        self.no_link = 0;
        self.skipped = 0;
        self.missing_title = 0;
        self.missing_date = 0;
        self.missing_number = 0;

        for record in records {
            match record.status() {
                DownloadStatus::Downloaded => self.downloaded += 1,
                DownloadStatus::Existing => self.existing += 1,
                DownloadStatus::Failed => self.failed += 1,
                DownloadStatus::NoLink => self.no_link += 1,
                DownloadStatus::Skipped => self.skipped += 1,
                DownloadStatus::Pending => {}
            }
            if record.missing.contains(&Field::Title) {
                self.missing_title += 1;
            }
            if record.missing.contains(&Field::Date) {
                self.missing_date += 1;
            }
            if record.missing.contains(&Field::Number) {
                self.missing_number += 1;
            }
        }
    }
}
