//! The per-region CSV table.
//!
//! One row per [`LawRecord`], in listing order, written once at the end of
//! the run. The header is always written, so an empty listing produces a
//! header-only file.

use crate::dates::parse_italian_date;
use crate::error::ScrapeError;
use crate::models::{DownloadStatus, Field, LawRecord};
use ::csv::{ReaderBuilder, WriterBuilder};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

/// Column headers, in file order.
pub const HEADERS: [&str; 10] = [
    "Region",
    "Law Title",
    "Law Number",
    "Date",
    "Date ISO",
    "Detail URL",
    "PDF URL",
    "Local Path",
    "Status",
    "Missing",
];

const DATE_ISO: &str = "%Y-%m-%d";

#[derive(Debug, Serialize, Deserialize)]
struct ExportRow {
    #[serde(rename = "Region")]
    region: String,
    #[serde(rename = "Law Title")]
    title: String,
    #[serde(rename = "Law Number")]
    number: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Date ISO")]
    date_iso: String,
    #[serde(rename = "Detail URL")]
    detail_url: String,
    #[serde(rename = "PDF URL")]
    pdf_url: String,
    #[serde(rename = "Local Path")]
    local_path: String,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Missing")]
    missing: String,
}

impl From<&LawRecord> for ExportRow {
    fn from(r: &LawRecord) -> Self {
        ExportRow {
            region: r.region.clone(),
            title: r.title.clone(),
            number: r.act_number.clone(),
            date: r.date_text.clone(),
            date_iso: r
                .publication_date
                .map(|d| d.format(DATE_ISO).to_string())
                .unwrap_or_default(),
            detail_url: r.detail_url.clone().unwrap_or_default(),
            pdf_url: r.pdf_url.clone().unwrap_or_default(),
            local_path: r
                .local_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            status: r.status().to_string(),
            missing: r.missing.iter().join(";"),
        }
    }
}

impl ExportRow {
    fn into_record(self, index: usize) -> Result<LawRecord, ScrapeError> {
        let bad = |what: &str, value: &str| {
            ScrapeError::Config(format!("row {}: invalid {what} `{value}`", index + 1))
        };

        let publication_date = match self.date_iso.trim() {
            "" => parse_italian_date(&self.date),
            iso => Some(NaiveDate::parse_from_str(iso, DATE_ISO).map_err(|_| bad("date", iso))?),
        };
        let status = DownloadStatus::parse(&self.status).ok_or_else(|| bad("status", &self.status))?;
        let missing = self
            .missing
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .map(|s| Field::parse(s).ok_or_else(|| bad("missing field", s)))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(LawRecord::from_parts(
            index,
            self.region,
            self.title,
            self.number,
            self.date,
            publication_date,
            non_empty(self.detail_url),
            non_empty(self.pdf_url),
            non_empty(self.local_path).map(PathBuf::from),
            status,
            missing,
        ))
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Write `records` to `path`, replacing any previous table.
#[instrument(level = "info", skip_all, fields(path = %path.display(), rows = records.len()))]
pub async fn write_records(path: &Path, records: &[LawRecord]) -> Result<(), ScrapeError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(HEADERS)?;
    for record in records {
        writer.serialize(ExportRow::from(record))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ScrapeError::Io(e.into_error()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await?;
    info!("Wrote CSV table");
    Ok(())
}

/// Read a table written by [`write_records`]. Row order becomes the
/// record index.
pub async fn read_records(path: &Path) -> Result<Vec<LawRecord>, ScrapeError> {
    let data = fs::read(path).await?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(data.as_slice());
    reader
        .deserialize::<ExportRow>()
        .enumerate()
        .map(|(i, row)| row.map_err(ScrapeError::from).and_then(|row| row.into_record(i)))
        .collect()
}
