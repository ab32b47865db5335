//! JSON run report.
//!
//! Each region run leaves a pretty-printed [`RunReport`] next to its CSV
//! table, overwritten on every run.

use crate::error::ScrapeError;
use crate::models::RunReport;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `report` to `path` as pretty JSON, creating parent directories.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report(report: &RunReport, path: &Path) -> Result<(), ScrapeError> {
    let json = serde_json::to_string_pretty(report)?;

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(path, json).await?;
    info!("Wrote run report");
    Ok(())
}

/// Read a report written by [`write_report`].
#[cfg(test)]
pub async fn read_report(path: &Path) -> Result<RunReport, ScrapeError> {
    let json = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_written_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lazio/report.json");

        let mut report = RunReport::new("Lazio");
        report.pages_fetched = 4;
        report.downloaded = 37;
        write_report(&report, &path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"region\": \"Lazio\""));

        let back = read_report(&path).await.unwrap();
        assert_eq!(back.pages_fetched, 4);
        assert_eq!(back.downloaded, 37);
    }
}
