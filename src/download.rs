//! Locating and storing the PDF of every record.
//!
//! The downloader runs in three passes over the extracted records:
//!
//! 1. **Resolve** (concurrent): find the document source of each record
//!    according to the region's [`PdfRule`], visiting detail pages when the
//!    rule needs them and filling metadata the listing left blank
//! 2. **Name** (sequential): assign file names in listing order, so
//!    collisions are numbered deterministically
//! 3. **Fetch** (concurrent): download or print each document and write it
//!    under its assigned name
//!
//! Both concurrent passes use an ordered `buffered` stream: at most
//! `concurrency` requests are in flight and results come back in listing
//! order regardless of completion order.
//!
//! A failed download marks its record `failed` and the run continues.
//! File system errors abort the run.

use crate::config::{PdfRule, compile_selector};
use crate::error::ScrapeError;
use crate::extract::{CompiledFields, fill_from_detail, find_link};
use crate::fetch::Fetcher;
use crate::models::{DownloadStatus, LawRecord};
use crate::utils::clean_filename;
use futures::stream::{self, StreamExt, TryStreamExt};
use scraper::Selector;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Log a progress line every this many finished downloads.
const PROGRESS_EVERY: usize = 25;

/// Knobs of the download stage.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Directory receiving the PDF files.
    pub pdf_dir: PathBuf,
    /// Maximum requests in flight.
    pub concurrency: usize,
    /// Keep files already present under their target name.
    pub skip_existing: bool,
    /// Metadata only: no detail pages, no documents.
    pub no_download: bool,
}

/// Where the bytes of a document come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    /// A PDF served by the portal.
    Pdf(String),
    /// A page printed to PDF by the browser.
    Print(String),
}

impl Source {
    fn url(&self) -> &str {
        match self {
            Source::Pdf(url) | Source::Print(url) => url,
        }
    }
}

/// [`PdfRule`] with selectors compiled.
#[derive(Debug, Clone)]
enum Resolver {
    Listing,
    DetailPage { selector: Selector, fields: CompiledFields },
    Rewrite { from: String, to: String },
    PrintDetail { fields: CompiledFields },
}

impl Resolver {
    fn compile(rule: &PdfRule) -> Result<Self, ScrapeError> {
        Ok(match rule {
            PdfRule::Listing => Resolver::Listing,
            PdfRule::DetailPage { selector, fields } => Resolver::DetailPage {
                selector: compile_selector(selector)?,
                fields: CompiledFields::compile(fields)?,
            },
            PdfRule::Rewrite { from, to } => Resolver::Rewrite {
                from: from.clone(),
                to: to.clone(),
            },
            PdfRule::PrintDetail { fields } => Resolver::PrintDetail {
                fields: CompiledFields::compile(fields)?,
            },
        })
    }

    /// Whether `record` carries a link this rule would follow to a document.
    fn has_source(&self, record: &LawRecord) -> bool {
        if record.pdf_url.is_some() {
            return true;
        }
        match self {
            Resolver::Listing => false,
            Resolver::Rewrite { from, .. } => record
                .detail_url
                .as_deref()
                .is_some_and(|url| url.contains(from.as_str())),
            Resolver::DetailPage { .. } | Resolver::PrintDetail { .. } => record.detail_url.is_some(),
        }
    }
}

/// Download stage for one region.
pub struct Downloader<'a, F> {
    fetcher: &'a F,
    resolver: Resolver,
    prefix: String,
    opts: DownloadOptions,
}

impl<'a, F: Fetcher> Downloader<'a, F> {
    pub fn new(
        fetcher: &'a F,
        rule: &PdfRule,
        prefix: impl Into<String>,
        opts: DownloadOptions,
    ) -> Result<Self, ScrapeError> {
        Ok(Self {
            fetcher,
            resolver: Resolver::compile(rule)?,
            prefix: prefix.into(),
            opts,
        })
    }

    /// Process every record and return them in their original order, each
    /// with a terminal status.
    #[instrument(level = "info", skip_all, fields(prefix = %self.prefix, records = records.len()))]
    pub async fn run(&self, records: Vec<LawRecord>) -> Result<Vec<LawRecord>, ScrapeError> {
        if self.opts.no_download {
            info!("Downloads disabled; recording metadata only");
            return Ok(records
                .into_iter()
                .map(|mut record| {
                    let status = if self.resolver.has_source(&record) {
                        DownloadStatus::Skipped
                    } else {
                        DownloadStatus::NoLink
                    };
                    record.mark(status);
                    record
                })
                .collect());
        }

        fs::create_dir_all(&self.opts.pdf_dir).await?;
        let width = self.opts.concurrency.max(1);

        let resolved: Vec<(LawRecord, Option<Source>)> = stream::iter(records)
            .map(|record| self.resolve(record))
            .buffered(width)
            .try_collect()
            .await?;

        let names = assign_filenames(
            &self.prefix,
            resolved
                .iter()
                .map(|(record, source)| source.as_ref().map(|_| record)),
        );

        let total = names.iter().flatten().count();
        let done = AtomicUsize::new(0);
        info!(total, concurrency = width, "Starting downloads");

        let records: Vec<LawRecord> = stream::iter(resolved.into_iter().zip(names))
            .map(|((record, source), name)| self.fetch_counted(record, source.zip(name), &done, total))
            .buffered(width)
            .try_collect()
            .await?;

        Ok(records)
    }

    /// Find the document source of a record. Records that end here get
    /// their terminal status (`no_link` or `failed`) and no source.
    async fn resolve(&self, mut record: LawRecord) -> Result<(LawRecord, Option<Source>), ScrapeError> {
        let source = match &self.resolver {
            Resolver::Listing => Ok(record.pdf_url.clone().map(Source::Pdf)),
            Resolver::Rewrite { from, to } => Ok(record.pdf_url.clone().map(Source::Pdf).or_else(|| {
                record
                    .detail_url
                    .as_deref()
                    .filter(|url| url.contains(from.as_str()))
                    .map(|url| Source::Pdf(url.replace(from.as_str(), to)))
            })),
            Resolver::DetailPage { selector, fields } => match record.pdf_url.clone() {
                Some(url) => Ok(Some(Source::Pdf(url))),
                None => self.resolve_detail(&mut record, selector, fields).await,
            },
            Resolver::PrintDetail { fields } => match (record.pdf_url.clone(), record.detail_url.clone()) {
                (Some(url), _) => Ok(Some(Source::Pdf(url))),
                (None, Some(detail)) if fields.is_empty() => Ok(Some(Source::Print(detail))),
                (None, Some(detail)) => self
                    .enrich(&mut record, &detail, fields)
                    .await
                    .map(|_| Some(Source::Print(detail))),
                (None, None) => Ok(None),
            },
        };

        match source {
            Ok(Some(source)) => {
                if let Source::Pdf(url) = &source {
                    record.pdf_url = Some(url.clone());
                }
                record.refresh_missing();
                Ok((record, Some(source)))
            }
            Ok(None) => {
                debug!(index = record.index, "No document link");
                record.mark(DownloadStatus::NoLink);
                Ok((record, None))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(
                    index = record.index,
                    url = record.link_key().unwrap_or("-"),
                    error = %e,
                    "Could not resolve document; marking failed"
                );
                record.mark(DownloadStatus::Failed);
                Ok((record, None))
            }
        }
    }

    async fn resolve_detail(
        &self,
        record: &mut LawRecord,
        selector: &Selector,
        fields: &CompiledFields,
    ) -> Result<Option<Source>, ScrapeError> {
        let Some(detail) = record.detail_url.clone() else {
            return Ok(None);
        };
        let html = self.fetcher.fetch_html(&detail).await?;
        fill_from_detail(record, &html, fields);
        let Ok(base) = Url::parse(&detail) else {
            return Ok(None);
        };
        Ok(find_link(&html, &base, selector).map(Source::Pdf))
    }

    /// Fill blank metadata from the detail page.
    async fn enrich(&self, record: &mut LawRecord, detail: &str, fields: &CompiledFields) -> Result<(), ScrapeError> {
        let html = self.fetcher.fetch_html(detail).await?;
        fill_from_detail(record, &html, fields);
        Ok(())
    }

    async fn fetch_counted(
        &self,
        record: LawRecord,
        target: Option<(Source, String)>,
        done: &AtomicUsize,
        total: usize,
    ) -> Result<LawRecord, ScrapeError> {
        let Some((source, name)) = target else {
            return Ok(record);
        };
        let record = self.fetch(record, source, name).await?;
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_EVERY == 0 || n == total {
            info!(done = n, total, "Download progress");
        }
        Ok(record)
    }

    /// Download one document to `pdf_dir/name`.
    async fn fetch(&self, mut record: LawRecord, source: Source, name: String) -> Result<LawRecord, ScrapeError> {
        let path = self.opts.pdf_dir.join(&name);

        if self.opts.skip_existing && fs::try_exists(&path).await? {
            debug!(index = record.index, file = %name, "Keeping existing file");
            record.mark_stored(path, false);
            return Ok(record);
        }

        let bytes = match &source {
            Source::Pdf(url) => self.fetcher.fetch_document(url).await.and_then(|doc| {
                if doc.is_pdf() {
                    Ok(doc.bytes)
                } else {
                    Err(ScrapeError::NotPdf {
                        url: doc.final_url,
                        content_type: doc.content_type.unwrap_or_else(|| "unknown".into()),
                    })
                }
            }),
            Source::Print(url) => self.fetcher.render_pdf(url).await,
        };

        match bytes {
            Ok(bytes) => {
                write_atomic(&path, &bytes).await?;
                debug!(index = record.index, file = %name, bytes = bytes.len(), "Stored document");
                record.mark_stored(path, true);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    index = record.index,
                    url = source.url(),
                    error = %e,
                    "Download failed; marking failed"
                );
                record.mark(DownloadStatus::Failed);
            }
        }
        Ok(record)
    }
}

/// Base file name of a record: `{prefix}_{number}_{YYYY-MM-DD}.pdf`, with
/// `Unknown` and `0000-00-00` standing in for missing values.
pub fn file_name(prefix: &str, record: &LawRecord) -> String {
    let number = match record.act_number.trim() {
        "" => "Unknown".to_string(),
        n => n.replace(' ', ""),
    };
    let date = record
        .publication_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "0000-00-00".to_string());
    clean_filename(&format!("{prefix}_{number}_{date}.pdf"))
}

/// Assign unique file names in iteration order. `None` entries get no name;
/// the second and later users of a base name get `_2`, `_3`, ...
pub fn assign_filenames<'r>(
    prefix: &str,
    records: impl IntoIterator<Item = Option<&'r LawRecord>>,
) -> Vec<Option<String>> {
    let mut used: HashMap<String, usize> = HashMap::new();
    records
        .into_iter()
        .map(|record| {
            let base = file_name(prefix, record?);
            let seen = used.entry(base.to_lowercase()).or_insert(0);
            *seen += 1;
            Some(if *seen == 1 {
                base
            } else {
                let stem = base.strip_suffix(".pdf").unwrap_or(&base);
                format!("{stem}_{seen}.pdf")
            })
        })
        .collect()
}

/// Write through a `.part` file and rename, so a failed write never leaves
/// a truncated file under the final name.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ScrapeError> {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);
    fs::write(&part, bytes).await?;
    fs::rename(&part, path).await?;
    Ok(())
}
