//! One harvest run for one region.
//!
//! ```text
//! not started → fetching → extracting → downloading → exporting → done
//! ```
//!
//! - **fetching**: walk the listing pages according to the region's
//!   [`PaginationRule`], extracting each page as it arrives (pagination
//!   decisions depend on what a page contains)
//! - **extracting**: settle the record list (dedupe, numbering, markers)
//! - **downloading**: see [`crate::download`]
//! - **exporting**: CSV table and JSON report under the region directory
//!
//! Pagination rules: a single page, "next" links, a page parameter, a URL
//! template over a range, a section index whose sections are crawled in
//! turn, and probing document URLs by year and act number.
//!
//! A listing page that fails after retries is skipped with a warning. When
//! every listing page fails the region returns
//! [`ScrapeError::PortalUnreachable`].

use crate::config::{
    DEFAULT_MAX_PAGES, PAGE_PLACEHOLDER, PaginationRule, RegionConfig, compile_selector, probe_document_url,
};
use crate::dates::format_italian;
use crate::download::{DownloadOptions, Downloader};
use crate::error::ScrapeError;
use crate::extract::{Extractor, discover_last_page, find_links, find_next_link, probe_record};
use crate::fetch::Fetcher;
use crate::models::{LawRecord, RunReport};
use crate::outputs::{RegionPaths, csv, json};
use crate::utils::{ensure_writable_dir, truncate_for_log};
use chrono::Local;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Settings shared by every region of an invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub skip_existing: bool,
    pub no_download: bool,
    /// Overrides the page cap of every pagination rule.
    pub max_pages: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            concurrency: 4,
            skip_existing: false,
            no_download: false,
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    NotStarted,
    Fetching,
    Extracting,
    Downloading,
    Exporting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::NotStarted => "not started",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Downloading => "downloading",
            Stage::Exporting => "exporting",
            Stage::Done => "done",
        })
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug_assert!(next > *stage, "stage {next} after {stage}");
    info!(from = %stage, to = %next, "Stage");
    *stage = next;
}

/// Run the whole pipeline for `cfg` and return its report.
#[instrument(level = "info", skip_all, fields(region = %cfg.name))]
pub async fn run_region<F: Fetcher>(
    cfg: &RegionConfig,
    fetcher: &F,
    opts: &RunOptions,
) -> Result<RunReport, ScrapeError> {
    let t0 = Instant::now();
    let mut report = RunReport::new(cfg.name.clone());
    let paths = RegionPaths::new(&opts.output_dir, &cfg.slug());
    let mut stage = Stage::NotStarted;

    ensure_writable_dir(&paths.dir).await?;

    advance(&mut stage, Stage::Fetching);
    let mut crawl = Crawl::new(cfg, fetcher)?;
    crawl.run(&cfg.pagination, opts.max_pages).await?;
    report.pages_fetched = crawl.pages_fetched;
    report.pages_failed = crawl.pages_failed;
    if crawl.pages_fetched == 0 && crawl.pages_failed > 0 {
        return Err(ScrapeError::PortalUnreachable {
            region: cfg.name.clone(),
            failed: crawl.pages_failed,
        });
    }

    advance(&mut stage, Stage::Extracting);
    let records = crawl.into_records();
    info!(
        records = records.len(),
        pages = report.pages_fetched,
        pages_failed = report.pages_failed,
        "Listing extracted"
    );

    advance(&mut stage, Stage::Downloading);
    let downloader = Downloader::new(
        fetcher,
        &cfg.pdf,
        cfg.prefix(),
        DownloadOptions {
            pdf_dir: paths.pdfs.clone(),
            concurrency: opts.concurrency,
            skip_existing: opts.skip_existing,
            no_download: opts.no_download,
        },
    )?;
    let records = downloader.run(records).await?;

    advance(&mut stage, Stage::Exporting);
    csv::write_records(&paths.csv, &records).await?;
    report.tally(&records);
    report.csv_path = Some(paths.csv.clone());
    report.finished_at = Some(Local::now());
    json::write_report(&report, &paths.report).await?;

    advance(&mut stage, Stage::Done);
    let dates = records.iter().filter_map(|r| r.publication_date);
    let (oldest, newest) = match dates.clone().min().zip(dates.max()) {
        Some((oldest, newest)) => (format_italian(oldest), format_italian(newest)),
        None => ("-".to_string(), "-".to_string()),
    };
    info!(
        %oldest,
        %newest,
        records = report.records,
        downloaded = report.downloaded,
        existing = report.existing,
        failed = report.failed,
        no_link = report.no_link,
        skipped = report.skipped,
        missing_title = report.missing_title,
        missing_date = report.missing_date,
        missing_number = report.missing_number,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Region finished"
    );
    Ok(report)
}

/// Listing crawl state: records gathered so far and page counters.
struct Crawl<'a, F> {
    fetcher: &'a F,
    region: String,
    listing_url: String,
    /// Absent for `probe`, which reads no listing pages.
    extractor: Option<Extractor>,
    dedupe: bool,
    seen: HashSet<String>,
    records: Vec<LawRecord>,
    pages_fetched: usize,
    pages_failed: usize,
}

/// A fetched listing page with the entries found on it. Entries join the
/// crawl only through [`Crawl::accept`], once pagination has decided the
/// page is new.
struct ListingPage {
    html: String,
    url: Url,
    records: Vec<LawRecord>,
}

impl ListingPage {
    /// Fingerprints of all entries; `None` if any entry has none, in which
    /// case the page is never judged a repeat.
    fn fingerprints(&self) -> Option<Vec<String>> {
        self.records.iter().map(LawRecord::fingerprint).collect()
    }
}

impl<'a, F: Fetcher> Crawl<'a, F> {
    fn new(cfg: &RegionConfig, fetcher: &'a F) -> Result<Self, ScrapeError> {
        let extractor = match cfg.pagination {
            PaginationRule::Probe { .. } => None,
            _ => Some(Extractor::new(cfg)?),
        };
        Ok(Self {
            fetcher,
            region: cfg.name.clone(),
            listing_url: cfg.listing.url.clone(),
            extractor,
            dedupe: cfg.listing.dedupe,
            seen: HashSet::new(),
            records: Vec::new(),
            pages_fetched: 0,
            pages_failed: 0,
        })
    }

    async fn run(&mut self, rule: &PaginationRule, max_pages: Option<usize>) -> Result<(), ScrapeError> {
        match rule {
            PaginationRule::Single => {
                let url = self.listing_url.clone();
                if let Some(page) = self.page(&url).await {
                    self.accept(page.records);
                }
            }
            PaginationRule::NextLink {
                selector,
                contains,
                max_pages: rule_cap,
            } => {
                let selector = compile_selector(selector)?;
                let cap = max_pages.unwrap_or(*rule_cap);
                let mut visited = HashSet::new();
                let mut next = Some(self.listing_url.clone());
                while let Some(url) = next.take() {
                    if visited.len() >= cap {
                        info!(cap, "Page cap reached");
                        break;
                    }
                    visited.insert(url.clone());
                    let Some(page) = self.page(&url).await else {
                        break;
                    };
                    next = find_next_link(&page.html, &page.url, &selector, contains.as_deref())
                        .filter(|n| !visited.contains(n));
                    self.accept(page.records);
                }
            }
            PaginationRule::PageParam {
                param,
                first,
                last,
                discover,
            } => {
                let cap = max_pages.unwrap_or(DEFAULT_MAX_PAGES);
                let discover = discover.as_deref().map(compile_selector).transpose()?;
                let mut last = *last;
                let mut previous: Option<Vec<String>> = None;

                for (count, n) in (*first..).enumerate() {
                    if count >= cap {
                        info!(cap, "Page cap reached");
                        break;
                    }
                    if last.is_some_and(|last| n > last) {
                        break;
                    }
                    let url = with_query_param(&self.listing_url, param, n)?;
                    let Some(page) = self.page(&url).await else {
                        if last.is_none() {
                            break;
                        }
                        continue;
                    };
                    if count == 0 && last.is_none() {
                        if let Some(sel) = &discover {
                            last = discover_last_page(&page.html, &page.url, sel, param);
                            debug!(?last, "Discovered last page");
                        }
                    }
                    let fingerprints = page.fingerprints();
                    if last.is_none() {
                        if page.records.is_empty() {
                            break;
                        }
                        if fingerprints.is_some() && fingerprints == previous {
                            info!(page = n, "Page repeats the previous one; stopping");
                            break;
                        }
                    }
                    previous = fingerprints;
                    self.accept(page.records);
                }
            }
            PaginationRule::Template { from, to, descending } => {
                let values: Box<dyn Iterator<Item = i64>> = if *descending {
                    Box::new((*from..=*to).rev())
                } else {
                    Box::new(*from..=*to)
                };
                let cap = max_pages.unwrap_or(usize::MAX);
                for n in values.take(cap) {
                    let url = self.listing_url.replace(PAGE_PLACEHOLDER, &n.to_string());
                    if let Some(page) = self.page(&url).await {
                        self.accept(page.records);
                    }
                }
            }
            PaginationRule::Sections { selector, pages } => {
                let sections = compile_selector(selector)?;
                let pages = pages.as_deref().map(compile_selector).transpose()?;
                let cap = max_pages.unwrap_or(DEFAULT_MAX_PAGES);

                let start = self.listing_url.clone();
                let Some(index) = self.page(&start).await else {
                    return Ok(());
                };
                let section_urls = find_links(&index.html, &index.url, &sections);
                info!(sections = section_urls.len(), "Section index read");
                self.accept(index.records);

                let mut visited = HashSet::from([start]);
                'sections: for section in section_urls {
                    let mut queue = vec![section];
                    let mut first = true;
                    while let Some(url) = queue.pop() {
                        if !visited.insert(url.clone()) {
                            continue;
                        }
                        if visited.len() > cap {
                            info!(cap, "Page cap reached");
                            break 'sections;
                        }
                        let Some(page) = self.page(&url).await else {
                            continue;
                        };
                        if std::mem::take(&mut first) {
                            if let Some(sel) = &pages {
                                let mut more = find_links(&page.html, &page.url, sel);
                                more.reverse();
                                queue.extend(more);
                            }
                        }
                        self.accept(page.records);
                    }
                }
            }
            PaginationRule::Probe {
                from,
                to,
                first,
                max_misses,
            } => {
                let cap = max_pages.unwrap_or(usize::MAX);
                for year in (*from..=*to).take(cap) {
                    let found = self.probe_year(year, *first, *max_misses).await;
                    info!(year, found = found.len(), "Year probed");
                    self.accept(found);
                }
            }
        }
        Ok(())
    }

    /// Fetch and extract one listing page. Failures are counted and logged.
    async fn page(&mut self, url: &str) -> Option<ListingPage> {
        let Ok(page_url) = Url::parse(url) else {
            warn!(url, "Listing URL does not parse; skipping");
            self.pages_failed += 1;
            return None;
        };
        let html = match self.fetcher.fetch_html(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url, error = %e, "Listing page failed; skipping");
                self.pages_failed += 1;
                return None;
            }
        };
        self.pages_fetched += 1;

        let records = match &self.extractor {
            Some(extractor) => extractor.extract_listing(&html, &page_url, self.records.len()),
            None => Vec::new(),
        };
        if records.is_empty() {
            debug!(url, preview = %truncate_for_log(&html, 300), "Listing page has no entries");
        }
        Some(ListingPage {
            html,
            url: page_url,
            records,
        })
    }

    /// Request act numbers of `year` until `max_misses` in a row yield no PDF.
    /// Client errors and non-PDF answers are misses; other failures are
    /// misses too but also count as failed pages.
    async fn probe_year(&mut self, year: i32, first: u32, max_misses: usize) -> Vec<LawRecord> {
        let mut found = Vec::new();
        let mut misses = 0;
        let mut n = first;
        while misses < max_misses {
            let url = probe_document_url(&self.listing_url, year, n);
            match self.fetcher.fetch_document(&url).await {
                Ok(doc) if doc.is_pdf() => {
                    self.pages_fetched += 1;
                    misses = 0;
                    found.push(probe_record(&self.region, year, n, &url, doc.disposition.as_deref()));
                }
                Ok(doc) => {
                    debug!(url, content_type = doc.content_type.as_deref().unwrap_or("-"), "Not a PDF");
                    misses += 1;
                }
                Err(ScrapeError::Status { status, .. }) if status < 500 && status != 429 => {
                    debug!(url, status, "No act");
                    misses += 1;
                }
                Err(e) => {
                    warn!(url, error = %e, "Probe failed");
                    self.pages_failed += 1;
                    misses += 1;
                }
            }
            n += 1;
        }
        found
    }

    /// Append a page's entries, dropping already seen links when the region
    /// dedupes, and number them in crawl order.
    fn accept(&mut self, records: Vec<LawRecord>) {
        let entries = records.len();
        let mut added = 0usize;
        for mut record in records {
            if self.dedupe {
                if let Some(key) = record.link_key() {
                    if !self.seen.insert(key.to_string()) {
                        continue;
                    }
                }
            }
            record.index = self.records.len();
            self.records.push(record);
            added += 1;
        }
        if entries > 0 {
            debug!(entries, added, total = self.records.len(), "Entries accepted");
        }
    }

    fn into_records(self) -> Vec<LawRecord> {
        self.records
    }
}

/// `base` with `param=n` set, replacing an existing value.
fn with_query_param(base: &str, param: &str, n: u32) -> Result<String, ScrapeError> {
    let mut url = Url::parse(base).map_err(|e| ScrapeError::Config(format!("listing url `{base}`: {e}")))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(param, &n.to_string());
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_regions;
    use crate::fetch::stub::StubFetcher;
    use crate::models::DownloadStatus;
    use std::path::Path;

    fn region(yaml: &str) -> RegionConfig {
        parse_regions(yaml).unwrap().remove(0)
    }

    fn opts(dir: &Path) -> RunOptions {
        RunOptions {
            output_dir: dir.to_path_buf(),
            concurrency: 2,
            ..RunOptions::default()
        }
    }

    const SARDINIA: &str = r#"
regions:
  - name: Sardinia
    listing:
      url: https://consiglio.example.it/leggi/
      entry: li.legge
    fields:
      title: span.titolo
      pdf_link: a.pdf
"#;

    const SARDINIA_PAGE: &str = r#"
        <ul>
          <li class="legge"><span class="titolo">Legge regionale 3 marzo 2025, n. 5</span>
              <a class="pdf" href="/docs/lr5.pdf">pdf</a></li>
          <li class="legge"><span class="titolo">Legge regionale 9 dicembre 2025, n. 33</span>
              <a class="pdf" href="/docs/lr33.pdf">pdf</a></li>
          <li class="legge"><span class="titolo">Legge regionale 10 dicembre 2025, n. 34</span></li>
        </ul>"#;

    fn sardinia_stub() -> StubFetcher {
        StubFetcher::new()
            .html("https://consiglio.example.it/leggi/", SARDINIA_PAGE)
            .pdf("https://consiglio.example.it/docs/lr5.pdf")
            .pdf("https://consiglio.example.it/docs/lr33.pdf")
    }

    #[tokio::test]
    async fn test_three_entries_one_without_link() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(SARDINIA);
        let stub = sardinia_stub();

        let report = run_region(&cfg, &stub, &opts(dir.path())).await.unwrap();
        assert_eq!(report.records, 3);
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.no_link, 1);
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(stub.count(|u| u.ends_with(".pdf")), 2);

        let paths = RegionPaths::new(dir.path(), "sardinia");
        let rows = csv::read_records(&paths.csv).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].title.contains("n. 5"));
        assert_eq!(rows[2].status(), DownloadStatus::NoLink);
        assert!(rows[2].local_path().is_none());
        assert!(paths.pdfs.join("Sardinia_5_2025-03-03.pdf").exists());
        assert!(paths.pdfs.join("Sardinia_33_2025-12-09.pdf").exists());
        assert_eq!(std::fs::read_dir(&paths.pdfs).unwrap().count(), 2);

        let saved = json::read_report(&paths.report).await.unwrap();
        assert_eq!(saved.records, 3);
        assert!(saved.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_second_run_yields_identical_rows() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(SARDINIA);
        let paths = RegionPaths::new(dir.path(), "sardinia");

        run_region(&cfg, &sardinia_stub(), &opts(dir.path())).await.unwrap();
        let first = std::fs::read_to_string(&paths.csv).unwrap();
        run_region(&cfg, &sardinia_stub(), &opts(dir.path())).await.unwrap();
        let second = std::fs::read_to_string(&paths.csv).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_listing_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(SARDINIA);
        let stub = StubFetcher::new().html("https://consiglio.example.it/leggi/", "<ul></ul>");

        let report = run_region(&cfg, &stub, &opts(dir.path())).await.unwrap();
        assert_eq!(report.records, 0);
        let text = std::fs::read_to_string(RegionPaths::new(dir.path(), "sardinia").csv).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_portal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(SARDINIA);
        let stub = StubFetcher::new().status("https://consiglio.example.it/leggi/", 503);

        let err = run_region(&cfg, &stub, &opts(dir.path())).await.unwrap_err();
        assert!(matches!(err, ScrapeError::PortalUnreachable { failed: 1, .. }));
    }

    const EMILIA: &str = r#"
regions:
  - name: Emilia-Romagna
    listing:
      url: https://demetra.example.it/al/hit-page?start=0
      entry: a.hit[title]
      dedupe: true
    fields:
      title: { attr: title }
      pdf_link: { attr: href }
    pagination:
      kind: next_link
      selector: a
      contains: Succ.
"#;

    fn emilia_page(ids: &[u32], next: Option<&str>) -> String {
        let mut html: String = ids
            .iter()
            .map(|id| {
                format!(r#"<a class="hit" title="Legge regionale 1 marzo 2020, n. {id}" href="/lr/{id}.pdf">x</a>"#)
            })
            .collect();
        if let Some(next) = next {
            html.push_str(&format!(r#"<a href="{next}">Succ. &raquo;</a>"#));
        }
        html
    }

    #[tokio::test]
    async fn test_next_link_pagination_with_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(EMILIA);
        let stub = StubFetcher::new()
            .html(
                "https://demetra.example.it/al/hit-page?start=0",
                &emilia_page(&[1, 2], Some("hit-page?start=2")),
            )
            .html(
                "https://demetra.example.it/al/hit-page?start=2",
                &emilia_page(&[2, 3], Some("hit-page?start=4")),
            )
            .html("https://demetra.example.it/al/hit-page?start=4", &emilia_page(&[4], None));

        let mut o = opts(dir.path());
        o.no_download = true;
        let report = run_region(&cfg, &stub, &o).await.unwrap();
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.records, 4);
        assert_eq!(report.skipped, 4);

        let rows = csv::read_records(&RegionPaths::new(dir.path(), "emilia_romagna").csv)
            .await
            .unwrap();
        let numbers: Vec<_> = rows.iter().map(|r| r.act_number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_max_pages_override_caps_next_link() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(EMILIA);
        let stub = StubFetcher::new()
            .html(
                "https://demetra.example.it/al/hit-page?start=0",
                &emilia_page(&[1], Some("hit-page?start=1")),
            )
            .html(
                "https://demetra.example.it/al/hit-page?start=1",
                &emilia_page(&[2], Some("hit-page?start=2")),
            );

        let mut o = opts(dir.path());
        o.no_download = true;
        o.max_pages = Some(1);
        let report = run_region(&cfg, &stub, &o).await.unwrap();
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(stub.requests().len(), 1);
    }

    const LAZIO: &str = r#"
regions:
  - name: Lazio
    listing:
      url: https://consiglio.example.it/index.php?vw=leggi
      entry: div.riga
    fields:
      title: a.titolo
      detail_link: a.titolo
    pagination:
      kind: page_param
      param: page
      discover: ul.pagination a
    pdf:
      kind: rewrite
      from: vw=dettaglio
      to: vw=pdf
"#;

    fn lazio_page(n: u32, last: Option<u32>) -> String {
        let pager = last
            .map(|l| format!(r#"<ul class="pagination"><li><a href="?vw=leggi&page={l}">Ultima</a></li></ul>"#))
            .unwrap_or_default();
        format!(
            r#"<div class="riga"><a class="titolo" href="?vw=dettaglio&id={n}">Legge regionale 2 maggio 2024, n. {n}</a></div>{pager}"#
        )
    }

    #[tokio::test]
    async fn test_page_param_with_discovered_last_page() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(LAZIO);
        let mut stub = StubFetcher::new().html(
            "https://consiglio.example.it/index.php?vw=leggi&page=1",
            &lazio_page(1, Some(3)),
        );
        for n in 2..=3 {
            stub = stub
                .html(
                    &format!("https://consiglio.example.it/index.php?vw=leggi&page={n}"),
                    &lazio_page(n, None),
                );
        }
        for n in 1..=3 {
            stub = stub.pdf(&format!("https://consiglio.example.it/index.php?vw=pdf&id={n}"));
        }

        let report = run_region(&cfg, &stub, &opts(dir.path())).await.unwrap();
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.downloaded, 3);
        assert_eq!(stub.count(|u| u.contains("page=4")), 0);
    }

    #[tokio::test]
    async fn test_page_param_stops_on_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = LAZIO.replace("      discover: ul.pagination a\n", "");
        let cfg = region(&yaml);
        let stub = StubFetcher::new()
            .html("https://consiglio.example.it/index.php?vw=leggi&page=1", &lazio_page(1, None))
            .html("https://consiglio.example.it/index.php?vw=leggi&page=2", &lazio_page(2, None))
            .html("https://consiglio.example.it/index.php?vw=leggi&page=3", "<p>Nessun risultato</p>");

        let mut o = opts(dir.path());
        o.no_download = true;
        let report = run_region(&cfg, &stub, &o).await.unwrap();
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.records, 2);
        assert_eq!(stub.count(|u| u.contains("page=4")), 0);
    }

    #[tokio::test]
    async fn test_page_param_repeated_last_page_is_not_exported_twice() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = LAZIO.replace("      discover: ul.pagination a\n", "");
        let cfg = region(&yaml);
        let stub = StubFetcher::new()
            .html("https://consiglio.example.it/index.php?vw=leggi&page=1", &lazio_page(1, None))
            .html("https://consiglio.example.it/index.php?vw=leggi&page=2", &lazio_page(2, None))
            .html("https://consiglio.example.it/index.php?vw=leggi&page=3", &lazio_page(2, None));

        let mut o = opts(dir.path());
        o.no_download = true;
        let report = run_region(&cfg, &stub, &o).await.unwrap();
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.records, 2);
        assert_eq!(stub.count(|u| u.contains("page=4")), 0);

        let rows = csv::read_records(&RegionPaths::new(dir.path(), "lazio").csv).await.unwrap();
        let numbers: Vec<_> = rows.iter().map(|r| r.act_number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_page_param_keeps_going_over_pages_without_links() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
regions:
  - name: Molise
    listing:
      url: http://www1.example.it/web/crm/lr.nsf/elenco
      entry: tr.legge
    fields:
      title: td.titolo
    pagination:
      kind: page_param
      param: p
"#;
        let cfg = region(yaml);
        let row = |n: u32| {
            format!(r#"<table><tr class="legge"><td class="titolo">Legge regionale 7 luglio 2022, n. {n}</td></tr></table>"#)
        };
        let stub = StubFetcher::new()
            .html("http://www1.example.it/web/crm/lr.nsf/elenco?p=1", &row(1))
            .html("http://www1.example.it/web/crm/lr.nsf/elenco?p=2", &row(2))
            .html("http://www1.example.it/web/crm/lr.nsf/elenco?p=3", &row(3))
            .html("http://www1.example.it/web/crm/lr.nsf/elenco?p=4", "<table></table>");

        let mut o = opts(dir.path());
        o.no_download = true;
        let report = run_region(&cfg, &stub, &o).await.unwrap();
        assert_eq!(report.pages_fetched, 4);
        assert_eq!(report.records, 3);
        assert_eq!(report.no_link, 3);
    }

    #[tokio::test]
    async fn test_unparsable_page_url_counts_as_failed() {
        let cfg = region(SARDINIA);
        let stub = StubFetcher::new().html("leggi/elenco", r#"<li class="legge">x</li>"#);
        let mut crawl = Crawl::new(&cfg, &stub).unwrap();

        assert!(crawl.page("leggi/elenco").await.is_none());
        assert_eq!(crawl.pages_fetched, 0);
        assert_eq!(crawl.pages_failed, 1);
        assert!(stub.requests().is_empty());
    }

    const MARCHE: &str = r#"
regions:
  - name: Marche
    fetch: browser
    listing:
      url: https://consiglio.example.it/leggi/classificazioni.php?arc=vig
      entry: "a[href*='dettaglio.php']"
      dedupe: true
    fields:
      detail_link: { attr: href }
    pagination:
      kind: sections
      selector: "a[href*='classificazioni.php?arc=vig&cat=']"
      pages: "a[href*='page=']"
    pdf:
      kind: print_detail
"#;

    fn law_link(id: u32, day: u32) -> String {
        format!(r#"<a href="dettaglio.php?arc=vig&idl={id}">Legge regionale {day} marzo 2021, n. {id}</a>"#)
    }

    #[tokio::test]
    async fn test_sections_crawl_each_section_and_its_pages() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(MARCHE);
        let base = "https://consiglio.example.it/leggi/";
        let mut stub = StubFetcher::new()
            .printable()
            .html(
                &format!("{base}classificazioni.php?arc=vig"),
                r#"<a href="classificazioni.php?arc=vig&cat=1">Ambiente</a>
                   <a href="classificazioni.php?arc=vig&cat=2">Bilancio</a>"#,
            )
            .html(
                &format!("{base}classificazioni.php?arc=vig&cat=1"),
                &format!(
                    r#"{}{}<a href="classificazioni.php?arc=vig&cat=1&page=2">2</a>"#,
                    law_link(1, 2),
                    law_link(2, 3)
                ),
            )
            .html(&format!("{base}classificazioni.php?arc=vig&cat=1&page=2"), &law_link(3, 4))
            .html(
                &format!("{base}classificazioni.php?arc=vig&cat=2"),
                &format!("{}{}", law_link(2, 3), law_link(4, 5)),
            );
        for id in 1..=4 {
            stub = stub.html(&format!("{base}dettaglio.php?arc=vig&idl={id}"), "<h1>Legge</h1>");
        }

        let report = run_region(&cfg, &stub, &opts(dir.path())).await.unwrap();
        assert_eq!(report.pages_fetched, 4);
        assert_eq!(report.records, 4);
        assert_eq!(report.downloaded, 4);

        let rows = csv::read_records(&RegionPaths::new(dir.path(), "marche").csv).await.unwrap();
        let numbers: Vec<_> = rows.iter().map(|r| r.act_number.as_str()).collect();
        assert_eq!(numbers, vec!["1", "2", "3", "4"]);
        assert!(
            RegionPaths::new(dir.path(), "marche")
                .pdfs
                .join("Marche_3_2021-03-04.pdf")
                .exists()
        );
    }

    const CALABRIA: &str = r#"
regions:
  - name: Calabria
    listing:
      url: https://consiglio.example.it/bdf/api/BDF?numero={n}&anno={year}
    pagination:
      kind: probe
      from: 2020
      to: 2021
      max_misses: 2
"#;

    fn calabria(n: u32, year: i32) -> String {
        format!("https://consiglio.example.it/bdf/api/BDF?numero={n}&anno={year}")
    }

    #[tokio::test]
    async fn test_probe_walks_years_until_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(CALABRIA);
        let stub = StubFetcher::new()
            .pdf(&calabria(1, 2020))
            .pdf(&calabria(2, 2020))
            .pdf(&calabria(4, 2020))
            .pdf(&calabria(1, 2021))
            .disposition(&calabria(1, 2021), r#"attachment; filename="LR_1_12_gennaio_2021.pdf""#);

        let report = run_region(&cfg, &stub, &opts(dir.path())).await.unwrap();
        assert_eq!(report.records, 4);
        assert_eq!(report.downloaded, 4);
        assert_eq!(report.pages_fetched, 4);
        assert_eq!(report.pages_failed, 0);
        assert_eq!(stub.count(|u| u.contains("anno=2020")), 6 + 3);
        assert_eq!(stub.count(|u| u.contains("numero=7")), 0);

        let paths = RegionPaths::new(dir.path(), "calabria");
        let rows = csv::read_records(&paths.csv).await.unwrap();
        let numbers: Vec<_> = rows.iter().map(|r| r.act_number.as_str()).collect();
        assert_eq!(numbers, vec!["1/2020", "2/2020", "4/2020", "1/2021"]);
        assert_eq!(rows[0].date_text, "2020");
        assert_eq!(rows[3].date_text, "12 gennaio 2021");
        assert!(paths.pdfs.join("Calabria_4_2020_0000-00-00.pdf").exists());
        assert!(paths.pdfs.join("Calabria_1_2021_2021-01-12.pdf").exists());
    }

    #[tokio::test]
    async fn test_probe_without_any_act_is_empty_not_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = region(CALABRIA);
        let stub = StubFetcher::new();

        let report = run_region(&cfg, &stub, &opts(dir.path())).await.unwrap();
        assert_eq!(report.records, 0);
        assert_eq!(stub.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_template_pagination_skips_failed_year() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = r#"
regions:
  - name: Piemonte
    listing:
      url: http://arianna.example.it/elencoLeggi.do?anno={n}
      entry: a.dettaglio
    fields:
      detail_link: { attr: href }
    pagination:
      kind: template
      from: 2021
      to: 2023
      descending: true
"#;
        let cfg = region(yaml);
        let stub = StubFetcher::new()
            .html(
                "http://arianna.example.it/elencoLeggi.do?anno=2023",
                r#"<a class="dettaglio" href="d?id=1">Legge regionale 4 aprile 2023, n. 1</a>"#,
            )
            .status("http://arianna.example.it/elencoLeggi.do?anno=2022", 500)
            .html(
                "http://arianna.example.it/elencoLeggi.do?anno=2021",
                r#"<a class="dettaglio" href="d?id=2">Legge regionale 5 maggio 2021, n. 7</a>"#,
            );

        let mut o = opts(dir.path());
        o.no_download = true;
        let report = run_region(&cfg, &stub, &o).await.unwrap();
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.records, 2);
        assert_eq!(
            stub.requests(),
            vec![
                "http://arianna.example.it/elencoLeggi.do?anno=2023",
                "http://arianna.example.it/elencoLeggi.do?anno=2022",
                "http://arianna.example.it/elencoLeggi.do?anno=2021",
            ]
        );
    }

    #[test]
    fn test_with_query_param_replaces_existing() {
        assert_eq!(
            with_query_param("https://a.it/x?vw=l&page=3", "page", 7).unwrap(),
            "https://a.it/x?vw=l&page=7"
        );
        assert_eq!(
            with_query_param("https://a.it/x", "p", 1).unwrap(),
            "https://a.it/x?p=1"
        );
    }
}
