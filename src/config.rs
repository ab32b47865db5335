//! Region definitions: where each portal lists its acts and how to read them.
//!
//! Every region is one [`RegionConfig`] entry in a YAML file. A default set
//! is compiled into the binary (`regions.yaml` at the crate root) and can be
//! replaced with `--config`. Configurations are validated once at startup;
//! a bad selector or URL is reported before any network traffic happens.

use crate::error::ScrapeError;
use crate::utils::{file_prefix, region_slug};
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, instrument};
use url::Url;

/// The region set shipped with the binary.
pub const BUNDLED_REGIONS: &str = include_str!("../regions.yaml");

/// Placeholder substituted by [`PaginationRule::Template`] and, for the
/// act number, by [`PaginationRule::Probe`].
pub const PAGE_PLACEHOLDER: &str = "{n}";

/// Year placeholder of [`PaginationRule::Probe`].
pub const YEAR_PLACEHOLDER: &str = "{year}";

/// Page cap when neither the region nor the command line sets one.
pub const DEFAULT_MAX_PAGES: usize = 500;

/// Top-level layout of a regions file.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionsFile {
    pub regions: Vec<RegionConfig>,
}

/// How pages of a portal are retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Plain HTTP requests; the listing is server-rendered.
    #[default]
    Http,
    /// A headless browser renders the page first (requires the `browser` feature).
    Browser,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Http => "http",
            FetchMode::Browser => "browser",
        }
    }
}

/// One regional portal.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionConfig {
    /// Display name, also written in the `Region` column.
    pub name: String,
    /// Prefix of downloaded file names; defaults to the name without spaces.
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub fetch: FetchMode,
    pub listing: ListingRule,
    #[serde(default)]
    pub fields: FieldSelectors,
    #[serde(default)]
    pub pagination: PaginationRule,
    #[serde(default)]
    pub pdf: PdfRule,
}

/// Where the listing lives and what one entry looks like.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingRule {
    /// First listing page. For `template` pagination it contains `{n}`;
    /// for `probe` it is the document URL with `{year}` and `{n}`.
    pub url: String,
    /// Selector matching one element per act (row, card, list item, link).
    /// Not used by `probe`, which has no listing pages.
    #[serde(default)]
    pub entry: String,
    /// Drop entries whose link was already seen earlier in the crawl.
    #[serde(default)]
    pub dedupe: bool,
}

/// A value read from an entry: an optional selector relative to the entry
/// and an optional attribute. Without a selector the entry itself is used;
/// without an attribute the element text is used (links default to `href`).
///
/// In YAML either a bare selector string or `{ selector, attr }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawFieldRule")]
pub struct FieldRule {
    pub selector: Option<String>,
    pub attr: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldRule {
    Selector(String),
    Full {
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        attr: Option<String>,
    },
}

impl From<RawFieldRule> for FieldRule {
    fn from(raw: RawFieldRule) -> Self {
        match raw {
            RawFieldRule::Selector(selector) => FieldRule {
                selector: Some(selector),
                attr: None,
            },
            RawFieldRule::Full { selector, attr } => FieldRule { selector, attr },
        }
    }
}

#[cfg(test)]
impl FieldRule {
    pub fn selector(selector: &str) -> Self {
        FieldRule {
            selector: Some(selector.to_string()),
            attr: None,
        }
    }

    pub fn attr(selector: Option<&str>, attr: &str) -> Self {
        FieldRule {
            selector: selector.map(str::to_string),
            attr: Some(attr.to_string()),
        }
    }
}

/// Per-field extraction rules. Every rule is optional; see the extractor
/// for the fallbacks applied when a rule is absent or yields nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FieldSelectors {
    #[serde(default)]
    pub title: Option<FieldRule>,
    #[serde(default)]
    pub date: Option<FieldRule>,
    #[serde(default)]
    pub number: Option<FieldRule>,
    #[serde(default)]
    pub detail_link: Option<FieldRule>,
    #[serde(default)]
    pub pdf_link: Option<FieldRule>,
    /// Regex with one capture group, tried against the entry's links when
    /// the text carries no act number (e.g. `lr\d{4}-(\d+)`).
    #[serde(default)]
    pub number_pattern: Option<String>,
}

impl FieldSelectors {
    fn rules(&self) -> impl Iterator<Item = &FieldRule> {
        [
            &self.title,
            &self.date,
            &self.number,
            &self.detail_link,
            &self.pdf_link,
        ]
        .into_iter()
        .flatten()
    }
}

/// How the crawler moves from one listing page to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaginationRule {
    /// The listing is a single page.
    #[default]
    Single,
    /// Follow a "next" link until it disappears.
    NextLink {
        selector: String,
        /// Only links whose text contains this string (e.g. `Successiva`).
        #[serde(default)]
        contains: Option<String>,
        #[serde(default = "default_max_pages")]
        max_pages: usize,
    },
    /// Add `param=<n>` to the listing URL for consecutive `n`.
    PageParam {
        param: String,
        #[serde(default = "default_first_page")]
        first: u32,
        /// Last page, when known in advance.
        #[serde(default)]
        last: Option<u32>,
        /// Selector for pagination links on the first page; the largest
        /// `param=<n>` among their hrefs becomes the last page.
        #[serde(default)]
        discover: Option<String>,
    },
    /// Substitute `{n}` in the listing URL with each value in `from..=to`
    /// (typically a year range).
    Template {
        from: i64,
        to: i64,
        #[serde(default)]
        descending: bool,
    },
    /// The listing URL is an index of sections (categories, years). Every
    /// link matching `selector` is a section listing; within a section,
    /// links matching `pages` lead to its further pages.
    Sections {
        selector: String,
        #[serde(default)]
        pages: Option<String>,
    },
    /// No listing: request the document URL for each year in `from..=to`
    /// and act numbers `first, first + 1, ...`, moving to the next year after
    /// `max_misses` consecutive numbers without a PDF.
    Probe {
        from: i32,
        to: i32,
        #[serde(default = "default_first_page")]
        first: u32,
        #[serde(default = "default_max_misses")]
        max_misses: usize,
    },
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_max_misses() -> usize {
    10
}

fn default_first_page() -> u32 {
    1
}

/// How the PDF of an entry is located.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PdfRule {
    /// The listing entry links the PDF directly (`fields.pdf_link`).
    #[default]
    Listing,
    /// Visit the detail page and take the first link matching `selector`.
    /// `fields` fills metadata the listing left blank.
    DetailPage {
        selector: String,
        #[serde(default)]
        fields: FieldSelectors,
    },
    /// Derive the PDF URL from the detail URL by replacing `from` with `to`.
    Rewrite { from: String, to: String },
    /// Print the rendered detail page to PDF (browser fetch only).
    /// `fields` fills metadata the listing left blank.
    PrintDetail {
        #[serde(default)]
        fields: FieldSelectors,
    },
}

impl RegionConfig {
    /// Prefix of downloaded file names.
    pub fn prefix(&self) -> String {
        self.file_prefix
            .as_deref()
            .map(file_prefix)
            .unwrap_or_else(|| file_prefix(&self.name))
    }

    /// Directory-safe identifier for output paths.
    pub fn slug(&self) -> String {
        region_slug(&self.name)
    }

    /// Check every URL, selector and pattern of this region.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.name.trim().is_empty() {
            return Err(ScrapeError::Config("region with empty name".into()));
        }
        let bad = |msg: String| ScrapeError::Config(format!("{}: {}", self.name, msg));

        let probe_url = match &self.pagination {
            PaginationRule::Template { from, to, .. } => {
                if !self.listing.url.contains(PAGE_PLACEHOLDER) {
                    return Err(bad(format!(
                        "template pagination needs `{PAGE_PLACEHOLDER}` in listing.url"
                    )));
                }
                if from > to {
                    return Err(bad(format!("template range {from}..={to} is empty")));
                }
                self.listing.url.replace(PAGE_PLACEHOLDER, &from.to_string())
            }
            PaginationRule::Probe {
                from,
                to,
                first,
                max_misses,
            } => {
                for placeholder in [YEAR_PLACEHOLDER, PAGE_PLACEHOLDER] {
                    if !self.listing.url.contains(placeholder) {
                        return Err(bad(format!("probe pagination needs `{placeholder}` in listing.url")));
                    }
                }
                if from > to {
                    return Err(bad(format!("probe range {from}..={to} is empty")));
                }
                if *max_misses == 0 {
                    return Err(bad("probe max_misses must be at least 1".into()));
                }
                probe_document_url(&self.listing.url, *from, *first)
            }
            _ => self.listing.url.clone(),
        };
        Url::parse(&probe_url).map_err(|e| bad(format!("listing.url `{probe_url}`: {e}")))?;

        if !matches!(self.pagination, PaginationRule::Probe { .. }) {
            if self.listing.entry.trim().is_empty() {
                return Err(bad("listing.entry is required".into()));
            }
            compile_selector(&self.listing.entry)?;
        }
        validate_fields(&self.fields).map_err(|e| bad(e.to_string()))?;

        match &self.pagination {
            PaginationRule::NextLink { selector, max_pages, .. } => {
                compile_selector(selector)?;
                if *max_pages == 0 {
                    return Err(bad("next_link max_pages must be at least 1".into()));
                }
            }
            PaginationRule::PageParam {
                param,
                first,
                last,
                discover,
            } => {
                if param.trim().is_empty() {
                    return Err(bad("page_param needs a parameter name".into()));
                }
                if let Some(last) = last {
                    if last < first {
                        return Err(bad(format!("page_param range {first}..={last} is empty")));
                    }
                }
                if let Some(discover) = discover {
                    compile_selector(discover)?;
                }
            }
            PaginationRule::Sections { selector, pages } => {
                compile_selector(selector)?;
                if let Some(pages) = pages {
                    compile_selector(pages)?;
                }
            }
            PaginationRule::Single | PaginationRule::Template { .. } | PaginationRule::Probe { .. } => {}
        }

        match &self.pdf {
            PdfRule::Listing => {}
            PdfRule::DetailPage { selector, fields } => {
                compile_selector(selector)?;
                validate_fields(fields).map_err(|e| bad(e.to_string()))?;
            }
            PdfRule::Rewrite { from, .. } => {
                if from.is_empty() {
                    return Err(bad("rewrite needs a non-empty `from`".into()));
                }
            }
            PdfRule::PrintDetail { fields } => {
                if self.fetch != FetchMode::Browser {
                    return Err(bad("print_detail requires `fetch: browser`".into()));
                }
                validate_fields(fields).map_err(|e| bad(e.to_string()))?;
            }
        }
        Ok(())
    }
}

/// The document URL a `probe` rule requests for act `n` of `year`.
pub fn probe_document_url(template: &str, year: i32, n: u32) -> String {
    template
        .replace(YEAR_PLACEHOLDER, &year.to_string())
        .replace(PAGE_PLACEHOLDER, &n.to_string())
}

fn validate_fields(fields: &FieldSelectors) -> Result<(), ScrapeError> {
    for rule in fields.rules() {
        if let Some(selector) = &rule.selector {
            compile_selector(selector)?;
        }
    }
    if let Some(pattern) = &fields.number_pattern {
        compile_number_pattern(pattern)?;
    }
    Ok(())
}

/// Compile a CSS selector, mapping failures to [`ScrapeError::Selector`].
pub fn compile_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|e| ScrapeError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Compile a `number_pattern`; it must expose exactly one capture group.
pub fn compile_number_pattern(pattern: &str) -> Result<Regex, ScrapeError> {
    let re = Regex::new(pattern)
        .map_err(|e| ScrapeError::Config(format!("number_pattern `{pattern}`: {e}")))?;
    if re.captures_len() != 2 {
        return Err(ScrapeError::Config(format!(
            "number_pattern `{pattern}` must have exactly one capture group"
        )));
    }
    Ok(re)
}

/// Parse and validate a regions file.
pub fn parse_regions(yaml: &str) -> Result<Vec<RegionConfig>, ScrapeError> {
    let file: RegionsFile = serde_yaml::from_str(yaml)?;
    let mut seen = HashSet::new();
    for region in &file.regions {
        region.validate()?;
        if !seen.insert(region.slug()) {
            return Err(ScrapeError::Config(format!(
                "region `{}` is defined twice",
                region.name
            )));
        }
    }
    Ok(file.regions)
}

/// Load regions from `path`, or the bundled set when no path is given.
#[instrument(level = "info", skip_all)]
pub async fn load_regions(path: Option<&Path>) -> Result<Vec<RegionConfig>, ScrapeError> {
    let regions = match path {
        Some(path) => {
            let yaml = tokio::fs::read_to_string(path).await?;
            info!(path = %path.display(), "Loading region configuration");
            parse_regions(&yaml)?
        }
        None => {
            info!("Using bundled region configuration");
            parse_regions(BUNDLED_REGIONS)?
        }
    };
    debug!(count = regions.len(), "Region configuration validated");
    Ok(regions)
}

/// Pick regions by name or slug, case-insensitively. An empty request
/// selects every region.
pub fn select_regions<'a>(
    regions: &'a [RegionConfig],
    requested: &[String],
) -> Result<Vec<&'a RegionConfig>, ScrapeError> {
    if requested.is_empty() {
        return Ok(regions.iter().collect());
    }
    requested
        .iter()
        .map(|want| {
            let want_slug = region_slug(want);
            regions
                .iter()
                .find(|r| r.name.eq_ignore_ascii_case(want.trim()) || r.slug() == want_slug)
                .ok_or_else(|| ScrapeError::Config(format!("unknown region `{want}`")))
        })
        .collect()
}
