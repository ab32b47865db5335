//! Turning portal HTML into [`LawRecord`]s.
//!
//! Extraction is a two-phase affair, mirroring how the portals are laid out:
//!
//! 1. **Listing**: [`Extractor::extract_listing`] yields one record per
//!    element matching the region's `listing.entry` selector
//! 2. **Detail**: [`fill_from_detail`] completes blank fields from the act's
//!    own page, when the region needs to visit it anyway
//!
//! Missing values never fail extraction: the field stays blank and is
//! flagged in [`LawRecord::missing`].
//!
//! All functions here are synchronous and return owned data, so parsed
//! documents never live across an `.await`.

use crate::config::{FieldRule, FieldSelectors, RegionConfig, compile_number_pattern, compile_selector};
use crate::dates::{find_act_number, find_date};
use crate::error::ScrapeError;
use crate::models::LawRecord;
use crate::utils::collapse_whitespace;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, instrument};
use url::Url;

/// A bare act number as found in a dedicated column: `12`, `3/2020`, `5 bis`.
static BARE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d+(?:/\d+)?(?:\s*bis)?)\s*$").expect("static regex"));

static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// A compiled [`FieldRule`].
#[derive(Debug, Clone)]
struct Rule {
    selector: Option<Selector>,
    attr: Option<String>,
}

impl Rule {
    fn compile(rule: &FieldRule) -> Result<Self, ScrapeError> {
        Ok(Self {
            selector: rule.selector.as_deref().map(compile_selector).transpose()?,
            attr: rule.attr.clone(),
        })
    }

    /// Evaluate against `scope`. Links default to the `href` attribute,
    /// everything else to the element's collapsed text.
    fn eval(&self, scope: ElementRef<'_>, link: bool) -> Option<String> {
        let el = match &self.selector {
            Some(sel) => scope.select(sel).next()?,
            None => scope,
        };
        let attr = self.attr.as_deref().or(if link { Some("href") } else { None });
        let value = match attr {
            Some(name) => collapse_whitespace(el.value().attr(name)?),
            None => element_text(el),
        };
        (!value.is_empty()).then_some(value)
    }
}

/// Compiled [`FieldSelectors`], reusable across every page of a region.
#[derive(Debug, Clone, Default)]
pub struct CompiledFields {
    title: Option<Rule>,
    date: Option<Rule>,
    number: Option<Rule>,
    detail_link: Option<Rule>,
    pdf_link: Option<Rule>,
    number_pattern: Option<Regex>,
}

impl CompiledFields {
    pub fn compile(fields: &FieldSelectors) -> Result<Self, ScrapeError> {
        let rule = |r: &Option<FieldRule>| r.as_ref().map(Rule::compile).transpose();
        Ok(Self {
            title: rule(&fields.title)?,
            date: rule(&fields.date)?,
            number: rule(&fields.number)?,
            detail_link: rule(&fields.detail_link)?,
            pdf_link: rule(&fields.pdf_link)?,
            number_pattern: fields
                .number_pattern
                .as_deref()
                .map(compile_number_pattern)
                .transpose()?,
        })
    }

    /// True when no rule is configured at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.date.is_none()
            && self.number.is_none()
            && self.detail_link.is_none()
            && self.pdf_link.is_none()
            && self.number_pattern.is_none()
    }

    /// Number captured by `number_pattern` in the first matching URL.
    fn number_from_urls<'a>(&self, urls: impl IntoIterator<Item = &'a str>) -> Option<String> {
        let re = self.number_pattern.as_ref()?;
        urls.into_iter()
            .find_map(|u| re.captures(u).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
    }
}

/// Listing extractor for one region.
#[derive(Debug, Clone)]
pub struct Extractor {
    region: String,
    entry: Selector,
    fields: CompiledFields,
}

impl Extractor {
    pub fn new(cfg: &RegionConfig) -> Result<Self, ScrapeError> {
        Ok(Self {
            region: cfg.name.clone(),
            entry: compile_selector(&cfg.listing.entry)?,
            fields: CompiledFields::compile(&cfg.fields)?,
        })
    }

    /// One record per listing entry, numbered from `start_index`.
    ///
    /// Per field, the configured rule is tried first. Fallbacks: the entry's
    /// own text for the title; the entry text, then the title, for date and
    /// number; finally `number_pattern` over the entry's links.
    #[instrument(level = "debug", skip_all, fields(region = %self.region, page = %page_url))]
    pub fn extract_listing(&self, html: &str, page_url: &Url, start_index: usize) -> Vec<LawRecord> {
        let document = Html::parse_document(html);
        let records: Vec<LawRecord> = document
            .select(&self.entry)
            .enumerate()
            .map(|(i, entry)| self.extract_entry(entry, page_url, start_index + i))
            .collect();
        debug!(entries = records.len(), "Extracted listing page");
        records
    }

    fn extract_entry(&self, entry: ElementRef<'_>, page_url: &Url, index: usize) -> LawRecord {
        let f = &self.fields;
        let text = element_text(entry);
        let mut record = LawRecord::new(index, self.region.clone());

        record.title = match &f.title {
            Some(rule) => rule.eval(entry, false).unwrap_or_default(),
            None => text.clone(),
        };

        let date = f
            .date
            .as_ref()
            .and_then(|rule| rule.eval(entry, false))
            .and_then(|v| find_date(&v))
            .or_else(|| find_date(&text))
            .or_else(|| find_date(&record.title));
        if let Some(found) = date {
            record.date_text = found.text;
            record.publication_date = Some(found.date);
        }

        record.detail_url = f
            .detail_link
            .as_ref()
            .and_then(|rule| rule.eval(entry, true))
            .and_then(|href| resolve_link(page_url, &href));
        record.pdf_url = f
            .pdf_link
            .as_ref()
            .and_then(|rule| rule.eval(entry, true))
            .and_then(|href| resolve_link(page_url, &href));

        record.act_number = f
            .number
            .as_ref()
            .and_then(|rule| rule.eval(entry, false))
            .and_then(|v| number_from(&v))
            .or_else(|| find_act_number(&text))
            .or_else(|| find_act_number(&record.title))
            .or_else(|| f.number_from_urls(entry_links(entry)))
            .unwrap_or_default();

        record.refresh_missing();
        record
    }
}

/// Complete blank title, date and number from a detail page.
///
/// Rules are evaluated against the whole document; values already present
/// on the record are kept.
pub fn fill_from_detail(record: &mut LawRecord, html: &str, fields: &CompiledFields) {
    let document = Html::parse_document(html);
    let root = document.root_element();

    if record.title.trim().is_empty() {
        if let Some(title) = fields.title.as_ref().and_then(|r| r.eval(root, false)) {
            record.title = title;
        }
    }
    if record.publication_date.is_none() {
        if let Some(found) = fields
            .date
            .as_ref()
            .and_then(|r| r.eval(root, false))
            .and_then(|v| find_date(&v))
        {
            record.date_text = found.text;
            record.publication_date = Some(found.date);
        }
    }
    if record.act_number.trim().is_empty() {
        let number = fields
            .number
            .as_ref()
            .and_then(|r| r.eval(root, false))
            .and_then(|v| number_from(&v))
            .or_else(|| {
                let urls = [record.detail_url.as_deref(), record.pdf_url.as_deref()];
                fields.number_from_urls(urls.into_iter().flatten())
            });
        if let Some(number) = number {
            record.act_number = number;
        }
    }
    record.refresh_missing();
}

/// The record of a document found by probing: act `n` of `year`, numbered
/// `n/year`. The date comes from the file name in the `Content-Disposition`
/// header when it carries one; otherwise only the year is printed.
pub fn probe_record(region: &str, year: i32, n: u32, url: &str, disposition: Option<&str>) -> LawRecord {
    let mut record = LawRecord::new(0, region);
    record.act_number = format!("{n}/{year}");
    match disposition.and_then(|d| find_date(&d.replace('_', " "))) {
        Some(found) => {
            record.date_text = found.text;
            record.publication_date = Some(found.date);
        }
        None => record.date_text = year.to_string(),
    }
    record.pdf_url = Some(url.to_string());
    record.refresh_missing();
    record
}

/// Every distinct link in `html` matching `selector`, resolved against
/// `page_url`, in document order. Links back to `page_url` itself are left out.
pub fn find_links(html: &str, page_url: &Url, selector: &Selector) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_link(page_url, href))
        .filter(|link| link.as_str() != page_url.as_str() && seen.insert(link.clone()))
        .collect()
}

/// The first link in `html` matching `selector`, resolved against `page_url`.
pub fn find_link(html: &str, page_url: &Url, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(|el| el.value().attr("href"))
        .find_map(|href| resolve_link(page_url, href))
}

/// URL of the next listing page: the first link matching `selector` whose
/// text contains `contains` (case-insensitive), unless it points back to
/// the current page.
pub fn find_next_link(
    html: &str,
    page_url: &Url,
    selector: &Selector,
    contains: Option<&str>,
) -> Option<String> {
    let needle = contains.map(str::to_lowercase);
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter(|el| match &needle {
            Some(needle) => element_text(*el).to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| resolve_link(page_url, href))
        .find(|next| next.as_str() != page_url.as_str())
}

/// Largest `param=<n>` among the hrefs of elements matching `selector`.
pub fn discover_last_page(html: &str, page_url: &Url, selector: &Selector, param: &str) -> Option<u32> {
    let document = Html::parse_document(html);
    document
        .select(selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| page_url.join(href).ok())
        .filter_map(|url| {
            url.query_pairs()
                .find(|(k, _)| k == param)
                .and_then(|(_, v)| v.parse::<u32>().ok())
        })
        .max()
}

/// Resolve `href` against the page URL, keeping only http(s) targets.
pub fn resolve_link(page_url: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = page_url.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

fn number_from(value: &str) -> Option<String> {
    find_act_number(value).or_else(|| {
        BARE_NUMBER
            .captures(value)
            .and_then(|c| c.get(1))
            .map(|m| collapse_whitespace(m.as_str()))
    })
}

/// The entry's own href (when it is a link) followed by its descendants'.
fn entry_links(entry: ElementRef<'_>) -> Vec<&str> {
    entry
        .value()
        .attr("href")
        .into_iter()
        .chain(entry.select(&LINKS).filter_map(|a| a.value().attr("href")))
        .collect()
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}
