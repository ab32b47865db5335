//! Text cleanup, naming helpers and the output-directory probe.

use crate::error::ScrapeError;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Collapse every run of whitespace (including newlines and `&nbsp;`) to
/// a single space and trim the ends.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(collapse_whitespace("  Legge\n regionale\u{a0} 3 "), "Legge regionale 3");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shorten `s` to at most `max` bytes for a log line, cut on a char
/// boundary, with the dropped byte count appended as `…(+N bytes)`.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Replace characters that are invalid in file names on common platforms.
///
/// `\ / * ? : " < > |` become `_`; control characters are dropped.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(clean_filename("Lazio_4/2020_2020-01-01.pdf"), "Lazio_4_2020_2020-01-01.pdf");
/// ```
pub fn clean_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// Build the prefix used in PDF file names from a region name.
///
/// Spaces and apostrophes are removed: `"Valle d'Aosta"` → `"ValledAosta"`.
pub fn file_prefix(region: &str) -> String {
    clean_filename(
        &region
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '’')
            .collect::<String>(),
    )
}

/// Convert a region name to a lowercase ASCII slug for directory names.
///
/// Accented vowels are folded, every other non-alphanumeric run becomes a
/// single underscore.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(region_slug("Friuli-Venezia Giulia"), "friuli_venezia_giulia");
/// assert_eq!(region_slug("Valle d'Aosta"), "valle_d_aosta");
/// ```
pub fn region_slug(region: &str) -> String {
    let mut slug = String::with_capacity(region.len());
    let mut pending_sep = false;
    for c in region.chars() {
        let folded = match c {
            'à' | 'á' | 'À' | 'Á' => 'a',
            'è' | 'é' | 'È' | 'É' => 'e',
            'ì' | 'í' | 'Ì' | 'Í' => 'i',
            'ò' | 'ó' | 'Ò' | 'Ó' => 'o',
            'ù' | 'ú' | 'Ù' | 'Ú' => 'u',
            other => other,
        };
        if folded.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(folded.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Create `path` if needed and prove it accepts writes by creating and
/// removing a probe file. Fails with [`ScrapeError::Io`] otherwise.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), ScrapeError> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
