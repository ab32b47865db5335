//! Italian date and act-number recognition.
//!
//! Portals print dates either spelled out (`9 dicembre 2025`, `1° marzo
//! 2020`) or numerically (`08/01/2025`, `08-01-2025`, `08.01.2025`). Act
//! numbers appear as `n. 12`, `n.12`, `n° 12` or `numero 12`. Nothing here
//! fails: text that carries no recognisable value yields `None`.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

/// Italian month names, in calendar order.
pub const ITALIAN_MONTHS: [&str; 12] = [
    "gennaio",
    "febbraio",
    "marzo",
    "aprile",
    "maggio",
    "giugno",
    "luglio",
    "agosto",
    "settembre",
    "ottobre",
    "novembre",
    "dicembre",
];

static SPELLED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\s*(?:°|º|o\b)?\s+(gennaio|febbraio|marzo|aprile|maggio|giugno|luglio|agosto|settembre|ottobre|novembre|dicembre)\s+(\d{4})\b",
    )
    .expect("static regex")
});

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4})\b").expect("static regex"));

static ACT_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bn\s*(?:\.|°|º)?|\bnumero|\bnr\.?)\s*(\d+(?:/\d+)?(?:\s*bis)?)\b")
        .expect("static regex")
});

/// A date found in free text: the substring as printed and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateMatch {
    pub text: String,
    pub date: NaiveDate,
}

/// Month number (1-12) for an Italian month name, case-insensitive.
pub fn month_number(name: &str) -> Option<u32> {
    let lower = name.trim().to_lowercase();
    ITALIAN_MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|i| i as u32 + 1)
}

/// Find the earliest valid date in `text`.
///
/// Both the spelled-out and the numeric forms are scanned; of the valid
/// candidates the one that starts first in the text wins. Candidates that
/// are not real calendar dates (`31 febbraio 2020`) are ignored.
pub fn find_date(text: &str) -> Option<DateMatch> {
    let spelled = SPELLED_DATE.captures_iter(text).find_map(|caps| {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let whole = caps.get(0)?;
        Some((whole.start(), DateMatch { text: normalize_spaces(whole.as_str()), date }))
    });

    let numeric = NUMERIC_DATE.captures_iter(text).find_map(|caps| {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let whole = caps.get(0)?;
        Some((whole.start(), DateMatch { text: whole.as_str().to_string(), date }))
    });

    match (spelled, numeric) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a.1 } else { b.1 }),
        (Some(a), None) => Some(a.1),
        (None, Some(b)) => Some(b.1),
        (None, None) => None,
    }
}

/// Parse a date from text, discarding the matched substring.
pub fn parse_italian_date(text: &str) -> Option<NaiveDate> {
    find_date(text).map(|m| m.date)
}

/// Render a date the way Italian bulletins print it: `9 dicembre 2025`.
pub fn format_italian(date: NaiveDate) -> String {
    format!(
        "{} {} {}",
        date.day(),
        ITALIAN_MONTHS[date.month0() as usize],
        date.year()
    )
}

/// Find the first act number (`n. 12`, `numero 12`, `n° 3/2020`) in `text`.
pub fn find_act_number(text: &str) -> Option<String> {
    ACT_NUMBER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| normalize_spaces(m.as_str()))
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_number() {
        assert_eq!(month_number("gennaio"), Some(1));
        assert_eq!(month_number("Dicembre"), Some(12));
        assert_eq!(month_number("december"), None);
    }

    #[test]
    fn test_spelled_dates() {
        assert_eq!(parse_italian_date("12 gennaio 2023"), Some(ymd(2023, 1, 12)));
        assert_eq!(
            parse_italian_date("Legge regionale 25 Luglio 2025, n.9"),
            Some(ymd(2025, 7, 25))
        );
        assert_eq!(parse_italian_date("1° dicembre 2025"), Some(ymd(2025, 12, 1)));
        assert_eq!(parse_italian_date("1º marzo 2020"), Some(ymd(2020, 3, 1)));
    }

    #[test]
    fn test_numeric_dates() {
        assert_eq!(parse_italian_date("n. 3 del 08/01/2025"), Some(ymd(2025, 1, 8)));
        assert_eq!(parse_italian_date("8-1-2025"), Some(ymd(2025, 1, 8)));
        assert_eq!(parse_italian_date("BUR 08.01.2025"), Some(ymd(2025, 1, 8)));
    }

    #[test]
    fn test_matched_text_is_kept_as_printed() {
        let m = find_date("Legge regionale 9   dicembre 2025, n. 30").unwrap();
        assert_eq!(m.text, "9 dicembre 2025");
        assert_eq!(m.date, ymd(2025, 12, 9));
    }

    #[test]
    fn test_earliest_date_wins() {
        let m = find_date("pubblicata il 02/03/2021, legge 1 febbraio 2021").unwrap();
        assert_eq!(m.date, ymd(2021, 3, 2));
    }

    #[test]
    fn test_invalid_calendar_dates_are_skipped() {
        assert_eq!(parse_italian_date("31 febbraio 2020"), None);
        assert_eq!(
            parse_italian_date("31 febbraio 2020 poi 1 marzo 2020"),
            Some(ymd(2020, 3, 1))
        );
        assert_eq!(parse_italian_date("45/13/2020"), None);
    }

    #[test]
    fn test_malformed_input_yields_none() {
        assert_eq!(parse_italian_date(""), None);
        assert_eq!(parse_italian_date("senza data"), None);
        assert_eq!(parse_italian_date("gennaio 2023"), None);
    }

    #[test]
    fn test_format_italian() {
        assert_eq!(format_italian(ymd(2025, 12, 9)), "9 dicembre 2025");
        assert_eq!(format_italian(ymd(1979, 1, 31)), "31 gennaio 1979");
    }

    #[test]
    fn test_act_numbers() {
        assert_eq!(find_act_number("Legge regionale 25 luglio 2025, n.9"), Some("9".into()));
        assert_eq!(find_act_number("n. 3 del 08/01/2025"), Some("3".into()));
        assert_eq!(find_act_number("L.R. n° 12"), Some("12".into()));
        assert_eq!(find_act_number("legge numero 45 del 2019"), Some("45".into()));
        assert_eq!(find_act_number("Regolamento n. 4/2020"), Some("4/2020".into()));
    }

    #[test]
    fn test_act_number_ignores_words_ending_in_n() {
        assert_eq!(find_act_number("Legge regionale 12 maggio 2020"), None);
        assert_eq!(find_act_number("in 2025"), None);
    }
}
