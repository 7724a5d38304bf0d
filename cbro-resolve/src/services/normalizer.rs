//! Name and number canonicalization
//!
//! Pure functions, no state; safe to call from any number of workers.
//!
//! [`normalize`] turns free text (a reference's series name or a catalog
//! display name) into a [`NormalizedKey`]:
//! - Unicode compatibility fold with accents dropped
//! - Lowercase conversion
//! - Parenthesized years removed
//! - Apostrophes dropped, other punctuation replaced with space
//! - Stop tokens removed (articles, "and", "vol N", edition markers)
//! - Whitespace collapsed and trimmed
//!
//! Normalization is idempotent: the output contains no punctuation, no stop
//! tokens and no parenthesized text, so a second pass finds nothing to change.

use cbro_common::config::NormalizerSettings;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Tokens carrying no identity in series names
const STOP_TOKENS: &[&str] = &["the", "a", "an", "and", "vol", "volume", "edition"];

/// Tokens after which a number is a volume marker, not part of the name
const VOLUME_MARKERS: &[&str] = &["vol", "volume"];

static PAREN_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\d{4}\s*\)").expect("valid regex"));

static VOL_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bvol(?:ume)?\.?\s*(\d{4})\b").expect("valid regex"));

static PAREN_YEAR_CAPTURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*(\d{4})\s*\)").expect("valid regex"));

static VOL_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bvol(?:ume)?\.?\s*\d+\b").expect("valid regex"));

static TRAILING_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s:;,\-.]+$").expect("valid regex"));

static FRACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+)\s*/\s*(\d+)$").expect("valid regex"));

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?)(\d+)(?:\.(\d+))?$").expect("valid regex"));

/// Canonical comparison form of a name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split_whitespace()
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize free text into a comparable key
///
/// Total: input with no letters or digits yields an empty key.
pub fn normalize(text: &str) -> NormalizedKey {
    // Fold compatibility forms and drop accents ("Pokémon" -> "pokemon")
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let without_years = PAREN_YEAR_RE.replace_all(&folded, " ");

    let stripped: String = without_years
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}' | '`'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens = Vec::new();
    let mut after_volume_marker = false;
    for token in stripped.split_whitespace() {
        if after_volume_marker && token.chars().all(|c| c.is_ascii_digit()) {
            after_volume_marker = false;
            continue;
        }
        after_volume_marker = VOLUME_MARKERS.contains(&token);
        if STOP_TOKENS.contains(&token) {
            continue;
        }
        tokens.push(token);
    }

    NormalizedKey(tokens.join(" "))
}

/// Plausible publication year range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    pub min_year: i32,
    pub max_year: i32,
}

impl YearRange {
    pub fn new(min_year: i32, max_year: i32) -> Self {
        Self { min_year, max_year }
    }

    /// Range from settings, anchored on the current calendar year
    pub fn from_settings(settings: &NormalizerSettings) -> Self {
        let current_year = chrono::Utc::now().year();
        Self::new(settings.min_year, current_year + settings.max_years_ahead)
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }

    /// Keep a year only when plausible
    pub fn validate(&self, year: Option<i32>) -> Option<i32> {
        year.filter(|y| self.contains(*y))
    }

    /// Find a plausible year in text
    ///
    /// Recognizes "(2016)" and "Vol. 2016" only. A leading number is part of
    /// the name ("2000 AD", "1985"). Implausible values are treated as absent.
    pub fn extract_year(&self, text: &str) -> Option<i32> {
        [&*PAREN_YEAR_CAPTURE_RE, &*VOL_YEAR_RE]
            .iter()
            .filter_map(|re| re.captures(text))
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .find(|year| self.contains(*year))
    }
}

impl Default for YearRange {
    fn default() -> Self {
        Self::from_settings(&NormalizerSettings::default())
    }
}

/// Catalog search text for a raw series name
///
/// Strips volume markers, parenthesized years and trailing punctuation but
/// keeps words the catalog's own search understands. Never empty for
/// non-empty input: falls back to the trimmed raw name.
pub fn build_search_query(series_name: &str) -> String {
    let without_years = PAREN_YEAR_RE.replace_all(series_name, " ");
    let without_volume = VOL_MARKER_RE.replace_all(&without_years, " ");
    let collapsed = without_volume.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = TRAILING_PUNCT_RE.replace(&collapsed, "");

    if trimmed.trim().is_empty() {
        series_name.trim().to_string()
    } else {
        trimmed.trim().to_string()
    }
}

/// Canonical form of an issue number
///
/// - Leading zeros stripped: "001" -> "1", "1.50" -> "1.5"
/// - Vulgar fractions: "½" -> "0.5", "1½" -> "1.5"
/// - Slash fractions: "1/2" -> "0.5"
/// - Anything else ("Annual 1", "AU") is trimmed with whitespace collapsed
pub fn normalize_issue_number(issue: &str) -> String {
    let trimmed = issue.trim().trim_start_matches('#').trim();

    if let Some(value) = vulgar_fraction_value(trimmed) {
        return format_decimal(value);
    }

    if let Some(caps) = FRACTION_RE.captures(trimmed) {
        let numerator = caps[1].parse::<f64>().ok();
        let denominator = caps[2].parse::<f64>().ok().filter(|d| *d != 0.0);
        if let (Some(n), Some(d)) = (numerator, denominator) {
            return format_decimal(n / d);
        }
    }

    if let Some(caps) = DECIMAL_RE.captures(trimmed) {
        let sign = &caps[1];
        let whole = caps[2].trim_start_matches('0');
        let whole = if whole.is_empty() { "0" } else { whole };
        let fraction = caps.get(3).map(|m| m.as_str().trim_end_matches('0')).unwrap_or("");
        let sign = if whole == "0" && fraction.is_empty() { "" } else { sign };

        return if fraction.is_empty() {
            format!("{}{}", sign, whole)
        } else {
            format!("{}{}.{}", sign, whole, fraction)
        };
    }

    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether two issue numbers denote the same issue
pub fn issue_numbers_match(a: &str, b: &str) -> bool {
    normalize_issue_number(a).eq_ignore_ascii_case(&normalize_issue_number(b))
}

fn vulgar_fraction_value(text: &str) -> Option<f64> {
    let last = text.chars().last()?;
    let fraction = match last {
        '½' => 0.5,
        '¼' => 0.25,
        '¾' => 0.75,
        '⅓' => 1.0 / 3.0,
        '⅔' => 2.0 / 3.0,
        _ => return None,
    };
    let whole_part = text[..text.len() - last.len_utf8()].trim();
    let whole = if whole_part.is_empty() {
        0.0
    } else {
        whole_part.parse::<u32>().ok()? as f64
    };
    Some(whole + fraction)
}

fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        return format!("{}", value as i64);
    }
    let rendered = format!("{:.2}", value);
    rendered.trim_end_matches('0').trim_end_matches('.').to_string()
}
