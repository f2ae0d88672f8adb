//! Publish date parsing for the date formats seen in regional RSS feeds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Zone abbreviations that show up in feeds but that RFC 2822 doesn't know.
const ZONE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("UTC", "+0000"),
    ("GMT", "+0000"),
    ("EET", "+0200"),
    ("EEST", "+0300"),
    ("CET", "+0100"),
    ("CEST", "+0200"),
];

const OFFSET_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];

/// Parses a raw publish date, trying every known format in turn.
///
/// Naive timestamps are taken as UTC. Returns `None` when nothing matches;
/// callers keep the article and treat it as the oldest.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let normalized = replace_zone_abbreviation(trimmed);
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // Feeds regularly carry a weekday that doesn't match the date.
    if let Some((_, without_weekday)) = normalized.split_once(", ") {
        for format in ["%d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M %z"] {
            if let Ok(dt) = DateTime::parse_from_str(without_weekday, format) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(dt.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    None
}

fn replace_zone_abbreviation(s: &str) -> String {
    if let Some((head, tail)) = s.rsplit_once(' ') {
        for (abbr, offset) in ZONE_ABBREVIATIONS {
            if tail.eq_ignore_ascii_case(abbr) {
                return format!("{} {}", head, offset);
            }
        }
    }
    s.to_string()
}
