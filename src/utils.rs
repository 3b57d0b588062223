use crate::error::{LedgerError, Result};
use chrono::{Days, NaiveDate, NaiveDateTime};
use log::warn;
use std::thread;
use std::time::Duration;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%Y%m%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d-%b-%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Spreadsheet serial day zero.
fn serial_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

/// Permissive date parser: ISO, US, European, month-name, timestamp and
/// spreadsheet-serial forms. Trailing timezone suffixes are ignored.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    let without_zone = s.trim_end_matches('Z');
    let without_zone = match without_zone.rfind('+') {
        Some(idx) if idx > 10 => &without_zone[..idx],
        _ => without_zone,
    };
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(without_zone, fmt) {
            return Some(dt.date());
        }
    }

    // Excel exports sometimes leave dates as serial day numbers
    if let Ok(serial) = s.parse::<f64>() {
        if (20_000.0..80_000.0).contains(&serial) {
            return serial_epoch().checked_add_days(Days::new(serial.trunc() as u64));
        }
    }

    None
}

pub fn parse_date_strict(raw: &str) -> Result<NaiveDate> {
    parse_date(raw).ok_or_else(|| LedgerError::DateError(format!("Unrecognised date '{}'", raw)))
}

/// Parses a numeric cell, stripping currency symbols, thousands separators,
/// percent signs and accounting-style parentheses.
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let negative = s.starts_with('(') && s.ends_with(')');
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',' | '%' | '(' | ')' | ' '))
        .collect();

    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(|n| if negative { -n } else { n })
}

/// Splits a `|`-separated config cell into trimmed, non-empty parts.
pub fn split_list(cell: &str) -> Vec<String> {
    cell.split('|')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn parse_flag(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "1"
    )
}

/// Runs `op` up to `attempts` times, doubling the delay after each transient
/// failure. Non-transient errors are returned immediately.
pub fn retry_with_backoff<T, F>(attempts: u32, initial_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, attempts, e, delay
                );
                thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
