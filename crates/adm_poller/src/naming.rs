//! ADM file naming convention.
//!
//! Active logs are named `<prefix>_YYYY-MM-DD_HH-MM-SS.ADM`, e.g.
//! `DayZServer_X1_x64_2024-01-01_00-00-00.ADM`. When the server gives no
//! usable modification time, the stamp in the name is the only clock.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Extension of the remote log files, compared case-insensitively.
pub const LOG_EXTENSION: &str = ".adm";

static NAME_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)_(\d{4})[-_](\d{2})[-_](\d{2})[-_](\d{2})[-_](\d{2})[-_](\d{2})\.adm$")
        .expect("filename timestamp pattern is valid")
});

/// True when `name` ends in `.adm` (any case).
pub fn is_log_file(name: &str) -> bool {
    name.len() >= LOG_EXTENSION.len()
        && name
            .get(name.len() - LOG_EXTENSION.len()..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
}

/// Timestamp embedded in the file name, taken as UTC.
pub fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    let caps = NAME_TIMESTAMP.captures(name)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?;
    let datetime = date.and_hms_opt(field(4)?, field(5)?, field(6)?)?;
    Some(Utc.from_utc_datetime(&datetime))
}

/// Parses an MLSD `modify` fact or an MDTM reply value
/// (`YYYYMMDDHHMMSS` with optional fractional seconds).
pub fn parse_modify_fact(value: &str) -> Option<DateTime<Utc>> {
    let digits = value.trim().get(..14)?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Strips any directory part from a listing entry.
pub fn base_name(entry: &str) -> &str {
    entry.rsplit(['/', '\\']).next().unwrap_or(entry)
}
