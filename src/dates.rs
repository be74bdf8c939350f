// Date parsing for enrollment ranges
//
// Input dates arrive in several precisions. They are tried from the most to
// the least specific format and reduced to a calendar date. Missing bounds are
// stored as sentinels, never NULL.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Stored start of an open-ended range.
pub const OPEN_START: NaiveDate = match NaiveDate::from_ymd_opt(1900, 1, 1) {
    Some(date) => date,
    None => panic!("invalid start sentinel"),
};

/// Stored end of an open-ended range.
pub const OPEN_END: NaiveDate = match NaiveDate::from_ymd_opt(2100, 1, 1) {
    Some(date) => date,
    None => panic!("invalid end sentinel"),
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse datetime: '{0}'")]
pub struct DateParseError(pub String);

/// Accepted layouts, most specific first.
enum Layout {
    DateTime(&'static str),
    /// Date+hour: chrono needs minutes, so ":00" is appended first.
    DateHour,
    Date(&'static str),
    /// Partial date padded to a full one before parsing.
    Padded(&'static str),
}

const LAYOUTS: &[Layout] = &[
    // `%.f` also accepts a missing fraction
    Layout::DateTime("%Y-%m-%dT%H:%M:%S%.fZ"),
    Layout::DateTime("%Y-%m-%d %H:%M:%S%.f"),
    Layout::DateTime("%Y-%m-%d %H:%M"),
    Layout::DateHour,
    Layout::Date("%Y-%m-%d"),
    Layout::Padded("-01"),
    Layout::Padded("-01-01"),
];

/// Parse a date using the fallback chain.
pub fn parse_any(input: &str) -> Result<NaiveDate, DateParseError> {
    for layout in LAYOUTS {
        let parsed = match layout {
            Layout::DateTime(fmt) => NaiveDateTime::parse_from_str(input, fmt)
                .ok()
                .map(|dt| dt.date()),
            Layout::DateHour => {
                NaiveDateTime::parse_from_str(&format!("{}:00", input), "%Y-%m-%d %H:%M")
                    .ok()
                    .map(|dt| dt.date())
            }
            Layout::Date(fmt) => NaiveDate::parse_from_str(input, fmt).ok(),
            Layout::Padded(suffix) => {
                NaiveDate::parse_from_str(&format!("{}{}", input, suffix), "%Y-%m-%d").ok()
            }
        };
        if let Some(date) = parsed {
            return Ok(date);
        }
    }
    Err(DateParseError(input.to_string()))
}

/// Range start: empty means open (1900-01-01).
pub fn parse_start(input: &str) -> Result<NaiveDate, DateParseError> {
    parse_or(input, OPEN_START)
}

/// Range end: empty means open (2100-01-01).
pub fn parse_end(input: &str) -> Result<NaiveDate, DateParseError> {
    parse_or(input, OPEN_END)
}

fn parse_or(input: &str, open: NaiveDate) -> Result<NaiveDate, DateParseError> {
    let input = input.trim();
    if input.is_empty() {
        Ok(open)
    } else {
        parse_any(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fallback_chain() {
        assert_eq!(parse_any("2020-06-15T10:20:30Z").unwrap(), ymd(2020, 6, 15));
        assert_eq!(parse_any("2020-06-15T10:20:30.000Z").unwrap(), ymd(2020, 6, 15));
        assert_eq!(parse_any("2020-06-15 10:20:30").unwrap(), ymd(2020, 6, 15));
        assert_eq!(parse_any("2020-06-15 10:20:30.5").unwrap(), ymd(2020, 6, 15));
        assert_eq!(parse_any("2020-06-15 10:20").unwrap(), ymd(2020, 6, 15));
        assert_eq!(parse_any("2020-06-15 10").unwrap(), ymd(2020, 6, 15));
        assert_eq!(parse_any("2020-06-15").unwrap(), ymd(2020, 6, 15));
        assert_eq!(parse_any("2020-06").unwrap(), ymd(2020, 6, 1));
        assert_eq!(parse_any("2020").unwrap(), ymd(2020, 1, 1));
    }

    #[test]
    fn test_unparsable() {
        assert_eq!(
            parse_any("15/06/2020").unwrap_err(),
            DateParseError("15/06/2020".to_string())
        );
        assert!(parse_any("2020-13").is_err());
        assert!(parse_any("yesterday").is_err());
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(parse_start("").unwrap(), ymd(1900, 1, 1));
        assert_eq!(parse_end("   ").unwrap(), ymd(2100, 1, 1));
        assert_eq!(parse_end(" 2020-06-15 ").unwrap(), ymd(2020, 6, 15));
    }
}
