//! PDF date strings (`D:YYYYMMDDHHmmSSOHH'mm'`)

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

/// Format Unix milliseconds as a UTC PDF date
pub fn to_pdf_date(millis: i64) -> String {
    let datetime = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default();
    datetime.format("D:%Y%m%d%H%M%SZ").to_string()
}

/// Parse a PDF date into Unix milliseconds
///
/// Only the year is mandatory; missing fields default to the start of the
/// period and a missing offset means UTC.
pub fn parse_pdf_date(value: &str) -> Option<i64> {
    let value = value.trim();
    let value = value.strip_prefix("D:").unwrap_or(value);

    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, zone) = value.split_at(digits_end);
    if digits.len() < 4 {
        return None;
    }

    let field = |start: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + 2) {
            Some(part) => part.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits.get(0..4)?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 1)?, field(6, 1)?)?;
    let naive = date.and_hms_opt(field(8, 0)?, field(10, 0)?, field(12, 0)?)?;

    let offset = parse_offset(zone)?;
    let datetime = offset.from_local_datetime(&naive).single()?;
    Some(datetime.timestamp_millis())
}

/// `Z`, `+HH'mm'`, `-HH'mm`, `+HH` or nothing
fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let sign = match zone.chars().next() {
        None | Some('Z') | Some('z') => return FixedOffset::east_opt(0),
        Some('+') => 1,
        Some('-') => -1,
        Some(_) => return None,
    };
    let digits: String = zone[1..].chars().filter(char::is_ascii_digit).collect();
    let hours: i32 = digits.get(0..2).unwrap_or("0").parse().ok()?;
    let minutes: i32 = digits.get(2..4).unwrap_or("0").parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
