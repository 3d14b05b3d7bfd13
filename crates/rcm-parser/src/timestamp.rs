use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Claims XML carries timestamps in a small set of known formats
/// (date-only, date+time, date+time+seconds). Parse deterministically
/// against each in turn rather than guessing — an unrecognized format
/// is a hard error, not a best-effort parse.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    const FORMATS: &[&str] = &[
        "%d/%m/%Y %H:%M",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_first_datetime() {
        let dt = parse_timestamp("05/03/2026 14:30").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2026-03-05 14:30");
    }

    #[test]
    fn parses_date_only() {
        let dt = parse_timestamp("05/03/2026").unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("not-a-date").is_none());
        assert!(parse_timestamp("").is_none());
    }
}
