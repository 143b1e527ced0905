//! OpenMRS date/time formats.
//!
//! The backend emits `2024-03-01T10:00:00.000+0000` (offset without a colon). Renderers send
//! RFC 3339 or plain `YYYY-MM-DD` dates. Everything is compared as a UTC instant.

use crate::{OpenmrsError, OpenmrsResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const OPENMRS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";
const OPENMRS_WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Parse any of the date shapes seen on the wire into a UTC instant.
///
/// Plain dates are taken as midnight UTC; naive date-times as UTC.
pub fn parse_instant(input: &str) -> OpenmrsResult<DateTime<Utc>> {
    let trimmed = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, OPENMRS_FORMAT) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(parsed.and_utc());
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = parsed.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    Err(OpenmrsError::InvalidDate(input.to_string()))
}

/// Render an instant the way the backend expects it.
pub fn format_openmrs(instant: &DateTime<Utc>) -> String {
    instant.format(OPENMRS_WRITE_FORMAT).to_string()
}

/// Whether two wire strings denote the same instant.
///
/// Falls back to string equality when either side does not parse.
pub fn same_instant(left: &str, right: &str) -> bool {
    match (parse_instant(left), parse_instant(right)) {
        (Ok(l), Ok(r)) => l == r,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_backend_and_renderer_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().expect("valid");

        assert_eq!(parse_instant("2024-03-01T10:00:00.000+0000").expect("openmrs"), expected);
        assert_eq!(parse_instant("2024-03-01T10:00:00Z").expect("rfc3339"), expected);
        assert_eq!(parse_instant("2024-03-01T12:00:00+02:00").expect("offset"), expected);
        assert_eq!(
            parse_instant("2024-03-01").expect("date"),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).single().expect("valid")
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_instant("yesterday"), Err(OpenmrsError::InvalidDate(_))));
    }

    #[test]
    fn same_instant_ignores_representation() {
        assert!(same_instant("2024-03-01T10:00:00.000+0000", "2024-03-01T10:00:00Z"));
        assert!(!same_instant("2024-03-01", "2024-03-02"));
    }

    #[test]
    fn formats_for_backend() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single().expect("valid");
        assert_eq!(format_openmrs(&instant), "2024-03-01T10:00:00.000+0000");
    }
}
