use chrono::{DateTime, TimeZone, Utc};

use crate::Error;

/// Builds a UTC timestamp from broken-down RCS/CVS date fields.
///
/// Two-digit years are 1900-based, matching rlog: `98` is 1998, and anything
/// that lands before 1970 is shifted forward a century, so `04` becomes 2004.
/// Dates that still fall before the epoch after the shift are rejected.
pub fn timestamp(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<DateTime<Utc>, Error> {
    let mut year = if year < 100 { year + 1900 } else { year };
    if year < 1970 {
        year += 100;
    }

    let invalid = || {
        Error::InvalidDate(format!(
            "{}.{:02}.{:02}.{:02}.{:02}.{:02}",
            year, month, day, hour, minute, second
        ))
    };

    if year < 1970 {
        return Err(invalid());
    }

    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_digit_years() {
        assert_eq!(
            timestamp(2021, 8, 11, 19, 8, 27).unwrap().timestamp(),
            1628708907
        );
    }

    #[test]
    fn test_two_digit_years() {
        // 98 is 1998, 04 is 2004.
        assert_eq!(
            timestamp(98, 1, 1, 0, 0, 0).unwrap(),
            timestamp(1998, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            timestamp(4, 1, 1, 0, 0, 0).unwrap(),
            timestamp(2004, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_pre_epoch() {
        assert!(timestamp(1969, 12, 31, 23, 59, 59).is_err());
    }

    #[test]
    fn test_invalid_fields() {
        assert!(timestamp(2021, 13, 1, 0, 0, 0).is_err());
        assert!(timestamp(2021, 2, 30, 0, 0, 0).is_err());
    }
}
