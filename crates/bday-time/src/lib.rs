//! Time & timezone service (design §4.1).
//!
//! Pure and stateless: every function here is a deterministic conversion with
//! no I/O and no wall-clock reads. Callers own "now" (see `bday-core::Clock`);
//! this crate only ever converts between local wall time and UTC instants.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeError {
    #[error("timezone is not a recognized IANA zone: {0}")]
    InvalidZone(String),
    #[error("no local wall-clock resolution found within the DST search window for {0} in {1}")]
    UnresolvableLocalTime(NaiveDate, String),
}

/// Returns `true` if `zone` resolves against the IANA tz database.
pub fn validate_zone(zone: &str) -> bool {
    Tz::from_str(zone).is_ok()
}

fn parse_zone(zone: &str) -> Result<Tz, TimeError> {
    Tz::from_str(zone).map_err(|_| TimeError::InvalidZone(zone.to_string()))
}

/// How far past a DST "spring forward" gap we're willing to search for the
/// first wall-clock instant that exists. Real-world gaps are at most a few
/// hours (some historical zone transitions are longer); this window is
/// generous without risking an unbounded loop on a malformed zone.
const DST_GAP_SEARCH_WINDOW_MINUTES: i64 = 6 * 60;

/// Converts a local wall-clock date + time in `zone` to the UTC instant.
///
/// If the wall time falls inside a DST "spring forward" gap (it does not
/// exist in `zone`), the policy is to snap forward to the first wall-clock
/// instant that *does* exist at or after the requested time, and return its
/// UTC instant. Since birthday deliveries fire at 09:00 local and spring
/// forward gaps are conventionally in the 00:00-04:00 range, this path is
/// rarely taken in practice but must still behave correctly.
pub fn local_to_utc(
    date: NaiveDate,
    time: NaiveTime,
    zone: &str,
) -> Result<DateTime<Utc>, TimeError> {
    let tz = parse_zone(zone)?;
    let naive = date.and_time(time);

    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => Ok(dt.with_timezone(&Utc)),
        None => {
            // Gap: walk forward minute by minute until the wall clock exists
            // again, then use that (shifted) local instant.
            for step in 1..=DST_GAP_SEARCH_WINDOW_MINUTES {
                let candidate = naive + chrono::Duration::minutes(step);
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return Ok(dt.with_timezone(&Utc));
                }
            }
            Err(TimeError::UnresolvableLocalTime(date, zone.to_string()))
        }
    }
}

/// Convenience wrapper for the scheduler's fixed delivery time, 09:00 local.
pub fn local_birthday_to_utc(date: NaiveDate, zone: &str) -> Result<DateTime<Utc>, TimeError> {
    local_to_utc(date, delivery_time(), zone)
}

/// The wall-clock time every birthday event fires at.
pub fn delivery_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).expect("9:00:00 is always a valid time")
}

/// Returns the next local calendar date strictly after `reference` whose
/// month/day match `(dob_month, dob_day)`. `reference`'s own year is tried
/// first, so a month/day still ahead of `reference` within the same year is
/// returned rather than skipped to next year.
///
/// Leap-day rule: if `(dob_month, dob_day) == (2, 29)` and the candidate
/// year is not a leap year, the occurrence substitutes `(2, 28)` for that
/// year (spec §4.1, §8 boundary case).
pub fn next_occurrence(dob_month: u32, dob_day: u32, reference: NaiveDate) -> NaiveDate {
    let mut year = reference.year();
    loop {
        // First try, then fall through to the leap-day substitution below.
        if let Some(candidate) = resolve_month_day(year, dob_month, dob_day) {
            if candidate > reference {
                return candidate;
            }
        }
        year += 1;
    }
}

/// Converts a UTC instant to the local calendar date it falls on in `zone`.
/// Unlike `local_to_utc`, this direction is never ambiguous or a gap: every
/// UTC instant maps to exactly one local wall-clock reading.
pub fn utc_to_local_date(instant: DateTime<Utc>, zone: &str) -> Result<NaiveDate, TimeError> {
    let tz = parse_zone(zone)?;
    Ok(instant.with_timezone(&tz).date_naive())
}

/// Resolves `(year, month, day)` to a date, substituting Feb 28 for a Feb 29
/// request in a non-leap year.
fn resolve_month_day(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if let Some(d) = NaiveDate::from_ymd_opt(year, month, day) {
        return Some(d);
    }
    if month == 2 && day == 29 {
        return NaiveDate::from_ymd_opt(year, 2, 28);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn validate_zone_accepts_known_iana_names() {
        assert!(validate_zone("America/New_York"));
        assert!(validate_zone("Europe/London"));
        assert!(!validate_zone("Not/AZone"));
    }

    #[test]
    fn local_to_utc_new_york_edt() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let utc = local_to_utc(d, delivery_time(), "America/New_York").unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-03-15T13:00:00+00:00");
    }

    #[test]
    fn leap_day_non_leap_year_downshifts_to_feb_28() {
        let reference = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let next = next_occurrence(2, 29, reference);
        assert_eq!(next, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn leap_day_chain_eventually_lands_on_feb_29() {
        let mut reference = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let expected = [
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(),
            NaiveDate::from_ymd_opt(2027, 2, 28).unwrap(),
            NaiveDate::from_ymd_opt(2028, 2, 29).unwrap(),
        ];
        for exp in expected {
            let next = next_occurrence(2, 29, reference);
            assert_eq!(next, exp);
            reference = next;
        }
    }

    #[test]
    fn next_occurrence_is_strictly_after_reference() {
        let reference = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let next = next_occurrence(3, 15, reference);
        assert_eq!(next, NaiveDate::from_ymd_opt(2027, 3, 15).unwrap());
    }

    #[test]
    fn next_occurrence_can_land_in_references_own_year() {
        // Reference is mid-year; the target month/day is still ahead of it
        // this same year, so it must not be skipped to next year.
        let reference = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let next = next_occurrence(9, 10, reference);
        assert_eq!(next, NaiveDate::from_ymd_opt(2026, 9, 10).unwrap());
    }

    #[test]
    fn next_occurrence_rolls_to_next_year_when_already_passed() {
        let reference = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let next = next_occurrence(3, 15, reference);
        assert_eq!(next, NaiveDate::from_ymd_opt(2027, 3, 15).unwrap());
    }

    #[test]
    fn utc_to_local_date_converts_across_the_date_line() {
        // 2026-01-01T03:00:00Z is still 2025-12-31 in America/New_York (UTC-5).
        let instant = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
        let local = utc_to_local_date(instant, "America/New_York").unwrap();
        assert_eq!(local, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }

    #[test]
    fn utc_to_local_date_rejects_unknown_zone() {
        let instant = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let err = utc_to_local_date(instant, "Not/AZone").unwrap_err();
        assert!(matches!(err, TimeError::InvalidZone(_)));
    }

    #[test]
    fn invalid_zone_is_rejected() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let err = local_to_utc(d, delivery_time(), "Mars/OlympusMons").unwrap_err();
        assert!(matches!(err, TimeError::InvalidZone(_)));
    }

    #[test]
    fn dst_spring_forward_gap_snaps_forward() {
        // America/New_York springs forward at 2026-03-08 02:00 -> 03:00.
        // 09:00 local is unaffected (outside the 02:00-03:00 gap), so the
        // standard path resolves it directly.
        let d = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let utc = local_to_utc(d, delivery_time(), "America/New_York").unwrap();
        // EDT began at the same instant; 09:00 EDT = 13:00 UTC.
        assert_eq!(utc.to_rfc3339(), "2026-03-08T13:00:00+00:00");

        // A wall time that DOES fall inside the gap must still resolve by
        // snapping forward to the next valid instant rather than erroring.
        let gap_time = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let resolved = local_to_utc(d, gap_time, "America/New_York");
        assert!(resolved.is_ok());
    }
}
