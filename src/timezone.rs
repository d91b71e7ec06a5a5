// file: src/timezone.rs
//! Conversions between device-local wall time and canonical UTC.
//!
//! All storage and comparison in this crate use a single canonical UTC
//! instant; local-format conversion happens only at the display boundary.

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::debug;
use serde::Serialize;

use crate::error::{AppError, AppResult};

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Date and time of an instant formatted for display in a given zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalDisplay {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
}

/// Resolve a local wall-clock time in `tz` to a canonical UTC instant.
///
/// Accepts `YYYY-MM-DDTHH:MM[:SS]` with either `T` or a space separator.
/// Seconds are preserved when present. Fails on unparsable input and on wall
/// times that do not exist in the zone (DST spring-forward gap). A wall time
/// that exists twice (fall-back) resolves to the earlier instant.
pub fn to_canonical_utc(local_date_time: &str, tz: Tz) -> AppResult<DateTime<Utc>> {
    let trimmed = local_date_time.trim();
    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            AppError::invalid_date(format!(
                "Unparsable local time '{}' (expected YYYY-MM-DDTHH:MM[:SS])",
                local_date_time
            ))
        })?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(zoned) => Ok(zoned.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _latest) => {
            debug!(
                "Local time '{}' is ambiguous in {}, using earlier instant",
                trimmed, tz
            );
            Ok(earliest.with_timezone(&Utc))
        }
        LocalResult::None => Err(AppError::invalid_date(format!(
            "Local time '{}' does not exist in {} (DST gap)",
            trimmed, tz
        ))),
    }
}

/// Format an instant for display in the given zone. Pure; no global locale
/// state is touched.
pub fn to_local_display(instant: DateTime<Utc>, tz: Tz) -> LocalDisplay {
    let zoned = instant.with_timezone(&tz);
    LocalDisplay {
        date: zoned.format("%Y-%m-%d").to_string(),
        time: zoned.format("%H:%M").to_string(),
    }
}

/// Compare the calendar date of two instants in a caller-specified zone.
/// The zone is explicit because "same day" depends on where you ask.
pub fn dates_equal_ignoring_time(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> bool {
    a.with_timezone(&tz).date_naive() == b.with_timezone(&tz).date_naive()
}
