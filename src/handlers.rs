//! Collaborator-facing handlers.
//!
//! The calendar component delivers meeting create/update/delete events as
//! `MeetingNotice` payloads with a local wall time and a device timezone;
//! these handlers normalize to canonical UTC and drive the schedule store.

use log::info;
use serde::{Deserialize, Serialize};

use crate::config::ScheduleConfig;
use crate::error::{AppError, AppResult};
use crate::models::AlertEntry;
use crate::store::ScheduleStore;
use crate::timezone;

/// Meeting create/update payload from the calendar collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingNotice {
    #[serde(rename = "meetingId")]
    pub meeting_id: String,
    /// Local wall time, `YYYY-MM-DDTHH:MM[:SS]`.
    #[serde(rename = "startLocalTime")]
    pub start_local_time: String,
    /// IANA timezone name, e.g. `America/New_York`.
    #[serde(rename = "deviceTimeZone")]
    pub device_time_zone: String,
}

/// Schedule (or reschedule) a meeting's alerts. The local start time is
/// converted to canonical UTC exactly once, here; everything downstream
/// works in UTC.
pub async fn handle_meeting_scheduled(
    store: &ScheduleStore,
    config: &ScheduleConfig,
    notice: &MeetingNotice,
) -> AppResult<Vec<AlertEntry>> {
    let tz: chrono_tz::Tz = notice.device_time_zone.parse().map_err(|_| {
        AppError::invalid_date(format!("Unknown timezone '{}'", notice.device_time_zone))
    })?;
    let start = timezone::to_canonical_utc(&notice.start_local_time, tz)?;

    info!(
        "Scheduling {} alerts for meeting {} starting at {}",
        config.offsets.len(),
        notice.meeting_id,
        start
    );
    store
        .upsert_meeting_alerts(&notice.meeting_id, start, &config.offsets)
        .await
}

/// Drop a deleted meeting's alerts. Safe for ids the store has never seen.
pub async fn handle_meeting_cancelled(store: &ScheduleStore, meeting_id: &str) -> AppResult<()> {
    info!("Cancelling alerts for meeting {}", meeting_id);
    store.cancel_meeting_alerts(meeting_id).await
}
