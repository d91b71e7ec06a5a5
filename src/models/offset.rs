// file: src/models/offset.rs
use crate::error::AppError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reminder lead time ahead of a meeting start.
///
/// The label vocabulary is fixed; which labels are active for scheduling is
/// configuration (`ScheduleConfig::offsets`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetLabel {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "now")]
    Now,
}

impl OffsetLabel {
    pub const ALL: [OffsetLabel; 5] = [
        OffsetLabel::OneHour,
        OffsetLabel::FifteenMinutes,
        OffsetLabel::FiveMinutes,
        OffsetLabel::OneMinute,
        OffsetLabel::Now,
    ];

    /// How far ahead of the meeting start this alert fires.
    pub fn lead(&self) -> Duration {
        match self {
            OffsetLabel::OneHour => Duration::hours(1),
            OffsetLabel::FifteenMinutes => Duration::minutes(15),
            OffsetLabel::FiveMinutes => Duration::minutes(5),
            OffsetLabel::OneMinute => Duration::minutes(1),
            OffsetLabel::Now => Duration::zero(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetLabel::OneHour => "1h",
            OffsetLabel::FifteenMinutes => "15m",
            OffsetLabel::FiveMinutes => "5m",
            OffsetLabel::OneMinute => "1m",
            OffsetLabel::Now => "now",
        }
    }

    /// Tie-break order when several entries share a fire time: the entry
    /// closest to its meeting start dispatches first.
    pub fn dispatch_priority(&self) -> u8 {
        match self {
            OffsetLabel::Now => 0,
            OffsetLabel::OneMinute => 1,
            OffsetLabel::FiveMinutes => 2,
            OffsetLabel::FifteenMinutes => 3,
            OffsetLabel::OneHour => 4,
        }
    }
}

impl fmt::Display for OffsetLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetLabel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(OffsetLabel::OneHour),
            "15m" => Ok(OffsetLabel::FifteenMinutes),
            "5m" => Ok(OffsetLabel::FiveMinutes),
            "1m" => Ok(OffsetLabel::OneMinute),
            "now" => Ok(OffsetLabel::Now),
            other => Err(AppError::config(format!(
                "Unknown alert offset '{}' (expected one of 1h, 15m, 5m, 1m, now)",
                other
            ))),
        }
    }
}
