// file: src/models/alert.rs
use super::offset::OffsetLabel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Lifecycle of an alert entry. Only `Pending` transitions out; `Fired` and
/// `Cancelled` are terminal until the purge removes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Pending,
    Fired,
    Cancelled,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Pending => "pending",
            AlertState::Fired => "fired",
            AlertState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AlertState::Pending),
            "fired" => Ok(AlertState::Fired),
            "cancelled" => Ok(AlertState::Cancelled),
            other => Err(AppError::store_corrupted(format!(
                "Unknown alert state '{}'",
                other
            ))),
        }
    }
}

/// One scheduled reminder for a meeting. `fire_at` is derived once at
/// creation from the meeting's canonical UTC start and never recomputed from
/// local time again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    #[serde(rename = "meetingId")]
    pub meeting_id: String,
    #[serde(rename = "offsetLabel")]
    pub offset: OffsetLabel,
    #[serde(rename = "fireAtUtc")]
    pub fire_at: DateTime<Utc>,
    pub state: AlertState,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertEntry {
    pub fn new(
        meeting_id: &str,
        offset: OffsetLabel,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            offset,
            fire_at: start - offset.lead(),
            state: AlertState::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == AlertState::Pending
    }

    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.is_pending() && self.fire_at <= as_of
    }
}
