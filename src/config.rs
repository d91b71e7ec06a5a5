//! Scheduler configuration.
//!
//! Read from environment variables with sane defaults; validated before the
//! scheduler starts. The active offset set is configuration, drawn from the
//! fixed `OffsetLabel` vocabulary.

use crate::error::{AppError, AppResult};
use crate::models::OffsetLabel;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Alert offsets scheduled for every meeting.
    pub offsets: Vec<OffsetLabel>,
    /// Pause between scheduler ticks. Short enough for sub-minute accuracy.
    pub tick_interval: Duration,
    /// How long Fired/Cancelled entries are kept before the purge removes them.
    pub retention: chrono::Duration,
    /// Dispatch attempts per entry before it is force-closed.
    pub max_dispatch_attempts: u32,
    /// Upper bound on any single persistence write.
    pub persist_timeout: Duration,
    /// Schedule database location; `None` uses the platform data directory.
    pub db_path: Option<PathBuf>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            offsets: OffsetLabel::ALL.to_vec(),
            tick_interval: Duration::from_secs(15),
            retention: chrono::Duration::hours(24),
            max_dispatch_attempts: 3,
            persist_timeout: Duration::from_secs(5),
            db_path: None,
        }
    }
}

impl ScheduleConfig {
    /// Build a configuration from `MEETWATCH_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("MEETWATCH_TICK_SECS") {
            let secs: u64 = raw
                .parse()
                .map_err(|_| AppError::config(format!("MEETWATCH_TICK_SECS is not a number: '{}'", raw)))?;
            config.tick_interval = Duration::from_secs(secs);
        }

        if let Ok(raw) = env::var("MEETWATCH_RETENTION_HOURS") {
            let hours: i64 = raw.parse().map_err(|_| {
                AppError::config(format!("MEETWATCH_RETENTION_HOURS is not a number: '{}'", raw))
            })?;
            config.retention = chrono::Duration::hours(hours);
        }

        if let Ok(raw) = env::var("MEETWATCH_MAX_DISPATCH_ATTEMPTS") {
            let attempts: u32 = raw.parse().map_err(|_| {
                AppError::config(format!(
                    "MEETWATCH_MAX_DISPATCH_ATTEMPTS is not a number: '{}'",
                    raw
                ))
            })?;
            config.max_dispatch_attempts = attempts;
        }

        if let Ok(raw) = env::var("MEETWATCH_OFFSETS") {
            let mut offsets = Vec::new();
            for part in raw.split(',') {
                offsets.push(part.parse::<OffsetLabel>()?);
            }
            config.offsets = offsets;
        }

        if let Ok(raw) = env::var("MEETWATCH_DB_PATH") {
            config.db_path = Some(PathBuf::from(raw));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.offsets.is_empty() {
            return Err(AppError::config("At least one alert offset must be configured"));
        }
        let unique: HashSet<_> = self.offsets.iter().collect();
        if unique.len() != self.offsets.len() {
            return Err(AppError::config("Alert offsets must not repeat"));
        }
        if self.tick_interval.is_zero() {
            return Err(AppError::config("Tick interval must be greater than zero"));
        }
        if self.max_dispatch_attempts == 0 {
            return Err(AppError::config("Max dispatch attempts must be at least 1"));
        }
        if self.retention <= chrono::Duration::zero() {
            return Err(AppError::config("Retention window must be positive"));
        }
        Ok(())
    }

    /// Default database location under the platform data directory.
    pub fn default_db_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meetwatch")
            .join("schedule.db")
    }
}
