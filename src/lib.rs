// Meetwatch Library
// Local meeting-alert scheduling engine: computes, persists, and fires
// time-based reminders for scheduled meetings, tolerant of timezone skew
// between device, calendar backend, and UTC.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod timezone;
pub mod utils;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ScheduleConfig;
pub use dispatch::{LogNotifier, Notifier};
pub use error::{AppError, AppResult};
pub use handlers::MeetingNotice;
pub use models::{AlertEntry, AlertState, OffsetLabel};
pub use scheduler::{Scheduler, SchedulerEvent};
pub use store::ScheduleStore;
