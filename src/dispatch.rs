// file: src/dispatch.rs
//! The notification dispatcher seam.
//!
//! Platform notification display is an external collaborator; the scheduler
//! only talks to this trait. At-least-once semantics: a dispatch may arrive
//! for a meeting that was cancelled an instant earlier, and implementations
//! must treat unknown or already-handled entries as a no-op.

use log::info;

use crate::error::{AppError, AppResult};
use crate::models::AlertEntry;

#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Deliver one due alert. An error here is retried on later ticks up to
    /// the configured attempt budget.
    fn dispatch(&self, entry: &AlertEntry) -> AppResult<()>;
}

/// Dispatcher that writes alerts to the log. Used by the binary and as a
/// stand-in wherever no platform notifier is wired up.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, entry: &AlertEntry) -> AppResult<()> {
        let payload = serde_json::to_string(entry)
            .map_err(|e| AppError::dispatch(format!("Failed to serialize alert: {}", e)))?;
        info!("[Alert] {}", payload);
        Ok(())
    }
}
