// file: src/scheduler.rs
//! Cooperative scheduling loop.
//!
//! Evaluates the schedule on a timer tick or on demand (`tick`), dispatches
//! due alerts in deterministic order, and reports progress on an optional
//! event channel. Tolerates arbitrary clock jumps: entries fire exactly once
//! and nothing inside a skipped interval is lost.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::Sender;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::ScheduleConfig;
use crate::dispatch::Notifier;
use crate::error::AppResult;
use crate::models::AlertEntry;
use crate::store::ScheduleStore;

#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    AlertFired(AlertEntry),
    DispatchFailed { entry: AlertEntry, attempts: u32 },
    /// Dispatch kept failing and the entry was force-closed to avoid an
    /// infinite retry storm.
    DispatchAbandoned(AlertEntry),
    Error(String),
}

pub struct Scheduler {
    store: Arc<ScheduleStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: ScheduleConfig,
    events: Option<Sender<SchedulerEvent>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<ScheduleStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
            events: None,
        }
    }

    /// Attach an event channel so a host can observe fired alerts and
    /// dispatch failures.
    pub fn with_events(mut self, sender: Sender<SchedulerEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Timer-driven loop. Runs until the token is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting alert scheduler loop");

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown signal received, stopping scheduler loop");
                break;
            }

            match self.tick().await {
                Ok(fired) => {
                    if fired > 0 {
                        debug!("Scheduler tick dispatched {} alerts", fired);
                    }
                }
                Err(e) => {
                    error!("Error in scheduler tick: {}", e);
                    self.emit(SchedulerEvent::Error(e.to_string())).await;
                }
            }

            tokio::select! {
                _ = sleep(self.config.tick_interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received during sleep, stopping scheduler loop");
                    break;
                }
            }
        }

        info!("Alert scheduler loop stopped gracefully");
    }

    /// One evaluation pass. Public so host wake events (an OS background
    /// task, say) can drive the scheduler without the timer loop.
    ///
    /// `now` is read once so all entries in this pass agree on the time.
    /// Returns the number of alerts dispatched successfully.
    pub async fn tick(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let due = self.store.list_due_entries(now).await;

        let mut fired = 0;
        for entry in due {
            // One entry's failure must not block the rest of the tick.
            match self.process_due_entry(&entry).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Failed handling due alert for meeting {} ({}): {}",
                        entry.meeting_id, entry.offset, e
                    );
                    self.emit(SchedulerEvent::Error(e.to_string())).await;
                }
            }
        }

        self.store.purge_stale(self.config.retention, now).await?;
        Ok(fired)
    }

    async fn process_due_entry(&self, entry: &AlertEntry) -> AppResult<bool> {
        match self.notifier.dispatch(entry) {
            Ok(()) => {
                let transitioned = self
                    .store
                    .mark_fired(&entry.meeting_id, entry.offset)
                    .await?;
                if transitioned {
                    info!(
                        "Fired {} alert for meeting {} (due {})",
                        entry.offset, entry.meeting_id, entry.fire_at
                    );
                    self.emit(SchedulerEvent::AlertFired(entry.clone())).await;
                }
                Ok(transitioned)
            }
            Err(e) => {
                warn!(
                    "Dispatch failed for meeting {} ({}): {}",
                    entry.meeting_id, entry.offset, e
                );
                let attempts = self
                    .store
                    .record_dispatch_failure(&entry.meeting_id, entry.offset)
                    .await?;
                if attempts >= self.config.max_dispatch_attempts {
                    warn!(
                        "Giving up on {} alert for meeting {} after {} attempts",
                        entry.offset, entry.meeting_id, attempts
                    );
                    self.store.mark_fired(&entry.meeting_id, entry.offset).await?;
                    self.emit(SchedulerEvent::DispatchAbandoned(entry.clone()))
                        .await;
                } else if attempts > 0 {
                    self.emit(SchedulerEvent::DispatchFailed {
                        entry: entry.clone(),
                        attempts,
                    })
                    .await;
                }
                Ok(false)
            }
        }
    }

    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatch::MockNotifier;
    use crate::models::{AlertState, OffsetLabel};
    use chrono::{Duration, TimeZone, Utc};

    fn setup(
        offsets: &[OffsetLabel],
    ) -> (Arc<ScheduleStore>, Arc<ManualClock>, ScheduleConfig) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(ScheduleStore::in_memory(clock.clone()));
        let config = ScheduleConfig {
            offsets: offsets.to_vec(),
            ..Default::default()
        };
        (store, clock, config)
    }

    #[tokio::test]
    async fn test_tick_fires_due_entry_once() {
        let (store, clock, config) = setup(&[OffsetLabel::Now]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
        store
            .upsert_meeting_alerts("m1", start, &config.offsets)
            .await
            .unwrap();

        let mut mock = MockNotifier::new();
        mock.expect_dispatch().times(1).returning(|_| Ok(()));
        let scheduler = Scheduler::new(store.clone(), Arc::new(mock), clock.clone(), config);

        // Nothing due yet.
        assert_eq!(scheduler.tick().await.unwrap(), 0);

        clock.set(start);
        assert_eq!(scheduler.tick().await.unwrap(), 1);

        // Already fired; a later tick must not dispatch again.
        clock.advance(Duration::minutes(1));
        assert_eq!(scheduler.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_retries_then_abandons() {
        let (store, clock, mut config) = setup(&[OffsetLabel::Now]);
        config.max_dispatch_attempts = 3;
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
        store
            .upsert_meeting_alerts("m1", start, &config.offsets)
            .await
            .unwrap();
        clock.set(start);

        let mut mock = MockNotifier::new();
        mock.expect_dispatch()
            .times(3)
            .returning(|_| Err(crate::error::AppError::dispatch("display unavailable")));
        let scheduler = Scheduler::new(store.clone(), Arc::new(mock), clock.clone(), config);

        // Three failing ticks exhaust the attempt budget.
        assert_eq!(scheduler.tick().await.unwrap(), 0);
        assert_eq!(scheduler.tick().await.unwrap(), 0);
        assert_eq!(scheduler.tick().await.unwrap(), 0);

        // The entry was force-closed; no further dispatch happens.
        assert_eq!(scheduler.tick().await.unwrap(), 0);
        let all = store.entries_for("m1").await;
        assert_eq!(all[0].state, AlertState::Fired);
        assert_eq!(all[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_failure_for_one_entry_does_not_block_others() {
        let (store, clock, config) = setup(&[OffsetLabel::Now]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
        store
            .upsert_meeting_alerts("bad", start - Duration::minutes(1), &config.offsets)
            .await
            .unwrap();
        store
            .upsert_meeting_alerts("good", start, &config.offsets)
            .await
            .unwrap();
        clock.set(start);

        let mut mock = MockNotifier::new();
        mock.expect_dispatch()
            .withf(|e: &AlertEntry| e.meeting_id == "bad")
            .returning(|_| Err(crate::error::AppError::dispatch("boom")));
        mock.expect_dispatch()
            .withf(|e: &AlertEntry| e.meeting_id == "good")
            .times(1)
            .returning(|_| Ok(()));
        let scheduler = Scheduler::new(store.clone(), Arc::new(mock), clock, config);

        assert_eq!(scheduler.tick().await.unwrap(), 1);
        assert_eq!(store.entries_for("good").await[0].state, AlertState::Fired);
    }

    #[tokio::test]
    async fn test_tick_purges_stale_entries() {
        let (store, clock, config) = setup(&[OffsetLabel::Now]);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
        store
            .upsert_meeting_alerts("m1", start, &config.offsets)
            .await
            .unwrap();
        store.cancel_meeting_alerts("m1").await.unwrap();

        let mock = MockNotifier::new();
        let scheduler = Scheduler::new(store.clone(), Arc::new(mock), clock.clone(), config);

        clock.set(start + Duration::hours(48));
        scheduler.tick().await.unwrap();
        assert!(store.entries_for("m1").await.is_empty());
    }
}
