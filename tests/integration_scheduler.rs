use chrono::{Duration, TimeZone, Utc};
use meetwatch::{
    AlertEntry, AppResult, ManualClock, Notifier, OffsetLabel, ScheduleConfig, ScheduleStore,
    Scheduler, SchedulerEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records every dispatch; optionally fails on demand.
struct RecordingNotifier {
    dispatched: Mutex<Vec<(String, OffsetLabel)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn dispatched(&self) -> Vec<(String, OffsetLabel)> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, entry: &AlertEntry) -> AppResult<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(meetwatch::AppError::dispatch("notification display unavailable"));
        }
        self.dispatched
            .lock()
            .unwrap()
            .push((entry.meeting_id.clone(), entry.offset));
        Ok(())
    }
}

struct Harness {
    store: Arc<ScheduleStore>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    scheduler: Scheduler,
}

fn harness(offsets: &[OffsetLabel]) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let store = Arc::new(ScheduleStore::in_memory(clock.clone()));
    let notifier = Arc::new(RecordingNotifier::new());
    let config = ScheduleConfig {
        offsets: offsets.to_vec(),
        max_dispatch_attempts: 3,
        ..Default::default()
    };
    let scheduler = Scheduler::new(store.clone(), notifier.clone(), clock.clone(), config);
    Harness {
        store,
        clock,
        notifier,
        scheduler,
    }
}

#[tokio::test]
async fn test_reminder_scenario_fifteen_five_now() {
    let h = harness(&[OffsetLabel::FifteenMinutes, OffsetLabel::FiveMinutes, OffsetLabel::Now]);
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
    h.store
        .upsert_meeting_alerts("standup", start, &[
            OffsetLabel::FifteenMinutes,
            OffsetLabel::FiveMinutes,
            OffsetLabel::Now,
        ])
        .await
        .unwrap();

    // 13:40 - nothing due yet.
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 13, 40, 0).unwrap());
    assert_eq!(h.scheduler.tick().await.unwrap(), 0);

    // 13:45 - the 15m reminder fires.
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 13, 45, 0).unwrap());
    assert_eq!(h.scheduler.tick().await.unwrap(), 1);

    // 13:55 - the 5m reminder fires.
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 13, 55, 0).unwrap());
    assert_eq!(h.scheduler.tick().await.unwrap(), 1);

    // 14:00 - the start-time reminder fires.
    h.clock.set(start);
    assert_eq!(h.scheduler.tick().await.unwrap(), 1);

    assert_eq!(
        h.notifier.dispatched(),
        vec![
            ("standup".to_string(), OffsetLabel::FifteenMinutes),
            ("standup".to_string(), OffsetLabel::FiveMinutes),
            ("standup".to_string(), OffsetLabel::Now),
        ]
    );
}

#[tokio::test]
async fn test_clock_jump_fires_skipped_entries_in_order_exactly_once() {
    let h = harness(&[OffsetLabel::FifteenMinutes, OffsetLabel::FiveMinutes, OffsetLabel::Now]);
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
    h.store
        .upsert_meeting_alerts("standup", start, &[
            OffsetLabel::FifteenMinutes,
            OffsetLabel::FiveMinutes,
            OffsetLabel::Now,
        ])
        .await
        .unwrap();

    // App suspended for hours; the next tick sees a time far past the meeting.
    h.clock.set(start + Duration::hours(3));
    assert_eq!(h.scheduler.tick().await.unwrap(), 3);

    // Skipped entries fire in fire-time order, not all at once out of order.
    assert_eq!(
        h.notifier.dispatched(),
        vec![
            ("standup".to_string(), OffsetLabel::FifteenMinutes),
            ("standup".to_string(), OffsetLabel::FiveMinutes),
            ("standup".to_string(), OffsetLabel::Now),
        ]
    );

    // Nothing fires twice, even if the clock then jumps backward and forward.
    h.clock.set(start - Duration::hours(1));
    assert_eq!(h.scheduler.tick().await.unwrap(), 0);
    h.clock.set(start + Duration::hours(4));
    assert_eq!(h.scheduler.tick().await.unwrap(), 0);
    assert_eq!(h.notifier.dispatched().len(), 3);
}

#[tokio::test]
async fn test_cancel_before_first_reminder_silences_meeting() {
    let h = harness(&[OffsetLabel::FifteenMinutes, OffsetLabel::FiveMinutes, OffsetLabel::Now]);
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
    h.store
        .upsert_meeting_alerts("standup", start, &[
            OffsetLabel::FifteenMinutes,
            OffsetLabel::FiveMinutes,
            OffsetLabel::Now,
        ])
        .await
        .unwrap();

    // Cancelled before 13:45; nothing ever fires.
    h.store.cancel_meeting_alerts("standup").await.unwrap();
    h.clock.set(start + Duration::hours(1));
    assert_eq!(h.scheduler.tick().await.unwrap(), 0);
    assert!(h.notifier.dispatched().is_empty());
}

#[tokio::test]
async fn test_reschedule_moves_all_fire_times() {
    let h = harness(&[OffsetLabel::FifteenMinutes, OffsetLabel::FiveMinutes, OffsetLabel::Now]);
    let offsets = [OffsetLabel::FifteenMinutes, OffsetLabel::FiveMinutes, OffsetLabel::Now];
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
    let moved = Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap();

    h.store
        .upsert_meeting_alerts("standup", start, &offsets)
        .await
        .unwrap();
    h.store
        .upsert_meeting_alerts("standup", moved, &offsets)
        .await
        .unwrap();

    // At the old fire times nothing happens.
    h.clock.set(start);
    assert_eq!(h.scheduler.tick().await.unwrap(), 0);
    assert!(h.notifier.dispatched().is_empty());

    // At the new start everything fires once.
    h.clock.set(moved);
    assert_eq!(h.scheduler.tick().await.unwrap(), 3);
    assert_eq!(h.notifier.dispatched().len(), 3);
}

#[tokio::test]
async fn test_dispatch_retry_budget_and_events() {
    let h = harness(&[OffsetLabel::Now]);
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let scheduler = Scheduler::new(
        h.store.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        ScheduleConfig {
            offsets: vec![OffsetLabel::Now],
            max_dispatch_attempts: 3,
            ..Default::default()
        },
    )
    .with_events(tx);

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
    h.store
        .upsert_meeting_alerts("standup", start, &[OffsetLabel::Now])
        .await
        .unwrap();
    h.clock.set(start);
    h.notifier.set_failing(true);

    // Two failing ticks report retries, the third abandons the entry.
    scheduler.tick().await.unwrap();
    scheduler.tick().await.unwrap();
    scheduler.tick().await.unwrap();

    let mut failed = 0;
    let mut abandoned = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            SchedulerEvent::DispatchFailed { attempts, .. } => {
                failed += 1;
                assert!(attempts < 3);
            }
            SchedulerEvent::DispatchAbandoned(entry) => {
                abandoned += 1;
                assert_eq!(entry.meeting_id, "standup");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(failed, 2);
    assert_eq!(abandoned, 1);

    // Force-closed: recovery of the notifier changes nothing.
    h.notifier.set_failing(false);
    assert_eq!(scheduler.tick().await.unwrap(), 0);
    assert!(h.notifier.dispatched().is_empty());
}

#[tokio::test]
async fn test_event_channel_reports_fired_alerts() {
    let h = harness(&[OffsetLabel::Now]);
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let scheduler = Scheduler::new(
        h.store.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        ScheduleConfig {
            offsets: vec![OffsetLabel::Now],
            ..Default::default()
        },
    )
    .with_events(tx);

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap();
    h.store
        .upsert_meeting_alerts("standup", start, &[OffsetLabel::Now])
        .await
        .unwrap();
    h.clock.set(start);
    scheduler.tick().await.unwrap();

    match rx.try_recv().unwrap() {
        SchedulerEvent::AlertFired(entry) => {
            assert_eq!(entry.meeting_id, "standup");
            assert_eq!(entry.offset, OffsetLabel::Now);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_run_loop_stops_on_cancellation() {
    let h = harness(&[OffsetLabel::Now]);
    let shutdown = tokio_util::sync::CancellationToken::new();
    let token = shutdown.clone();

    let handle = tokio::spawn(async move { h.scheduler.run(token).await });
    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("scheduler loop did not stop after cancellation")
        .unwrap();
}
