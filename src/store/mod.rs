// file: src/store/mod.rs
//! Persisted alert schedule.
//!
//! The in-memory map is authoritative; SQLite is a write-through durability
//! layer. Unreadable persisted state degrades to an empty store with a
//! reported `StoreCorrupted` error, and a failed or slow write flips the
//! store into in-memory-only mode rather than blocking the scheduling tick.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{AlertEntry, AlertState, OffsetLabel};

pub struct ScheduleStore {
    pool: Option<SqlitePool>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Vec<AlertEntry>>>,
    // Serializes writes per meeting so concurrent upserts for the same
    // meeting cannot interleave and leave stale entries behind.
    meeting_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    degraded: AtomicBool,
    recovered_from_corruption: bool,
    persist_timeout: StdDuration,
}

impl ScheduleStore {
    /// Open (creating if needed) a file-backed store and load the persisted
    /// schedule. Corrupt persisted state is reported and cleared; it never
    /// prevents the store from opening.
    pub async fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        persist_timeout: StdDuration,
    ) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        run_schema(&pool).await?;

        let mut recovered = false;
        let entries = match load_entries(&pool).await {
            Ok(map) => map,
            Err(e) => {
                error!("Persisted schedule unreadable, resetting to empty store: {}", e);
                sqlx::query("DELETE FROM alerts").execute(&pool).await?;
                recovered = true;
                HashMap::new()
            }
        };

        debug!(
            "Schedule store opened with {} persisted entries",
            entries.values().map(Vec::len).sum::<usize>()
        );

        Ok(Self {
            pool: Some(pool),
            clock,
            entries: Mutex::new(entries),
            meeting_locks: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            recovered_from_corruption: recovered,
            persist_timeout,
        })
    }

    /// Store with no persistence backend. Used for tests and as the shape the
    /// store degrades into when the backend fails.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: None,
            clock,
            entries: Mutex::new(HashMap::new()),
            meeting_locks: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
            recovered_from_corruption: false,
            persist_timeout: StdDuration::from_secs(5),
        }
    }

    /// Replace the alert set for a meeting.
    ///
    /// One Pending entry per configured offset with
    /// `fire_at = start - offset.lead()`. Pending entries for offsets no
    /// longer configured are cancelled, never left dangling. Re-invoking with
    /// identical arguments changes nothing. Returns the meeting's Pending
    /// entries.
    pub async fn upsert_meeting_alerts(
        &self,
        meeting_id: &str,
        start: DateTime<Utc>,
        offsets: &[OffsetLabel],
    ) -> AppResult<Vec<AlertEntry>> {
        let lock = self.meeting_lock(meeting_id).await;
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("{}", AppError::ConcurrentUpsert(meeting_id.to_string()));
                lock.lock().await
            }
        };

        let now = self.clock.now();
        let snapshot = {
            let mut entries = self.entries.lock().await;
            let meeting = entries.entry(meeting_id.to_string()).or_default();

            for entry in meeting.iter_mut() {
                if entry.is_pending() && !offsets.contains(&entry.offset) {
                    entry.state = AlertState::Cancelled;
                    entry.updated_at = now;
                }
            }

            for &offset in offsets {
                let fire_at = start - offset.lead();
                match meeting
                    .iter_mut()
                    .find(|e| e.is_pending() && e.offset == offset)
                {
                    Some(existing) => {
                        if existing.fire_at != fire_at {
                            existing.fire_at = fire_at;
                            existing.attempts = 0;
                            existing.updated_at = now;
                        }
                    }
                    None => meeting.push(AlertEntry::new(meeting_id, offset, start, now)),
                }
            }

            meeting.clone()
        };

        self.persist_meeting(meeting_id, &snapshot).await;

        let mut pending: Vec<AlertEntry> =
            snapshot.into_iter().filter(AlertEntry::is_pending).collect();
        pending.sort_by_key(|e| (e.fire_at, e.offset.dispatch_priority()));
        Ok(pending)
    }

    /// Cancel every Pending entry for a meeting. Unknown ids are a no-op.
    pub async fn cancel_meeting_alerts(&self, meeting_id: &str) -> AppResult<()> {
        let lock = self.meeting_lock(meeting_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let snapshot = {
            let mut entries = self.entries.lock().await;
            let Some(meeting) = entries.get_mut(meeting_id) else {
                return Ok(());
            };
            let mut changed = false;
            for entry in meeting.iter_mut() {
                if entry.is_pending() {
                    entry.state = AlertState::Cancelled;
                    entry.updated_at = now;
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
            meeting.clone()
        };

        self.persist_meeting(meeting_id, &snapshot).await;
        Ok(())
    }

    /// Pending entries due at or before `as_of`, ordered by fire time and,
    /// for equal fire times, by offset priority (`now` before `1m` before
    /// `5m` ...), so dispatch order is deterministic.
    pub async fn list_due_entries(&self, as_of: DateTime<Utc>) -> Vec<AlertEntry> {
        let entries = self.entries.lock().await;
        let mut due: Vec<AlertEntry> = entries
            .values()
            .flatten()
            .filter(|e| e.is_due(as_of))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.fire_at, e.offset.dispatch_priority()));
        due
    }

    /// Transition a Pending entry to Fired. Returns whether the transition
    /// happened, which is true at most once per entry.
    pub async fn mark_fired(&self, meeting_id: &str, offset: OffsetLabel) -> AppResult<bool> {
        let lock = self.meeting_lock(meeting_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let snapshot = {
            let mut entries = self.entries.lock().await;
            let Some(meeting) = entries.get_mut(meeting_id) else {
                return Ok(false);
            };
            let Some(entry) = meeting
                .iter_mut()
                .find(|e| e.is_pending() && e.offset == offset)
            else {
                return Ok(false);
            };
            entry.state = AlertState::Fired;
            entry.updated_at = now;
            meeting.clone()
        };

        self.persist_meeting(meeting_id, &snapshot).await;
        Ok(true)
    }

    /// Count a failed dispatch attempt against a Pending entry. Returns the
    /// new attempt count, or 0 if the entry is no longer pending.
    pub async fn record_dispatch_failure(
        &self,
        meeting_id: &str,
        offset: OffsetLabel,
    ) -> AppResult<u32> {
        let lock = self.meeting_lock(meeting_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let (attempts, snapshot) = {
            let mut entries = self.entries.lock().await;
            let Some(meeting) = entries.get_mut(meeting_id) else {
                return Ok(0);
            };
            let Some(entry) = meeting
                .iter_mut()
                .find(|e| e.is_pending() && e.offset == offset)
            else {
                return Ok(0);
            };
            entry.attempts += 1;
            entry.updated_at = now;
            (entry.attempts, meeting.clone())
        };

        self.persist_meeting(meeting_id, &snapshot).await;
        Ok(attempts)
    }

    /// Remove Fired/Cancelled entries whose last transition is older than the
    /// retention window. Pending entries are never purged.
    pub async fn purge_stale(&self, retention: Duration, as_of: DateTime<Utc>) -> AppResult<usize> {
        let cutoff = as_of - retention;
        let mut affected: Vec<String> = Vec::new();
        let mut removed = 0;
        {
            let mut entries = self.entries.lock().await;
            entries.retain(|meeting_id, meeting| {
                let before = meeting.len();
                meeting.retain(|e| e.is_pending() || e.updated_at > cutoff);
                if meeting.len() != before {
                    removed += before - meeting.len();
                    affected.push(meeting_id.clone());
                }
                !meeting.is_empty()
            });
        }

        // Persist each affected meeting under its write lock, snapshotting
        // again once the lock is held. A snapshot taken before the lock could
        // be older than a concurrent upsert's committed rows and would erase
        // its Pending entry from disk.
        for meeting_id in &affected {
            let lock = self.meeting_lock(meeting_id).await;
            let _guard = lock.lock().await;
            let snapshot = {
                let entries = self.entries.lock().await;
                entries.get(meeting_id).cloned().unwrap_or_default()
            };
            self.persist_meeting(meeting_id, &snapshot).await;
        }

        // Locks for meetings no longer in the store are dropped unless some
        // task still holds a handle to them.
        {
            let entries = self.entries.lock().await;
            let mut locks = self.meeting_locks.lock().await;
            locks.retain(|meeting_id, lock| {
                entries.contains_key(meeting_id) || Arc::strong_count(lock) > 1
            });
        }

        if removed > 0 {
            debug!("Purged {} stale alert entries", removed);
        }
        Ok(removed)
    }

    /// All entries for a meeting, any state. Mostly for hosts and tests.
    pub async fn entries_for(&self, meeting_id: &str) -> Vec<AlertEntry> {
        let entries = self.entries.lock().await;
        entries.get(meeting_id).cloned().unwrap_or_default()
    }

    /// Pending entries for a meeting, ordered by fire time.
    pub async fn pending_entries(&self, meeting_id: &str) -> Vec<AlertEntry> {
        let mut pending: Vec<AlertEntry> = self
            .entries_for(meeting_id)
            .await
            .into_iter()
            .filter(AlertEntry::is_pending)
            .collect();
        pending.sort_by_key(|e| (e.fire_at, e.offset.dispatch_priority()));
        pending
    }

    /// Whether the persistence backend has been abandoned after a failure.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Whether opening this store had to discard unreadable persisted state.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered_from_corruption
    }

    async fn meeting_lock(&self, meeting_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.meeting_locks.lock().await;
        locks
            .entry(meeting_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn persist_meeting(&self, meeting_id: &str, entries: &[AlertEntry]) {
        let Some(pool) = &self.pool else {
            return;
        };
        if self.is_degraded() {
            return;
        }

        match tokio::time::timeout(self.persist_timeout, write_meeting(pool, meeting_id, entries))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    "Persisting alerts for meeting {} failed, store is now in-memory only: {}",
                    meeting_id, e
                );
                self.degraded.store(true, Ordering::Relaxed);
            }
            Err(_) => {
                warn!(
                    "Persisting alerts for meeting {} timed out after {:?}, store is now in-memory only",
                    meeting_id, self.persist_timeout
                );
                self.degraded.store(true, Ordering::Relaxed);
            }
        }
    }
}

async fn run_schema(pool: &SqlitePool) -> AppResult<()> {
    let schema = include_str!("schema.sql");

    let mut current_statement = String::new();
    for line in schema.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || trimmed.is_empty() {
            continue;
        }

        current_statement.push_str(line);
        current_statement.push('\n');

        if trimmed.ends_with(';') {
            sqlx::query(&current_statement).execute(pool).await?;
            current_statement.clear();
        }
    }
    Ok(())
}

async fn load_entries(pool: &SqlitePool) -> AppResult<HashMap<String, Vec<AlertEntry>>> {
    let rows = sqlx::query(
        "SELECT meeting_id, offset_label, fire_at, state, attempts, created_at, updated_at FROM alerts",
    )
    .fetch_all(pool)
    .await?;

    let mut map: HashMap<String, Vec<AlertEntry>> = HashMap::new();
    for row in rows {
        let meeting_id: String = row.get("meeting_id");
        let offset_label: String = row.get("offset_label");
        let fire_at: String = row.get("fire_at");
        let state: String = row.get("state");
        let attempts: i64 = row.get("attempts");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");

        let entry = AlertEntry {
            meeting_id: meeting_id.clone(),
            offset: offset_label.parse().map_err(|_| {
                AppError::store_corrupted(format!("Unknown offset label '{}'", offset_label))
            })?,
            fire_at: parse_instant(&fire_at)?,
            state: state.parse()?,
            attempts: attempts as u32,
            created_at: parse_instant(&created_at)?,
            updated_at: parse_instant(&updated_at)?,
        };
        map.entry(meeting_id).or_default().push(entry);
    }
    Ok(map)
}

fn parse_instant(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::store_corrupted(format!("Bad timestamp '{}': {}", raw, e)))
}

async fn write_meeting(
    pool: &SqlitePool,
    meeting_id: &str,
    entries: &[AlertEntry],
) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM alerts WHERE meeting_id = ?")
        .bind(meeting_id)
        .execute(&mut *tx)
        .await?;

    for entry in entries {
        sqlx::query(
            "INSERT INTO alerts (meeting_id, offset_label, fire_at, state, attempts, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.meeting_id)
        .bind(entry.offset.as_str())
        .bind(entry.fire_at.to_rfc3339())
        .bind(entry.state.as_str())
        .bind(entry.attempts as i64)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}
