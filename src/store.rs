//! Durable local store for Habit Core.
//!
//! This module provides all device-local persistence using SQLite:
//! the pending mutation queue, the profile/settings fields, the
//! bookmark/mission/journal collections, activity counters, and the
//! per-identity reconciliation markers.
//!
//! All timestamps are Unix seconds (INTEGER). Payloads and settings
//! are stored as JSON text.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::error::{HabitError, HabitResult};
use crate::models::{
    ActivityDay, EntityKind, GuestSnapshot, LastReadPosition, MutationAction, MutationPayload,
    QueueRecord, RecordStatus, ServerSnapshot, SnapshotBookmark, SnapshotJournalEntry,
    SnapshotMission, DEFAULT_PROFILE_NAME,
};

/// Per-status and per-kind counts of queue records.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
    pub by_kind: Vec<(String, usize)>,
}

/// SQLite-backed store for all device-local state.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> HabitResult<Self> {
        let conn = Connection::open(db_path)?;

        // WAL for better concurrent access from UI readers
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;

        let mut store = Self { conn };
        store.init_store()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> HabitResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.init_store()?;
        Ok(store)
    }

    /// Initialize the schema
    pub fn init_store(&mut self) -> HabitResult<()> {
        self.conn.execute_batch(
            r#"
            -- Pending mutation queue. Insertion order is rowid order.
            CREATE TABLE IF NOT EXISTS sync_queue (
                id TEXT PRIMARY KEY,
                entity_kind TEXT NOT NULL,
                action TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_error TEXT
            );

            -- Scalar profile/settings fields, one row per key
            CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bookmarks (
                id TEXT PRIMARY KEY,
                surah INTEGER NOT NULL,
                verse INTEGER NOT NULL,
                label TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE (surah, verse)
            );

            CREATE TABLE IF NOT EXISTS completed_missions (
                mission_id TEXT PRIMARY KEY,
                completed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS journal_entries (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                mood TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS activity_days (
                date TEXT PRIMARY KEY,
                dhikr_count INTEGER NOT NULL DEFAULT 0,
                missions_completed INTEGER NOT NULL DEFAULT 0
            );

            -- One row per identity that has completed reconciliation
            CREATE TABLE IF NOT EXISTS reconciliation_markers (
                identity TEXT PRIMARY KEY,
                reconciled_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Borrow the underlying connection (tests and maintenance tooling)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Queue operations
    // =========================================================================

    /// Insert a queue record. Fails on duplicate id.
    pub fn queue_insert(&self, record: &QueueRecord) -> HabitResult<()> {
        let payload = serde_json::to_string(&record.payload)?;
        self.conn.execute(
            "INSERT INTO sync_queue (id, entity_kind, action, payload, status, retry_count, created_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.entity_kind.as_str(),
                record.action.as_str(),
                payload,
                record.status.as_str(),
                record.retry_count,
                record.created_at,
                record.last_error,
            ],
        )?;
        Ok(())
    }

    /// Number of pending records. Terminal rows awaiting the retention
    /// sweep do not count against the capacity cap.
    pub fn queue_pending_len(&self) -> HabitResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete the oldest pending record (eviction policy support).
    /// Returns the evicted id, if any record was pending.
    pub fn queue_evict_oldest_pending(&self) -> HabitResult<Option<String>> {
        let oldest: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM sync_queue WHERE status = 'pending' ORDER BY rowid LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = &oldest {
            self.conn
                .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        }
        Ok(oldest)
    }

    /// Snapshot of all pending records in insertion order.
    pub fn queue_list_pending(&self) -> HabitResult<Vec<QueueRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_kind, action, payload, status, retry_count, created_at, last_error
             FROM sync_queue WHERE status = 'pending' ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], row_to_queue_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Fetch one queue record by id.
    pub fn queue_get(&self, id: &str) -> HabitResult<Option<QueueRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, entity_kind, action, payload, status, retry_count, created_at, last_error
                 FROM sync_queue WHERE id = ?1",
                params![id],
                row_to_queue_record,
            )
            .optional()?;
        record.transpose()
    }

    /// Transition a record to a terminal status. No-op when the record
    /// is already terminal or does not exist. Returns whether a row
    /// actually changed.
    pub fn queue_set_terminal(
        &self,
        id: &str,
        status: RecordStatus,
        error: Option<&str>,
    ) -> HabitResult<bool> {
        debug_assert!(status.is_terminal());
        let changed = self.conn.execute(
            "UPDATE sync_queue SET status = ?1, last_error = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![status.as_str(), error, id],
        )?;
        Ok(changed > 0)
    }

    /// Increment the retry count on a pending record. Returns the new
    /// count, or None when the record is missing or terminal.
    pub fn queue_increment_retry(&self, id: &str) -> HabitResult<Option<u32>> {
        let changed = self.conn.execute(
            "UPDATE sync_queue SET retry_count = retry_count + 1
             WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let count: u32 = self.conn.query_row(
            "SELECT retry_count FROM sync_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(Some(count))
    }

    /// Counts by status and by entity kind. Read-only.
    pub fn queue_stats(&self) -> HabitResult<QueueStats> {
        let mut stats = QueueStats::default();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => stats.pending = count as usize,
                "synced" => stats.synced = count as usize,
                "failed" => stats.failed = count as usize,
                _ => {}
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT entity_kind, COUNT(*) FROM sync_queue GROUP BY entity_kind ORDER BY entity_kind",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            stats.by_kind.push((kind, count as usize));
        }

        Ok(stats)
    }

    /// Delete terminal (synced/failed) records created before the
    /// cutoff. Returns how many were removed.
    pub fn queue_clear_terminal_older_than(&self, cutoff: i64) -> HabitResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sync_queue WHERE status IN ('synced', 'failed') AND created_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    // =========================================================================
    // Profile / settings / last-read
    // =========================================================================

    fn state_get(&self, key: &str) -> HabitResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn state_set(&self, key: &str, value: &str) -> HabitResult<()> {
        self.conn.execute(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn profile_name(&self) -> HabitResult<String> {
        Ok(self
            .state_get("profile_name")?
            .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string()))
    }

    pub fn set_profile_name(&self, name: &str) -> HabitResult<()> {
        self.state_set("profile_name", name)
    }

    pub fn settings(&self) -> HabitResult<Map<String, Value>> {
        match self.state_get("settings")? {
            Some(json) => {
                let value: Value = serde_json::from_str(&json)?;
                match value {
                    Value::Object(map) => Ok(map),
                    _ => Err(HabitError::store_op("settings blob is not a JSON object")),
                }
            }
            None => Ok(Map::new()),
        }
    }

    pub fn set_settings(&self, settings: &Map<String, Value>) -> HabitResult<()> {
        self.state_set("settings", &serde_json::to_string(settings)?)
    }

    pub fn last_read(&self) -> HabitResult<Option<LastReadPosition>> {
        match self.state_get("last_read")? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn set_last_read(&self, position: &LastReadPosition) -> HabitResult<()> {
        self.state_set("last_read", &serde_json::to_string(position)?)
    }

    pub fn dhikr_count(&self) -> HabitResult<u32> {
        Ok(self
            .state_get("dhikr_count")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_dhikr_count(&self, count: u32) -> HabitResult<()> {
        self.state_set("dhikr_count", &count.to_string())
    }

    pub fn current_streak(&self) -> HabitResult<u32> {
        Ok(self
            .state_get("current_streak")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_current_streak(&self, streak: u32) -> HabitResult<()> {
        self.state_set("current_streak", &streak.to_string())
    }

    pub fn longest_streak(&self) -> HabitResult<u32> {
        Ok(self
            .state_get("longest_streak")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub fn set_longest_streak(&self, streak: u32) -> HabitResult<()> {
        self.state_set("longest_streak", &streak.to_string())
    }

    // =========================================================================
    // Collections
    // =========================================================================

    pub fn add_bookmark(&self, bookmark: &SnapshotBookmark) -> HabitResult<String> {
        let id = bookmark
            .cloud_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().simple().to_string());
        self.conn.execute(
            "INSERT INTO bookmarks (id, surah, verse, label, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(surah, verse) DO UPDATE SET label = excluded.label",
            params![id, bookmark.surah, bookmark.verse, bookmark.label, bookmark.created_at],
        )?;
        Ok(id)
    }

    pub fn list_bookmarks(&self) -> HabitResult<Vec<SnapshotBookmark>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, surah, verse, label, created_at FROM bookmarks ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SnapshotBookmark {
                cloud_id: Some(row.get(0)?),
                surah: row.get(1)?,
                verse: row.get(2)?,
                label: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.map(|r| r.map_err(HabitError::from)).collect()
    }

    pub fn add_completed_mission(&self, mission: &SnapshotMission) -> HabitResult<()> {
        self.conn.execute(
            "INSERT INTO completed_missions (mission_id, completed_at) VALUES (?1, ?2)
             ON CONFLICT(mission_id) DO UPDATE SET completed_at = excluded.completed_at",
            params![mission.mission_id, mission.completed_at],
        )?;
        Ok(())
    }

    pub fn list_completed_missions(&self) -> HabitResult<Vec<SnapshotMission>> {
        let mut stmt = self.conn.prepare(
            "SELECT mission_id, completed_at FROM completed_missions ORDER BY completed_at, mission_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SnapshotMission {
                mission_id: row.get(0)?,
                completed_at: row.get(1)?,
            })
        })?;
        rows.map(|r| r.map_err(HabitError::from)).collect()
    }

    pub fn add_journal_entry(&self, entry: &SnapshotJournalEntry) -> HabitResult<()> {
        self.conn.execute(
            "INSERT INTO journal_entries (id, title, body, mood, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, body = excluded.body, mood = excluded.mood",
            params![entry.id, entry.title, entry.body, entry.mood, entry.created_at],
        )?;
        Ok(())
    }

    pub fn list_journal_entries(&self) -> HabitResult<Vec<SnapshotJournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, body, mood, created_at FROM journal_entries ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SnapshotJournalEntry {
                id: row.get(0)?,
                title: row.get(1)?,
                body: row.get(2)?,
                mood: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.map(|r| r.map_err(HabitError::from)).collect()
    }

    pub fn set_activity_day(&self, day: &ActivityDay) -> HabitResult<()> {
        self.conn.execute(
            "INSERT INTO activity_days (date, dhikr_count, missions_completed) VALUES (?1, ?2, ?3)
             ON CONFLICT(date) DO UPDATE SET dhikr_count = excluded.dhikr_count,
                                             missions_completed = excluded.missions_completed",
            params![day.date, day.dhikr_count, day.missions_completed],
        )?;
        Ok(())
    }

    pub fn list_activity_days(&self) -> HabitResult<Vec<ActivityDay>> {
        let mut stmt = self
            .conn
            .prepare("SELECT date, dhikr_count, missions_completed FROM activity_days ORDER BY date")?;
        let rows = stmt.query_map([], |row| {
            Ok(ActivityDay {
                date: row.get(0)?,
                dhikr_count: row.get(1)?,
                missions_completed: row.get(2)?,
            })
        })?;
        rows.map(|r| r.map_err(HabitError::from)).collect()
    }

    // =========================================================================
    // Reconciliation markers
    // =========================================================================

    pub fn has_reconciliation_marker(&self, identity: &str) -> HabitResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT reconciled_at FROM reconciliation_markers WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn set_reconciliation_marker(&self, identity: &str) -> HabitResult<()> {
        self.conn.execute(
            "INSERT INTO reconciliation_markers (identity, reconciled_at) VALUES (?1, ?2)
             ON CONFLICT(identity) DO UPDATE SET reconciled_at = excluded.reconciled_at",
            params![identity, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Clear the marker on sign-out so a later sign-in reconciles again.
    pub fn clear_reconciliation_marker(&self, identity: &str) -> HabitResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM reconciliation_markers WHERE identity = ?1",
            params![identity],
        )?;
        Ok(removed > 0)
    }

    // =========================================================================
    // Reconciliation bulk operations
    // =========================================================================

    /// Overwrite the entire local store from a server snapshot
    /// (Hydrate branch). Server-assigned bookmark ids become the local
    /// ids. Last-writer-wins with the server winning.
    pub fn hydrate(&mut self, snapshot: &ServerSnapshot) -> HabitResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM bookmarks", [])?;
        tx.execute("DELETE FROM completed_missions", [])?;
        tx.execute("DELETE FROM journal_entries", [])?;
        tx.execute("DELETE FROM activity_days", [])?;

        let state = |key: &str, value: String| -> HabitResult<()> {
            tx.execute(
                "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        };

        let profile_name = if snapshot.profile_name.is_empty() {
            DEFAULT_PROFILE_NAME.to_string()
        } else {
            snapshot.profile_name.clone()
        };
        state("profile_name", profile_name)?;
        state("settings", serde_json::to_string(&snapshot.settings)?)?;
        state("current_streak", snapshot.current_streak.to_string())?;
        state("longest_streak", snapshot.longest_streak.to_string())?;
        match &snapshot.last_read {
            Some(position) => state("last_read", serde_json::to_string(position)?)?,
            None => {
                tx.execute("DELETE FROM app_state WHERE key = 'last_read'", [])?;
            }
        }

        for bookmark in &snapshot.bookmarks {
            // cloud_id becomes the local id
            let id = bookmark
                .cloud_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::now_v7().simple().to_string());
            tx.execute(
                "INSERT INTO bookmarks (id, surah, verse, label, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(surah, verse) DO UPDATE SET label = excluded.label",
                params![id, bookmark.surah, bookmark.verse, bookmark.label, bookmark.created_at],
            )?;
        }
        for mission in &snapshot.completed_missions {
            tx.execute(
                "INSERT OR REPLACE INTO completed_missions (mission_id, completed_at) VALUES (?1, ?2)",
                params![mission.mission_id, mission.completed_at],
            )?;
        }
        for entry in &snapshot.journal_entries {
            tx.execute(
                "INSERT OR REPLACE INTO journal_entries (id, title, body, mood, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![entry.id, entry.title, entry.body, entry.mood, entry.created_at],
            )?;
        }
        if let Some(day) = &snapshot.today_activity {
            tx.execute(
                "INSERT OR REPLACE INTO activity_days (date, dhikr_count, missions_completed) VALUES (?1, ?2, ?3)",
                params![day.date, day.dhikr_count, day.missions_completed],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Assemble the full local guest state for the Claim branch.
    pub fn guest_snapshot(&self) -> HabitResult<GuestSnapshot> {
        Ok(GuestSnapshot {
            profile_name: self.profile_name()?,
            settings: self.settings()?,
            last_read: self.last_read()?,
            bookmarks: self.list_bookmarks()?,
            completed_missions: self.list_completed_missions()?,
            journal_entries: self.list_journal_entries()?,
            dhikr_count: self.dhikr_count()?,
            current_streak: self.current_streak()?,
            activity_days: self.list_activity_days()?,
        })
    }
}

fn row_to_queue_record(row: &Row<'_>) -> rusqlite::Result<HabitResult<QueueRecord>> {
    let id: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let action_str: String = row.get(2)?;
    let payload_json: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let retry_count: u32 = row.get(5)?;
    let created_at: i64 = row.get(6)?;
    let last_error: Option<String> = row.get(7)?;

    Ok(build_queue_record(
        id,
        kind_str,
        action_str,
        payload_json,
        status_str,
        retry_count,
        created_at,
        last_error,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_queue_record(
    id: String,
    kind_str: String,
    action_str: String,
    payload_json: String,
    status_str: String,
    retry_count: u32,
    created_at: i64,
    last_error: Option<String>,
) -> HabitResult<QueueRecord> {
    let entity_kind = EntityKind::parse(&kind_str)
        .ok_or_else(|| HabitError::store_op(format!("unknown entity kind in queue: {}", kind_str)))?;
    let action = MutationAction::parse(&action_str)
        .ok_or_else(|| HabitError::store_op(format!("unknown action in queue: {}", action_str)))?;
    let status = RecordStatus::parse(&status_str)
        .ok_or_else(|| HabitError::store_op(format!("unknown status in queue: {}", status_str)))?;
    let payload_value: Value = serde_json::from_str(&payload_json)?;
    let payload = MutationPayload::from_kind_value(entity_kind, payload_value)?;

    Ok(QueueRecord {
        id,
        entity_kind,
        action,
        payload,
        status,
        retry_count,
        created_at,
        last_error,
    })
}
