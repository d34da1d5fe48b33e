//! Data models for Habit Core.
//!
//! This module defines the mutation queue record and its typed payloads,
//! the wire types exchanged with the sync endpoint, and the snapshot
//! types used by account reconciliation.
//!
//! Wire field names are camelCase to match the REST contract; internal
//! field names follow Rust convention.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HabitResult;

/// The closed set of entity kinds the queue carries.
///
/// Unknown kinds are rejected by the server per-record, not by the
/// client, so the server-side wire type keeps the kind as a raw string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Bookmark,
    Journal,
    MissionProgress,
    Setting,
}

impl EntityKind {
    /// Wire name of the kind, as it appears in `entityKind` fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Bookmark => "bookmark",
            EntityKind::Journal => "journal",
            EntityKind::MissionProgress => "missionProgress",
            EntityKind::Setting => "setting",
        }
    }

    /// Parse a wire kind string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bookmark" => Some(EntityKind::Bookmark),
            "journal" => Some(EntityKind::Journal),
            "missionProgress" => Some(EntityKind::MissionProgress),
            "setting" => Some(EntityKind::Setting),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation action carried by a queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(MutationAction::Create),
            "update" => Some(MutationAction::Update),
            "delete" => Some(MutationAction::Delete),
            _ => None,
        }
    }
}

/// Lifecycle status of a queue record.
///
/// `Synced` and `Failed` are terminal; a terminal record is never
/// re-dispatched. `Pending` may transition to itself with an
/// incremented retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    Pending,
    Synced,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Synced => "synced",
            RecordStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordStatus::Pending),
            "synced" => Some(RecordStatus::Synced),
            "failed" => Some(RecordStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Synced | RecordStatus::Failed)
    }
}

/// Typed per-kind payload. One variant per entity kind, validated at
/// enqueue time rather than only at replay time.
///
/// Serialization is the bare payload object (no tag); the kind travels
/// separately in the record's `entityKind` field, so deserialization
/// goes through [`MutationPayload::from_kind_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MutationPayload {
    #[serde(rename_all = "camelCase")]
    Bookmark {
        surah: u32,
        verse: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Journal {
        entry_id: String,
        title: String,
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mood: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MissionProgress {
        mission_id: String,
        completed: bool,
        progress: u32,
    },
    Setting { values: Map<String, Value> },
}

// Helper structs for by-kind deserialization of stored payload JSON.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookmarkFields {
    surah: u32,
    verse: u32,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JournalFields {
    entry_id: String,
    title: String,
    body: String,
    #[serde(default)]
    mood: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MissionProgressFields {
    mission_id: String,
    completed: bool,
    progress: u32,
}

#[derive(Deserialize)]
struct SettingFields {
    values: Map<String, Value>,
}

impl MutationPayload {
    /// The entity kind this payload belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            MutationPayload::Bookmark { .. } => EntityKind::Bookmark,
            MutationPayload::Journal { .. } => EntityKind::Journal,
            MutationPayload::MissionProgress { .. } => EntityKind::MissionProgress,
            MutationPayload::Setting { .. } => EntityKind::Setting,
        }
    }

    /// Deserialize a payload of a known kind from its JSON object.
    pub fn from_kind_value(kind: EntityKind, value: Value) -> HabitResult<Self> {
        let payload = match kind {
            EntityKind::Bookmark => {
                let f: BookmarkFields = serde_json::from_value(value)?;
                MutationPayload::Bookmark {
                    surah: f.surah,
                    verse: f.verse,
                    label: f.label,
                }
            }
            EntityKind::Journal => {
                let f: JournalFields = serde_json::from_value(value)?;
                MutationPayload::Journal {
                    entry_id: f.entry_id,
                    title: f.title,
                    body: f.body,
                    mood: f.mood,
                }
            }
            EntityKind::MissionProgress => {
                let f: MissionProgressFields = serde_json::from_value(value)?;
                MutationPayload::MissionProgress {
                    mission_id: f.mission_id,
                    completed: f.completed,
                    progress: f.progress,
                }
            }
            EntityKind::Setting => {
                let f: SettingFields = serde_json::from_value(value)?;
                MutationPayload::Setting { values: f.values }
            }
        };
        Ok(payload)
    }
}

/// One pending mutation awaiting delivery to the server.
///
/// The id is caller-assigned at enqueue time and stable across retries,
/// so the server can use it as an idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub id: String,
    pub entity_kind: EntityKind,
    pub action: MutationAction,
    pub payload: MutationPayload,
    pub status: RecordStatus,
    pub retry_count: u32,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueRecord {
    /// Create a new pending record. The entity kind is derived from the
    /// payload so the two can never disagree.
    pub fn new(id: impl Into<String>, action: MutationAction, payload: MutationPayload) -> Self {
        Self {
            id: id.into(),
            entity_kind: payload.kind(),
            action,
            payload,
            status: RecordStatus::Pending,
            retry_count: 0,
            created_at: Utc::now().timestamp(),
            last_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Wire types for POST /sync

/// Request body for `POST /sync` (batch format).
#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest {
    pub entries: Vec<QueueRecord>,
}

/// A record the server applied successfully, with the server-assigned
/// id when one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
}

/// A record the server rejected, with a diagnostic message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub id: String,
    pub error: String,
}

/// Response body for `POST /sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    pub synced: Vec<SyncedEntry>,
    pub failed: Vec<FailedEntry>,
    pub message: String,
}

// Snapshot types for account reconciliation

/// Placeholder profile name used before the user picks one. A profile
/// whose name differs from this counts as progress.
pub const DEFAULT_PROFILE_NAME: &str = "Guest";

/// Last-read position in the recitation text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReadPosition {
    pub surah: u32,
    pub verse: u32,
}

/// A bookmark as it appears in snapshots. `cloud_id` is the
/// server-assigned id, remapped to the local id field on hydrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBookmark {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
    pub surah: u32,
    pub verse: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// A completed mission as it appears in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMission {
    pub mission_id: String,
    /// Unix timestamp (seconds)
    pub completed_at: i64,
}

/// A journal entry as it appears in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotJournalEntry {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// One day of activity counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDay {
    /// Date key, "YYYY-MM-DD"
    pub date: String,
    pub dhikr_count: u32,
    pub missions_completed: u32,
}

/// Full account state held by the server, consumed read-only by the
/// reconciliation protocol and written to the local store by Hydrate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub last_read: Option<LastReadPosition>,
    #[serde(default)]
    pub bookmarks: Vec<SnapshotBookmark>,
    #[serde(default)]
    pub completed_missions: Vec<SnapshotMission>,
    #[serde(default)]
    pub journal_entries: Vec<SnapshotJournalEntry>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub today_activity: Option<ActivityDay>,
}

impl ServerSnapshot {
    /// True when the server side holds any meaningful progress.
    /// Any signal at all makes the server win reconciliation.
    pub fn has_progress(&self) -> bool {
        !self.bookmarks.is_empty()
            || !self.completed_missions.is_empty()
            || !self.journal_entries.is_empty()
            || (!self.profile_name.is_empty() && self.profile_name != DEFAULT_PROFILE_NAME)
            || self.current_streak > 0
            || self.last_read.is_some()
    }
}

/// Full local guest state, uploaded as one bulk request by the Claim
/// branch of reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSnapshot {
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub last_read: Option<LastReadPosition>,
    #[serde(default)]
    pub bookmarks: Vec<SnapshotBookmark>,
    #[serde(default)]
    pub completed_missions: Vec<SnapshotMission>,
    #[serde(default)]
    pub journal_entries: Vec<SnapshotJournalEntry>,
    #[serde(default)]
    pub dhikr_count: u32,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub activity_days: Vec<ActivityDay>,
}

impl GuestSnapshot {
    /// True when the local guest has anything worth claiming into the
    /// account.
    pub fn has_guest_data(&self) -> bool {
        (!self.profile_name.is_empty() && self.profile_name != DEFAULT_PROFILE_NAME)
            || !self.bookmarks.is_empty()
            || !self.completed_missions.is_empty()
            || !self.journal_entries.is_empty()
            || self.dhikr_count > 0
            || self.current_streak > 0
            || !self.activity_days.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_follows_payload() {
        let record = QueueRecord::new(
            "r1",
            MutationAction::Create,
            MutationPayload::Bookmark {
                surah: 2,
                verse: 255,
                label: None,
            },
        );
        assert_eq!(record.entity_kind, EntityKind::Bookmark);
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.last_error.is_none());
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let record = QueueRecord::new(
            "r1",
            MutationAction::Update,
            MutationPayload::MissionProgress {
                mission_id: "m1".to_string(),
                completed: false,
                progress: 3,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entityKind"], "missionProgress");
        assert_eq!(json["action"], "update");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["payload"]["missionId"], "m1");
    }

    #[test]
    fn test_payload_from_kind_value() {
        let value = serde_json::json!({"surah": 18, "verse": 10, "label": "Cave"});
        let payload = MutationPayload::from_kind_value(EntityKind::Bookmark, value).unwrap();
        assert_eq!(
            payload,
            MutationPayload::Bookmark {
                surah: 18,
                verse: 10,
                label: Some("Cave".to_string())
            }
        );
    }

    #[test]
    fn test_payload_from_kind_value_missing_field() {
        let value = serde_json::json!({"surah": 18});
        let result = MutationPayload::from_kind_value(EntityKind::Bookmark, value);
        assert!(result.is_err());
    }

    #[test]
    fn test_entity_kind_round_trip() {
        for kind in [
            EntityKind::Bookmark,
            EntityKind::Journal,
            EntityKind::MissionProgress,
            EntityKind::Setting,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("bogus"), None);
    }

    #[test]
    fn test_server_progress_signals() {
        let mut snapshot = ServerSnapshot::default();
        assert!(!snapshot.has_progress());

        snapshot.profile_name = DEFAULT_PROFILE_NAME.to_string();
        assert!(!snapshot.has_progress());

        snapshot.current_streak = 1;
        assert!(snapshot.has_progress());

        let mut snapshot = ServerSnapshot::default();
        snapshot.last_read = Some(LastReadPosition { surah: 1, verse: 1 });
        assert!(snapshot.has_progress());
    }

    #[test]
    fn test_guest_data_signals() {
        let mut guest = GuestSnapshot::default();
        assert!(!guest.has_guest_data());

        guest.dhikr_count = 33;
        assert!(guest.has_guest_data());

        let mut guest = GuestSnapshot::default();
        guest.profile_name = "Amina".to_string();
        assert!(guest.has_guest_data());
    }

    #[test]
    fn test_terminal_status() {
        assert!(RecordStatus::Synced.is_terminal());
        assert!(RecordStatus::Failed.is_terminal());
        assert!(!RecordStatus::Pending.is_terminal());
    }
}
