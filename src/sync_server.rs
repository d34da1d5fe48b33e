//! Remote reconciliation endpoint implementation using Axum.
//!
//! This module provides the server side of the sync protocol:
//! - POST /sync - Replay a batch of queue records (or a legacy bulk body)
//! - GET /account/full-snapshot - Full account state for reconciliation
//! - POST /account/claim - Bulk-apply a guest snapshot to the account
//!
//! Each batch entry is dispatched by entity kind and action to an
//! entity-specific handler and classified per-record as synced or
//! failed; a failure of one record never fails the batch. Bookmarks
//! are keyed by their natural key (owner + surah/verse), and journal
//! entries by the client-generated record id, so replaying a batch
//! after an ambiguous transport failure cannot duplicate either.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::HabitResult;
use crate::models::{
    ActivityDay, FailedEntry, GuestSnapshot, LastReadPosition, ServerSnapshot,
    SnapshotBookmark, SnapshotJournalEntry, SnapshotMission, SyncResponse, SyncedEntry,
    DEFAULT_PROFILE_NAME,
};
use crate::sync_client::ACCOUNT_ID_HEADER;

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    accounts: Arc<Mutex<AccountStore>>,
}

/// In-memory account storage, one [`Account`] per identity.
#[derive(Default)]
pub struct AccountStore {
    accounts: HashMap<String, Account>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_mut(&mut self, identity: &str) -> &mut Account {
        self.accounts.entry(identity.to_string()).or_default()
    }

    pub fn account(&self, identity: &str) -> Option<&Account> {
        self.accounts.get(identity)
    }
}

/// A stored bookmark; `cloud_id` is the server-assigned id returned to
/// clients.
#[derive(Debug, Clone)]
pub struct StoredBookmark {
    pub cloud_id: String,
    pub surah: u32,
    pub verse: u32,
    pub label: Option<String>,
    pub created_at: i64,
}

/// Server-held state for one account.
#[derive(Debug, Clone, Default)]
pub struct Account {
    pub profile_name: String,
    pub settings: Map<String, Value>,
    pub last_read: Option<LastReadPosition>,
    pub bookmarks: Vec<StoredBookmark>,
    pub completed_missions: Vec<SnapshotMission>,
    pub journal_entries: Vec<SnapshotJournalEntry>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub today_activity: Option<ActivityDay>,
}

impl Account {
    fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            profile_name: if self.profile_name.is_empty() {
                DEFAULT_PROFILE_NAME.to_string()
            } else {
                self.profile_name.clone()
            },
            settings: self.settings.clone(),
            last_read: self.last_read.clone(),
            bookmarks: self
                .bookmarks
                .iter()
                .map(|b| SnapshotBookmark {
                    cloud_id: Some(b.cloud_id.clone()),
                    surah: b.surah,
                    verse: b.verse,
                    label: b.label.clone(),
                    created_at: b.created_at,
                })
                .collect(),
            completed_missions: self.completed_missions.clone(),
            journal_entries: self.journal_entries.clone(),
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            today_activity: self.today_activity.clone(),
        }
    }
}

// Request/Response types

/// One incoming queue record. The kind and action stay raw strings so
/// unknown values can be rejected per-record rather than failing the
/// whole request at deserialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEntry {
    pub id: String,
    pub entity_kind: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Body of POST /sync: the batch format carries `entries`; older
/// clients send flat arrays instead.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestBody {
    #[serde(default)]
    pub entries: Option<Vec<WireEntry>>,
    // Legacy bulk format
    #[serde(default)]
    pub bookmarks: Option<Vec<SnapshotBookmark>>,
    #[serde(default)]
    pub journal_entries: Option<Vec<SnapshotJournalEntry>>,
    #[serde(default)]
    pub settings: Option<Map<String, Value>>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    error: String,
}

// Entity-specific handlers

fn require_u32(payload: &Value, field: &str) -> Result<u32, String> {
    payload
        .get(field)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .ok_or_else(|| format!("Missing required field: {}", field))
}

fn require_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Missing required field: {}", field))
}

fn apply_bookmark(account: &mut Account, entry: &WireEntry) -> Result<Option<String>, String> {
    let surah = require_u32(&entry.payload, "surah")?;
    let verse = require_u32(&entry.payload, "verse")?;
    let label = entry
        .payload
        .get("label")
        .and_then(Value::as_str)
        .map(String::from);

    match entry.action.as_str() {
        "create" | "update" => {
            // Upsert by natural key: a replayed create can never
            // duplicate a bookmark.
            if let Some(existing) = account
                .bookmarks
                .iter_mut()
                .find(|b| b.surah == surah && b.verse == verse)
            {
                existing.label = label;
                Ok(Some(existing.cloud_id.clone()))
            } else {
                let cloud_id = Uuid::now_v7().simple().to_string();
                account.bookmarks.push(StoredBookmark {
                    cloud_id: cloud_id.clone(),
                    surah,
                    verse,
                    label,
                    created_at: Utc::now().timestamp(),
                });
                Ok(Some(cloud_id))
            }
        }
        "delete" => {
            // Deleting an absent key is an idempotent no-op
            account
                .bookmarks
                .retain(|b| !(b.surah == surah && b.verse == verse));
            Ok(None)
        }
        other => Err(format!("Unknown action: {}", other)),
    }
}

fn apply_journal(account: &mut Account, entry: &WireEntry) -> Result<Option<String>, String> {
    match entry.action.as_str() {
        "create" | "update" => {
            let title = require_str(&entry.payload, "title")?.to_string();
            let body = require_str(&entry.payload, "body")?.to_string();
            let mood = entry
                .payload
                .get("mood")
                .and_then(Value::as_str)
                .map(String::from);

            // The client-generated record id is the idempotency key:
            // a retried create updates in place instead of inserting a
            // duplicate entry.
            if let Some(existing) = account
                .journal_entries
                .iter_mut()
                .find(|e| e.id == entry.id)
            {
                existing.title = title;
                existing.body = body;
                existing.mood = mood;
            } else {
                account.journal_entries.push(SnapshotJournalEntry {
                    id: entry.id.clone(),
                    title,
                    body,
                    mood,
                    created_at: Utc::now().timestamp(),
                });
            }
            Ok(None)
        }
        "delete" => {
            account.journal_entries.retain(|e| e.id != entry.id);
            Ok(None)
        }
        other => Err(format!("Unknown action: {}", other)),
    }
}

fn apply_mission_progress(
    account: &mut Account,
    entry: &WireEntry,
) -> Result<Option<String>, String> {
    let mission_id = require_str(&entry.payload, "missionId")?.to_string();

    match entry.action.as_str() {
        "create" | "update" => {
            let completed = entry
                .payload
                .get("completed")
                .and_then(Value::as_bool)
                .ok_or_else(|| "Missing required field: completed".to_string())?;
            if completed {
                if let Some(existing) = account
                    .completed_missions
                    .iter_mut()
                    .find(|m| m.mission_id == mission_id)
                {
                    existing.completed_at = Utc::now().timestamp();
                } else {
                    account.completed_missions.push(SnapshotMission {
                        mission_id,
                        completed_at: Utc::now().timestamp(),
                    });
                }
            }
            Ok(None)
        }
        "delete" => {
            account
                .completed_missions
                .retain(|m| m.mission_id != mission_id);
            Ok(None)
        }
        other => Err(format!("Unknown action: {}", other)),
    }
}

fn apply_setting(account: &mut Account, entry: &WireEntry) -> Result<Option<String>, String> {
    let values = entry
        .payload
        .get("values")
        .and_then(Value::as_object)
        .ok_or_else(|| "Missing required field: values".to_string())?;

    // Shallow merge into the account's settings blob
    for (key, value) in values {
        account.settings.insert(key.clone(), value.clone());
    }
    Ok(None)
}

/// Apply one entry to the account. Returns the server-assigned id when
/// one exists, or a per-record error message.
pub fn apply_entry(account: &mut Account, entry: &WireEntry) -> Result<Option<String>, String> {
    match entry.entity_kind.as_str() {
        "bookmark" => apply_bookmark(account, entry),
        "journal" => apply_journal(account, entry),
        "missionProgress" => apply_mission_progress(account, entry),
        "setting" => apply_setting(account, entry),
        other => Err(format!("Unknown entity type: {}", other)),
    }
}

/// Apply a whole batch, classifying every entry as synced or failed.
pub fn apply_batch(account: &mut Account, entries: &[WireEntry]) -> SyncResponse {
    let mut synced = Vec::new();
    let mut failed = Vec::new();

    for entry in entries {
        match apply_entry(account, entry) {
            Ok(cloud_id) => synced.push(SyncedEntry {
                id: entry.id.clone(),
                cloud_id,
            }),
            Err(error) => {
                tracing::warn!("Record {} failed: {}", entry.id, error);
                failed.push(FailedEntry {
                    id: entry.id.clone(),
                    error,
                });
            }
        }
    }

    let success = failed.is_empty();
    let message = format!("{} synced, {} failed", synced.len(), failed.len());
    SyncResponse {
        success,
        synced,
        failed,
        message,
    }
}

/// Apply a legacy bulk body best-effort, with no per-record reporting.
pub fn apply_legacy_bulk(account: &mut Account, body: &SyncRequestBody) {
    if let Some(bookmarks) = &body.bookmarks {
        for bookmark in bookmarks {
            if let Some(existing) = account
                .bookmarks
                .iter_mut()
                .find(|b| b.surah == bookmark.surah && b.verse == bookmark.verse)
            {
                existing.label = bookmark.label.clone();
            } else {
                account.bookmarks.push(StoredBookmark {
                    cloud_id: Uuid::now_v7().simple().to_string(),
                    surah: bookmark.surah,
                    verse: bookmark.verse,
                    label: bookmark.label.clone(),
                    created_at: bookmark.created_at,
                });
            }
        }
    }
    if let Some(entries) = &body.journal_entries {
        for entry in entries {
            if !account.journal_entries.iter().any(|e| e.id == entry.id) {
                account.journal_entries.push(entry.clone());
            }
        }
    }
    if let Some(settings) = &body.settings {
        for (key, value) in settings {
            account.settings.insert(key.clone(), value.clone());
        }
    }
}

/// Apply a guest snapshot to the account (Claim branch). Best-effort
/// bulk apply; the claim path only runs when the account holds no
/// progress of its own.
pub fn apply_claim(account: &mut Account, guest: &GuestSnapshot) {
    if !guest.profile_name.is_empty() && guest.profile_name != DEFAULT_PROFILE_NAME {
        account.profile_name = guest.profile_name.clone();
    }
    for (key, value) in &guest.settings {
        account.settings.insert(key.clone(), value.clone());
    }
    if let Some(last_read) = &guest.last_read {
        account.last_read = Some(last_read.clone());
    }
    for bookmark in &guest.bookmarks {
        if !account
            .bookmarks
            .iter()
            .any(|b| b.surah == bookmark.surah && b.verse == bookmark.verse)
        {
            account.bookmarks.push(StoredBookmark {
                cloud_id: Uuid::now_v7().simple().to_string(),
                surah: bookmark.surah,
                verse: bookmark.verse,
                label: bookmark.label.clone(),
                created_at: bookmark.created_at,
            });
        }
    }
    for mission in &guest.completed_missions {
        if !account
            .completed_missions
            .iter()
            .any(|m| m.mission_id == mission.mission_id)
        {
            account.completed_missions.push(mission.clone());
        }
    }
    for entry in &guest.journal_entries {
        if !account.journal_entries.iter().any(|e| e.id == entry.id) {
            account.journal_entries.push(entry.clone());
        }
    }
    account.current_streak = account.current_streak.max(guest.current_streak);
    account.longest_streak = account.longest_streak.max(guest.current_streak);
    if account.today_activity.is_none() {
        account.today_activity = guest.activity_days.last().cloned();
    }
}

// Route handlers

fn identity_from_headers(headers: &HeaderMap) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let identity = headers
        .get(ACCOUNT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if identity.is_empty() || identity.len() > 128 {
        tracing::warn!("Missing or invalid {} header", ACCOUNT_ID_HEADER);
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Missing or invalid {} header", ACCOUNT_ID_HEADER),
            }),
        ));
    }
    Ok(identity.to_string())
}

async fn handle_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SyncRequestBody>,
) -> impl IntoResponse {
    let identity = match identity_from_headers(&headers) {
        Ok(identity) => identity,
        Err(rejection) => return rejection.into_response(),
    };

    let mut accounts = state.accounts.lock().unwrap();
    let account = accounts.account_mut(&identity);

    if let Some(entries) = &body.entries {
        tracing::debug!("POST /sync: batch of {} entries", entries.len());
        let response = apply_batch(account, entries);
        tracing::debug!(
            "Batch applied: {} synced, {} failed",
            response.synced.len(),
            response.failed.len()
        );
        return Json(response).into_response();
    }

    // Legacy bulk format: best-effort, no per-record reporting
    tracing::debug!("POST /sync: legacy bulk body");
    apply_legacy_bulk(account, &body);
    Json(SyncResponse {
        success: true,
        synced: Vec::new(),
        failed: Vec::new(),
        message: "legacy bulk applied".to_string(),
    })
    .into_response()
}

async fn handle_full_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let identity = match identity_from_headers(&headers) {
        Ok(identity) => identity,
        Err(rejection) => return rejection.into_response(),
    };

    tracing::debug!("GET /account/full-snapshot");
    let accounts = state.accounts.lock().unwrap();
    let snapshot = accounts
        .account(&identity)
        .map(Account::snapshot)
        .unwrap_or_default();
    Json(snapshot).into_response()
}

async fn handle_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(guest): Json<GuestSnapshot>,
) -> impl IntoResponse {
    let identity = match identity_from_headers(&headers) {
        Ok(identity) => identity,
        Err(rejection) => return rejection.into_response(),
    };

    tracing::debug!(
        "POST /account/claim: {} bookmarks, {} journal entries",
        guest.bookmarks.len(),
        guest.journal_entries.len()
    );
    let mut accounts = state.accounts.lock().unwrap();
    apply_claim(accounts.account_mut(&identity), &guest);
    StatusCode::NO_CONTENT.into_response()
}

/// Build the sync router over shared account storage.
pub fn router(accounts: Arc<Mutex<AccountStore>>) -> Router {
    Router::new()
        .route("/sync", post(handle_sync))
        .route("/account/full-snapshot", get(handle_full_snapshot))
        .route("/account/claim", post(handle_claim))
        .with_state(AppState { accounts })
}

/// Serve the endpoint until the shutdown signal fires.
pub async fn serve(
    addr: SocketAddr,
    accounts: Arc<Mutex<AccountStore>>,
    shutdown: oneshot::Receiver<()>,
) -> HabitResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Sync endpoint listening on {}", addr);

    axum::serve(listener, router(accounts))
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await?;
    Ok(())
}
