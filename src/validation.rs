//! Input validation for Habit Core.
//!
//! Payloads are validated here at enqueue time (fail fast) rather than
//! only at replay time; the server reuses the same checks for incoming
//! entries. All validators return HabitError::Validation on failure.

use crate::error::{HabitError, HabitResult};
use crate::models::MutationPayload;

// Limits
pub const MAX_RECORD_ID_LENGTH: usize = 64;
pub const MAX_LABEL_LENGTH: usize = 200;
pub const MAX_JOURNAL_TITLE_LENGTH: usize = 200;
pub const MAX_JOURNAL_BODY_LENGTH: usize = 50_000;
pub const MAX_MISSION_ID_LENGTH: usize = 100;
pub const MAX_SETTING_KEYS: usize = 200;

/// Number of surahs in the recitation text.
pub const SURAH_COUNT: u32 = 114;
/// Upper bound on verse numbers (longest surah).
pub const MAX_VERSE: u32 = 286;

/// Validate a caller-assigned record id.
///
/// Ids are opaque but must be non-empty, bounded, and printable so they
/// can serve as idempotency keys downstream.
pub fn validate_record_id(id: &str) -> HabitResult<()> {
    if id.is_empty() {
        return Err(HabitError::validation("id", "must not be empty"));
    }
    if id.len() > MAX_RECORD_ID_LENGTH {
        return Err(HabitError::validation(
            "id",
            format!("must be at most {} characters", MAX_RECORD_ID_LENGTH),
        ));
    }
    if id.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(HabitError::validation(
            "id",
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

/// Validate a verse reference (surah + verse pair).
pub fn validate_verse_ref(surah: u32, verse: u32) -> HabitResult<()> {
    if surah < 1 || surah > SURAH_COUNT {
        return Err(HabitError::validation(
            "surah",
            format!("must be between 1 and {}, got {}", SURAH_COUNT, surah),
        ));
    }
    if verse < 1 || verse > MAX_VERSE {
        return Err(HabitError::validation(
            "verse",
            format!("must be between 1 and {}, got {}", MAX_VERSE, verse),
        ));
    }
    Ok(())
}

/// Validate a typed mutation payload.
pub fn validate_payload(payload: &MutationPayload) -> HabitResult<()> {
    match payload {
        MutationPayload::Bookmark { surah, verse, label } => {
            validate_verse_ref(*surah, *verse)?;
            if let Some(label) = label {
                if label.len() > MAX_LABEL_LENGTH {
                    return Err(HabitError::validation(
                        "label",
                        format!("must be at most {} characters", MAX_LABEL_LENGTH),
                    ));
                }
            }
            Ok(())
        }
        MutationPayload::Journal {
            entry_id,
            title,
            body,
            ..
        } => {
            if entry_id.is_empty() {
                return Err(HabitError::validation("entryId", "must not be empty"));
            }
            if title.is_empty() {
                return Err(HabitError::validation("title", "must not be empty"));
            }
            if title.len() > MAX_JOURNAL_TITLE_LENGTH {
                return Err(HabitError::validation(
                    "title",
                    format!("must be at most {} characters", MAX_JOURNAL_TITLE_LENGTH),
                ));
            }
            if body.len() > MAX_JOURNAL_BODY_LENGTH {
                return Err(HabitError::validation(
                    "body",
                    format!("must be at most {} characters", MAX_JOURNAL_BODY_LENGTH),
                ));
            }
            Ok(())
        }
        MutationPayload::MissionProgress { mission_id, .. } => {
            if mission_id.is_empty() {
                return Err(HabitError::validation("missionId", "must not be empty"));
            }
            if mission_id.len() > MAX_MISSION_ID_LENGTH {
                return Err(HabitError::validation(
                    "missionId",
                    format!("must be at most {} characters", MAX_MISSION_ID_LENGTH),
                ));
            }
            Ok(())
        }
        MutationPayload::Setting { values } => {
            if values.is_empty() {
                return Err(HabitError::validation("values", "must not be empty"));
            }
            if values.len() > MAX_SETTING_KEYS {
                return Err(HabitError::validation(
                    "values",
                    format!("must have at most {} keys", MAX_SETTING_KEYS),
                ));
            }
            Ok(())
        }
    }
}
