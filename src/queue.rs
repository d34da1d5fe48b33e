//! Queue manager for the durable mutation queue.
//!
//! This module wraps the store's queue table with the enqueue / list /
//! status-transition API the sync engine operates on, and enforces the
//! capacity cap. All operations are synchronous; only network replay
//! suspends.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::{HabitError, HabitResult};
use crate::models::{MutationAction, MutationPayload, QueueRecord, RecordStatus};
use crate::store::{QueueStats, Store};
use crate::validation::{validate_payload, validate_record_id};

/// Default queue capacity. The cap bounds pending records only;
/// terminal records awaiting the retention sweep are not counted.
pub const DEFAULT_QUEUE_CAP: usize = 100;

/// What to do when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Reject the new record with an explicit capacity error.
    #[default]
    RejectNewest,
    /// Silently drop the oldest pending record to make room.
    EvictOldest,
}

/// API over the durable queue: enqueueing, snapshotting pending
/// records, and transitioning record status.
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<Mutex<Store>>,
    cap: usize,
    overflow_policy: OverflowPolicy,
}

impl QueueManager {
    pub fn new(store: Arc<Mutex<Store>>, cap: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            store,
            cap,
            overflow_policy,
        }
    }

    /// Create a manager with the documented defaults (cap 100, reject
    /// newest).
    pub fn with_defaults(store: Arc<Mutex<Store>>) -> Self {
        Self::new(store, DEFAULT_QUEUE_CAP, OverflowPolicy::default())
    }

    /// Validate and append a new pending mutation.
    ///
    /// The payload is validated here, at enqueue time, so malformed
    /// mutations fail fast in the caller instead of at replay time.
    /// At capacity, behavior follows the configured overflow policy.
    pub fn enqueue(
        &self,
        id: impl Into<String>,
        action: MutationAction,
        payload: MutationPayload,
    ) -> HabitResult<QueueRecord> {
        let id = id.into();
        validate_record_id(&id)?;
        validate_payload(&payload)?;

        let record = QueueRecord::new(id, action, payload);
        let store = self.store.lock().unwrap();

        if store.queue_pending_len()? >= self.cap {
            match self.overflow_policy {
                OverflowPolicy::RejectNewest => {
                    tracing::warn!(
                        "Queue at capacity ({}), rejecting record {}",
                        self.cap,
                        record.id
                    );
                    return Err(HabitError::CapacityExceeded(self.cap));
                }
                OverflowPolicy::EvictOldest => {
                    if let Some(evicted) = store.queue_evict_oldest_pending()? {
                        tracing::warn!(
                            "Queue at capacity ({}), evicted oldest pending record {}",
                            self.cap,
                            evicted
                        );
                    }
                }
            }
        }

        store.queue_insert(&record)?;
        tracing::debug!(
            "Enqueued {} {} mutation {}",
            record.entity_kind,
            record.action.as_str(),
            record.id
        );
        Ok(record)
    }

    /// Snapshot of all pending records in insertion order. Records
    /// enqueued after the snapshot is taken are not part of it.
    pub fn list_pending(&self) -> HabitResult<Vec<QueueRecord>> {
        self.store.lock().unwrap().queue_list_pending()
    }

    /// Transition a record to synced. No-op when already terminal.
    pub fn mark_synced(&self, id: &str) -> HabitResult<()> {
        let changed = self
            .store
            .lock()
            .unwrap()
            .queue_set_terminal(id, RecordStatus::Synced, None)?;
        if changed {
            tracing::trace!("Record {} synced", id);
        }
        Ok(())
    }

    /// Transition a record to failed with a diagnostic. No-op when
    /// already terminal.
    pub fn mark_failed(&self, id: &str, error: &str) -> HabitResult<()> {
        let changed = self
            .store
            .lock()
            .unwrap()
            .queue_set_terminal(id, RecordStatus::Failed, Some(error))?;
        if changed {
            tracing::warn!("Record {} failed: {}", id, error);
        }
        Ok(())
    }

    /// Increment the retry count of a pending record; returns the new
    /// count (None when the record is missing or terminal).
    pub fn increment_retry(&self, id: &str) -> HabitResult<Option<u32>> {
        self.store.lock().unwrap().queue_increment_retry(id)
    }

    /// Counts by status and entity kind. Side-effect-free.
    pub fn stats(&self) -> HabitResult<QueueStats> {
        self.store.lock().unwrap().queue_stats()
    }

    /// Delete terminal records created before the cutoff timestamp.
    pub fn clear_terminal_older_than(&self, cutoff: i64) -> HabitResult<usize> {
        self.store
            .lock()
            .unwrap()
            .queue_clear_terminal_older_than(cutoff)
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(cap: usize, policy: OverflowPolicy) -> QueueManager {
        let store = Arc::new(Mutex::new(Store::new_in_memory().unwrap()));
        QueueManager::new(store, cap, policy)
    }

    fn bookmark_payload(verse: u32) -> MutationPayload {
        MutationPayload::Bookmark {
            surah: 2,
            verse,
            label: None,
        }
    }

    #[test]
    fn test_enqueue_validates_payload() {
        let queue = test_manager(10, OverflowPolicy::RejectNewest);

        let result = queue.enqueue(
            "bad",
            MutationAction::Create,
            MutationPayload::Bookmark {
                surah: 0,
                verse: 1,
                label: None,
            },
        );
        assert!(matches!(result, Err(HabitError::Validation { .. })));
        assert!(queue.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_enqueue_validates_id() {
        let queue = test_manager(10, OverflowPolicy::RejectNewest);
        let result = queue.enqueue("", MutationAction::Create, bookmark_payload(1));
        assert!(matches!(result, Err(HabitError::Validation { .. })));
    }

    #[test]
    fn test_cap_reject_newest() {
        let queue = test_manager(3, OverflowPolicy::RejectNewest);
        for i in 1..=3 {
            queue
                .enqueue(format!("r{}", i), MutationAction::Create, bookmark_payload(i))
                .unwrap();
        }

        let result = queue.enqueue("r4", MutationAction::Create, bookmark_payload(4));
        assert!(matches!(result, Err(HabitError::CapacityExceeded(3))));

        // History is untouched
        let ids: Vec<String> = queue
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_cap_evict_oldest() {
        let queue = test_manager(3, OverflowPolicy::EvictOldest);
        for i in 1..=3 {
            queue
                .enqueue(format!("r{}", i), MutationAction::Create, bookmark_payload(i))
                .unwrap();
        }

        queue
            .enqueue("r4", MutationAction::Create, bookmark_payload(4))
            .unwrap();

        let ids: Vec<String> = queue
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn test_cap_counts_only_pending_records() {
        let queue = test_manager(2, OverflowPolicy::RejectNewest);
        queue
            .enqueue("r1", MutationAction::Create, bookmark_payload(1))
            .unwrap();
        queue
            .enqueue("r2", MutationAction::Create, bookmark_payload(2))
            .unwrap();
        queue.mark_synced("r1").unwrap();
        queue.mark_failed("r2", "Unknown entity type: bogus").unwrap();

        // Terminal rows linger until the retention sweep but do not
        // consume capacity: with zero pending records the enqueue
        // must succeed.
        queue
            .enqueue("r3", MutationAction::Create, bookmark_payload(3))
            .unwrap();
        let pending = queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "r3");
    }

    #[test]
    fn test_evict_policy_keeps_pending_within_cap() {
        let queue = test_manager(2, OverflowPolicy::EvictOldest);
        queue
            .enqueue("r1", MutationAction::Create, bookmark_payload(1))
            .unwrap();
        queue
            .enqueue("r2", MutationAction::Create, bookmark_payload(2))
            .unwrap();
        queue.mark_synced("r1").unwrap();

        // One pending record: below cap, nothing is evicted
        queue
            .enqueue("r3", MutationAction::Create, bookmark_payload(3))
            .unwrap();
        // Two pending records: at cap, the oldest pending goes
        queue
            .enqueue("r4", MutationAction::Create, bookmark_payload(4))
            .unwrap();

        let ids: Vec<String> = queue
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["r3", "r4"]);
    }

    #[test]
    fn test_snapshot_excludes_later_enqueues() {
        let queue = test_manager(10, OverflowPolicy::RejectNewest);
        queue
            .enqueue("r1", MutationAction::Create, bookmark_payload(1))
            .unwrap();

        let snapshot = queue.list_pending().unwrap();
        queue
            .enqueue("r2", MutationAction::Create, bookmark_payload(2))
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(queue.list_pending().unwrap().len(), 2);
    }

    #[test]
    fn test_terminal_records_leave_pending_view() {
        let queue = test_manager(10, OverflowPolicy::RejectNewest);
        queue
            .enqueue("r1", MutationAction::Create, bookmark_payload(1))
            .unwrap();
        queue
            .enqueue("r2", MutationAction::Create, bookmark_payload(2))
            .unwrap();

        queue.mark_synced("r1").unwrap();
        queue.mark_failed("r2", "Unknown entity type: bogus").unwrap();

        assert!(queue.list_pending().unwrap().is_empty());
        let stats = queue.stats().unwrap();
        assert_eq!(stats.synced, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_mark_is_noop_when_terminal() {
        let queue = test_manager(10, OverflowPolicy::RejectNewest);
        queue
            .enqueue("r1", MutationAction::Create, bookmark_payload(1))
            .unwrap();
        queue.mark_failed("r1", "first error").unwrap();
        queue.mark_synced("r1").unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.synced, 0);
    }

    #[test]
    fn test_increment_retry_only_pending() {
        let queue = test_manager(10, OverflowPolicy::RejectNewest);
        queue
            .enqueue("r1", MutationAction::Create, bookmark_payload(1))
            .unwrap();

        assert_eq!(queue.increment_retry("r1").unwrap(), Some(1));
        queue.mark_synced("r1").unwrap();
        assert_eq!(queue.increment_retry("r1").unwrap(), None);
    }
}
