//! Account reconciliation for Habit Core.
//!
//! Runs once per authenticated identity per signed-in session, at
//! first login, to merge anonymous/local usage with the account held
//! on the server. The protocol fetches the full server snapshot and
//! picks one of three branches:
//!
//! - **Hydrate**: the server holds any progress at all. The entire
//!   local store is overwritten from the snapshot (last-writer-wins,
//!   server wins, no matter how much local guest data exists).
//! - **Claim**: the server is empty but the local guest has data.
//!   The whole guest state is bulk-uploaded; the local store is left
//!   as-is.
//! - **NoOp**: neither side has anything to merge.
//!
//! All branches record a per-identity marker so the protocol does not
//! re-run within the same session. A snapshot fetch failure abandons
//! the run without writing a marker, so the next qualifying mount
//! retries.
//!
//! This path is deliberately separate from the steady-state queue
//! replay: coarse-grained whole-snapshot merge at login, fine-grained
//! record replay afterwards.

use std::sync::{Arc, Mutex};

use crate::error::HabitResult;
use crate::store::Store;
use crate::sync_client::SyncTransport;

/// Terminal branch taken by one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A marker already existed for this identity; nothing was done.
    AlreadyReconciled,
    /// Local state was overwritten from the server snapshot.
    Hydrated,
    /// Local guest state was uploaded to the account.
    Claimed,
    /// Neither side had progress.
    NoOp,
}

/// One-shot-per-identity reconciliation protocol.
pub struct Reconciler {
    store: Arc<Mutex<Store>>,
    transport: Arc<dyn SyncTransport>,
}

impl Reconciler {
    pub fn new(store: Arc<Mutex<Store>>, transport: Arc<dyn SyncTransport>) -> Self {
        Self { store, transport }
    }

    /// Run the protocol for an identity. Idempotent within a session:
    /// the second and later calls are no-ops thanks to the marker.
    pub async fn run(&self, identity: &str) -> HabitResult<ReconcileOutcome> {
        {
            let store = self.store.lock().unwrap();
            if store.has_reconciliation_marker(identity)? {
                tracing::trace!("Reconciliation already performed for this identity");
                return Ok(ReconcileOutcome::AlreadyReconciled);
            }
        }

        // A fetch failure propagates without writing a marker, so the
        // protocol retries on the next qualifying mount.
        let snapshot = match self.transport.fetch_snapshot(identity).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Reconciliation abandoned, snapshot fetch failed: {}", e);
                return Err(e);
            }
        };

        let has_server_progress = snapshot.has_progress();
        let guest = self.store.lock().unwrap().guest_snapshot()?;
        let has_local_guest_data = guest.has_guest_data();

        tracing::debug!(
            "Reconciling: server progress={}, local guest data={}",
            has_server_progress,
            has_local_guest_data
        );

        let outcome = if has_server_progress {
            // Server wins whenever it has any progress signal
            let mut store = self.store.lock().unwrap();
            store.hydrate(&snapshot)?;
            ReconcileOutcome::Hydrated
        } else if has_local_guest_data {
            self.transport.claim(identity, &guest).await?;
            ReconcileOutcome::Claimed
        } else {
            ReconcileOutcome::NoOp
        };

        self.store
            .lock()
            .unwrap()
            .set_reconciliation_marker(identity)?;
        tracing::debug!("Reconciliation finished: {:?}", outcome);
        Ok(outcome)
    }

    /// Forget the marker on sign-out so a future sign-in reconciles
    /// again.
    pub fn clear_marker(&self, identity: &str) -> HabitResult<bool> {
        self.store
            .lock()
            .unwrap()
            .clear_reconciliation_marker(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HabitError;
    use crate::models::{
        GuestSnapshot, LastReadPosition, QueueRecord, ServerSnapshot, SnapshotBookmark,
        SyncResponse,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Transport stub for reconciliation: serves a fixed snapshot,
    /// counts fetches, records claims.
    #[derive(Default)]
    struct SnapshotTransport {
        snapshot: ServerSnapshot,
        fail_fetch: AtomicBool,
        fetches: AtomicUsize,
        claims: Mutex<Vec<GuestSnapshot>>,
    }

    #[async_trait]
    impl SyncTransport for SnapshotTransport {
        async fn push_batch(
            &self,
            _identity: &str,
            _entries: &[QueueRecord],
        ) -> HabitResult<SyncResponse> {
            unimplemented!("not used by reconciliation tests")
        }

        async fn fetch_snapshot(&self, _identity: &str) -> HabitResult<ServerSnapshot> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(HabitError::network("unreachable"));
            }
            Ok(self.snapshot.clone())
        }

        async fn claim(&self, _identity: &str, guest: &GuestSnapshot) -> HabitResult<()> {
            self.claims.lock().unwrap().push(guest.clone());
            Ok(())
        }
    }

    fn test_store() -> Arc<Mutex<Store>> {
        Arc::new(Mutex::new(Store::new_in_memory().unwrap()))
    }

    fn server_snapshot_with_progress() -> ServerSnapshot {
        ServerSnapshot {
            profile_name: "Amina".to_string(),
            current_streak: 3,
            last_read: Some(LastReadPosition { surah: 2, verse: 30 }),
            bookmarks: vec![SnapshotBookmark {
                cloud_id: Some("cloud-1".to_string()),
                surah: 2,
                verse: 255,
                label: None,
                created_at: 100,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hydrate_when_server_has_progress() {
        let store = test_store();
        let transport = Arc::new(SnapshotTransport {
            snapshot: server_snapshot_with_progress(),
            ..Default::default()
        });
        let reconciler = Reconciler::new(Arc::clone(&store), transport);

        let outcome = reconciler.run("user-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Hydrated);

        let store = store.lock().unwrap();
        assert_eq!(store.profile_name().unwrap(), "Amina");
        assert_eq!(store.list_bookmarks().unwrap().len(), 1);
        assert!(store.has_reconciliation_marker("user-1").unwrap());
    }

    #[tokio::test]
    async fn test_hydrate_wins_over_local_guest_data() {
        let store = test_store();
        {
            // Plenty of local guest progress, still overwritten
            let s = store.lock().unwrap();
            s.set_profile_name("Guest With Data").unwrap();
            s.set_dhikr_count(500).unwrap();
        }
        let transport = Arc::new(SnapshotTransport {
            snapshot: server_snapshot_with_progress(),
            ..Default::default()
        });
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&transport) as _);

        let outcome = reconciler.run("user-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Hydrated);
        // Never Claim when the server has progress
        assert!(transport.claims.lock().unwrap().is_empty());
        assert_eq!(store.lock().unwrap().profile_name().unwrap(), "Amina");
    }

    #[tokio::test]
    async fn test_claim_when_only_local_has_data() {
        let store = test_store();
        {
            let s = store.lock().unwrap();
            s.set_profile_name("Yusuf").unwrap();
            s.set_dhikr_count(33).unwrap();
        }
        let transport = Arc::new(SnapshotTransport::default());
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&transport) as _);

        let outcome = reconciler.run("user-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Claimed);

        let claims = transport.claims.lock().unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].profile_name, "Yusuf");
        assert_eq!(claims[0].dhikr_count, 33);

        // Claim leaves the local store as-is
        let store = store.lock().unwrap();
        assert_eq!(store.profile_name().unwrap(), "Yusuf");
        assert_eq!(store.dhikr_count().unwrap(), 33);
        assert!(store.has_reconciliation_marker("user-1").unwrap());
    }

    #[tokio::test]
    async fn test_noop_when_both_sides_empty() {
        let store = test_store();
        let transport = Arc::new(SnapshotTransport::default());
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&transport) as _);

        let outcome = reconciler.run("user-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoOp);
        assert!(transport.claims.lock().unwrap().is_empty());
        assert!(store
            .lock()
            .unwrap()
            .has_reconciliation_marker("user-1")
            .unwrap());
    }

    #[tokio::test]
    async fn test_marker_makes_second_run_a_noop() {
        let store = test_store();
        let transport = Arc::new(SnapshotTransport {
            snapshot: server_snapshot_with_progress(),
            ..Default::default()
        });
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&transport) as _);

        reconciler.run("user-1").await.unwrap();
        let outcome = reconciler.run("user-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyReconciled);
        // The fetch and branch logic ran only once
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_identities_reconcile_separately() {
        let store = test_store();
        let transport = Arc::new(SnapshotTransport::default());
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&transport) as _);

        reconciler.run("user-1").await.unwrap();
        let outcome = reconciler.run("user-2").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoOp);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_no_marker() {
        let store = test_store();
        let transport = Arc::new(SnapshotTransport::default());
        transport.fail_fetch.store(true, Ordering::SeqCst);
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&transport) as _);

        assert!(reconciler.run("user-1").await.is_err());
        assert!(!store
            .lock()
            .unwrap()
            .has_reconciliation_marker("user-1")
            .unwrap());

        // Next qualifying mount retries
        transport.fail_fetch.store(false, Ordering::SeqCst);
        let outcome = reconciler.run("user-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoOp);
    }

    #[tokio::test]
    async fn test_clear_marker_on_sign_out() {
        let store = test_store();
        let transport = Arc::new(SnapshotTransport::default());
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&transport) as _);

        reconciler.run("user-1").await.unwrap();
        assert!(reconciler.clear_marker("user-1").unwrap());

        let outcome = reconciler.run("user-1").await.unwrap();
        assert_ne!(outcome, ReconcileOutcome::AlreadyReconciled);
    }
}
