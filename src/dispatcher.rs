//! Sync dispatcher for Habit Core.
//!
//! The `SyncEngine` turns asynchronous environmental signals
//! (connectivity restored, window visible, focus regained, a periodic
//! heartbeat) into a rate-limited, serialized replay of the pending
//! mutation queue:
//!
//! - triggers are debounced through one shared timer (trailing
//!   debounce, so a burst of signals collapses into one cycle);
//! - at most one dispatch cycle runs at a time, guarded by a single
//!   atomic flag over the whole queue;
//! - a cycle snapshots the pending records, partitions them into
//!   bounded chunks, and replays the chunks strictly sequentially;
//! - a chunk-level transport failure retries every record in the chunk
//!   on a later cycle; per-record logic failures are terminal.
//!
//! There is no per-record backoff timer: retry cadence is whatever the
//! ambient triggers provide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::config::SyncTuning;
use crate::error::HabitResult;
use crate::queue::QueueManager;
use crate::scheduler::Scheduler;
use crate::sync_client::SyncTransport;

/// Environmental signal sources that may request a dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity restored
    Online,
    /// App regained foreground visibility
    Visible,
    /// Window/input focus regained
    Focus,
    /// Periodic heartbeat
    Heartbeat,
}

/// Authentication/session collaborator: who is signed in, if anyone.
pub trait SessionProvider: Send + Sync {
    fn current_identity(&self) -> Option<String>;
}

/// Connectivity collaborator: current online/offline state. Transition
/// events should be forwarded to [`SyncEngine::notify`] by the caller.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// User-facing notification channel. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify_success(&self, message: &str);
    fn notify_error(&self, message: &str);
}

/// Result of one dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// False when the cycle was skipped at the guard (busy, signed
    /// out, offline, or nothing pending). A skipped trigger is lost,
    /// not queued.
    pub ran: bool,
    /// Network requests issued
    pub requests: usize,
    /// Records marked synced
    pub synced: usize,
    /// Records marked failed (server logic failures and retry-limit
    /// conversions)
    pub failed: usize,
    /// Records whose retry count was incremented
    pub retried: usize,
}

impl DispatchOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

/// The sync engine. Guard flag and timer handles are explicit fields
/// with an explicit start/stop lifecycle.
pub struct SyncEngine {
    queue: QueueManager,
    transport: Arc<dyn SyncTransport>,
    session: Arc<dyn SessionProvider>,
    connectivity: Arc<dyn ConnectivityProbe>,
    notifier: Arc<dyn Notifier>,
    tuning: SyncTuning,
    in_progress: AtomicBool,
    scheduler: Scheduler,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        queue: QueueManager,
        transport: Arc<dyn SyncTransport>,
        session: Arc<dyn SessionProvider>,
        connectivity: Arc<dyn ConnectivityProbe>,
        notifier: Arc<dyn Notifier>,
        tuning: SyncTuning,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            transport,
            session,
            connectivity,
            notifier,
            tuning,
            in_progress: AtomicBool::new(false),
            scheduler: Scheduler::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Start the engine's own timers: the one-shot initial kick
    /// (bypasses the debounce) and the periodic heartbeat (debounced
    /// like any other trigger).
    pub fn start(self: &Arc<Self>) {
        let mut background = self.background.lock().unwrap();

        let engine = Arc::clone(self);
        let kick_deadline = tokio::time::Instant::now() + self.tuning.initial_kick_delay();
        background.push(tokio::spawn(async move {
            tokio::time::sleep_until(kick_deadline).await;
            tracing::debug!("Initial sync kick");
            if let Err(e) = engine.run_cycle().await {
                tracing::error!("Initial sync cycle failed: {}", e);
            }
        }));

        let engine = Arc::clone(self);
        background.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.tuning.heartbeat_period());
            // The first tick completes immediately; the heartbeat
            // starts one full period in.
            interval.tick().await;
            loop {
                interval.tick().await;
                engine.notify(SyncTrigger::Heartbeat);
            }
        }));
    }

    /// Stop the heartbeat and any pending debounce timer. An in-flight
    /// network call is not cancelled.
    pub fn stop(&self) {
        for handle in self.background.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.scheduler.cancel();
    }

    /// Request a dispatch cycle. The request is debounced: only the
    /// last trigger within its delay window fires.
    pub fn notify(self: &Arc<Self>, trigger: SyncTrigger) {
        let delay = self.tuning.debounce_delay(trigger);
        tracing::trace!("Sync trigger {:?}, debouncing {:?}", trigger, delay);

        let engine = Arc::clone(self);
        self.scheduler.schedule(delay, async move {
            if let Err(e) = engine.run_cycle().await {
                tracing::error!("Sync cycle failed: {}", e);
                engine.notifier.notify_error("Sync failed, will retry later");
            }
        });
    }

    /// Run one dispatch cycle immediately (no debounce).
    ///
    /// Returns a skipped outcome without doing anything when a cycle
    /// is already in progress, nobody is signed in, or the device is
    /// offline.
    pub async fn run_cycle(&self) -> HabitResult<DispatchOutcome> {
        let Some(identity) = self.session.current_identity() else {
            tracing::trace!("Skipping sync cycle: no authenticated identity");
            return Ok(DispatchOutcome::skipped());
        };
        if !self.connectivity.is_online() {
            tracing::trace!("Skipping sync cycle: offline");
            return Ok(DispatchOutcome::skipped());
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::trace!("Skipping sync cycle: already in progress");
            return Ok(DispatchOutcome::skipped());
        }

        let result = self.replay_pending(&identity).await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn replay_pending(&self, identity: &str) -> HabitResult<DispatchOutcome> {
        let records = self.queue.list_pending()?;
        if records.is_empty() {
            return Ok(DispatchOutcome {
                ran: true,
                ..Default::default()
            });
        }

        tracing::debug!("Dispatch cycle: {} pending records", records.len());
        let mut outcome = DispatchOutcome {
            ran: true,
            ..Default::default()
        };

        // Chunks are replayed strictly sequentially, preserving the
        // snapshot's FIFO order and bounding request payload size.
        // A hand-edited config may hold batch_size 0; chunks() panics
        // on a zero size.
        let batch_size = self.tuning.batch_size.max(1);
        for chunk in records.chunks(batch_size) {
            outcome.requests += 1;
            match self.transport.push_batch(identity, chunk).await {
                Ok(response) => {
                    for entry in &response.synced {
                        self.queue.mark_synced(&entry.id)?;
                        outcome.synced += 1;
                    }
                    for entry in &response.failed {
                        self.queue.mark_failed(&entry.id, &entry.error)?;
                        outcome.failed += 1;
                    }
                }
                Err(e) => {
                    // The server's per-record outcome is unknowable, so
                    // the whole chunk is treated as failed-to-deliver.
                    tracing::warn!("Chunk of {} records failed to deliver: {}", chunk.len(), e);
                    for record in chunk {
                        match self.queue.increment_retry(&record.id)? {
                            Some(count) if count >= self.tuning.max_retries => {
                                self.queue.mark_failed(
                                    &record.id,
                                    &format!("retry limit exceeded: {}", e),
                                )?;
                                outcome.failed += 1;
                            }
                            Some(_) => outcome.retried += 1,
                            None => {}
                        }
                    }
                }
            }
        }

        if outcome.synced > 0 {
            self.notifier
                .notify_success(&format!("{} changes synced", outcome.synced));

            // Opportunistic retention sweep
            let cutoff = self.tuning.retention_cutoff(Utc::now().timestamp());
            let swept = self.queue.clear_terminal_older_than(cutoff)?;
            if swept > 0 {
                tracing::debug!("Swept {} terminal queue records", swept);
            }
        }

        tracing::debug!(
            "Dispatch cycle done: {} requests, {} synced, {} failed, {} retried",
            outcome.requests,
            outcome.synced,
            outcome.failed,
            outcome.retried
        );
        Ok(outcome)
    }
}
