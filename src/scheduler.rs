//! Trigger debouncing for the sync engine.
//!
//! Any number of environmental signal sources (connectivity, window
//! visibility, input focus, the heartbeat) request a dispatch cycle
//! through one `Scheduler`. The scheduler owns a single cancellable
//! timer: each request aborts the previous timer and starts a new one
//! with the requesting trigger's delay, so only the last trigger in a
//! burst actually fires (trailing debounce).

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Coalesces trigger bursts into one delayed firing.
pub struct Scheduler {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// (Re)start the shared timer. Cancels any timer already pending;
    /// `fire` runs only if no newer request arrives within `delay`.
    pub fn schedule<F>(&self, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire.await;
        });

        let mut pending = self.pending.lock().unwrap();
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending timer, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_fire(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trigger_fires_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(500), counting_fire(&fired));

        tokio::time::advance(Duration::from_millis(499)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_firing_at_later_deadline() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        // Focus trigger (500ms), then visibility (1000ms) 200ms later:
        // exactly one firing, at t = 200 + 1000.
        scheduler.schedule(Duration::from_millis(500), counting_fire(&fired));
        tokio::time::advance(Duration::from_millis(200)).await;
        scheduler.schedule(Duration::from_millis(1000), counting_fire(&fired));

        // Past the first trigger's original deadline: nothing yet
        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Just before the second deadline
        tokio::time::advance(Duration::from_millis(599)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Past it: exactly one firing
        tokio::time::advance(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // And nothing else later
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_millis(500), counting_fire(&fired));
        scheduler.cancel();

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
