//! # Habit Core
//!
//! Core library for the Habit companion app: a durable mutation queue,
//! an offline-first sync engine, and account reconciliation.
//!
//! ## Features
//!
//! - **Durable mutation queue**: every local change is captured as a
//!   typed queue record in SQLite and survives restarts; the queue is
//!   capped so an unreachable server cannot grow it without bound
//! - **Trigger-driven sync**: connectivity, visibility, and focus
//!   signals are debounced into dispatch cycles that replay pending
//!   records in bounded chunks, with at most one cycle in flight
//! - **Per-record outcomes**: the server classifies each record as
//!   synced or failed; transport failures retry, logic failures are
//!   terminal
//! - **Account reconciliation**: one-shot hydrate/claim merge between
//!   local guest data and the server-held account at first sign-in
//! - **Optional sync server** (feature `server`): Axum implementation
//!   of the sync REST contract
//!
//! ## Example
//!
//! ```rust,no_run
//! use habitcore::{MutationAction, MutationPayload, QueueManager, Store};
//! use std::sync::{Arc, Mutex};
//!
//! # fn main() -> habitcore::HabitResult<()> {
//! let store = Arc::new(Mutex::new(Store::new("habit.db")?));
//! let queue = QueueManager::with_defaults(Arc::clone(&store));
//!
//! queue.enqueue(
//!     "rec-01",
//!     MutationAction::Create,
//!     MutationPayload::Bookmark {
//!         surah: 2,
//!         verse: 255,
//!         label: Some("Ayat al-Kursi".to_string()),
//!     },
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod queue;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod sync_client;
pub mod validation;

#[cfg(feature = "server")]
pub mod sync_server;

pub use config::{Config, ConfigData, SyncTuning};
pub use dispatcher::{
    ConnectivityProbe, DispatchOutcome, Notifier, SessionProvider, SyncEngine, SyncTrigger,
};
pub use error::{HabitError, HabitResult};
pub use models::{
    EntityKind, GuestSnapshot, MutationAction, MutationPayload, QueueRecord, RecordStatus,
    ServerSnapshot, SyncRequest, SyncResponse,
};
pub use queue::{OverflowPolicy, QueueManager};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use store::{QueueStats, Store};
pub use sync_client::{HttpTransport, SyncTransport, ACCOUNT_ID_HEADER};
