//! HTTP transport for the sync protocol.
//!
//! This module provides the client side of the sync REST contract:
//! - `POST /sync`: replay a batch of queue records
//! - `GET /account/full-snapshot`: fetch the account snapshot
//! - `POST /account/claim`: bulk-upload local guest state
//!
//! The endpoints are reached through the [`SyncTransport`] trait so
//! the dispatcher and reconciler can be exercised against an
//! in-memory transport in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{HabitError, HabitResult};
use crate::models::{GuestSnapshot, QueueRecord, ServerSnapshot, SyncRequest, SyncResponse};

/// Header carrying the authenticated account identity.
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

/// Network seam between the sync core and the remote endpoint.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Replay one chunk of queue records. An `Err` is a transport
    /// failure (the server's per-record outcome is unknowable); an
    /// `Ok` response classifies every entry as synced or failed.
    async fn push_batch(&self, identity: &str, entries: &[QueueRecord])
        -> HabitResult<SyncResponse>;

    /// Fetch the full server-held snapshot for the identity.
    async fn fetch_snapshot(&self, identity: &str) -> HabitResult<ServerSnapshot>;

    /// Bulk-upload the local guest state (Claim branch only).
    async fn claim(&self, identity: &str, guest: &GuestSnapshot) -> HabitResult<()>;
}

/// Reqwest-backed transport speaking to a real endpoint.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> HabitResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HabitError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push_batch(
        &self,
        identity: &str,
        entries: &[QueueRecord],
    ) -> HabitResult<SyncResponse> {
        let request = SyncRequest {
            entries: entries.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/sync", self.base_url))
            .header(ACCOUNT_ID_HEADER, identity)
            .json(&request)
            .send()
            .await
            .map_err(|e| HabitError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HabitError::sync(format!(
                "Sync failed with status {}",
                response.status()
            )));
        }

        response
            .json::<SyncResponse>()
            .await
            .map_err(|e| HabitError::sync(format!("Failed to parse sync response: {}", e)))
    }

    async fn fetch_snapshot(&self, identity: &str) -> HabitResult<ServerSnapshot> {
        let response = self
            .client
            .get(format!("{}/account/full-snapshot", self.base_url))
            .header(ACCOUNT_ID_HEADER, identity)
            .send()
            .await
            .map_err(|e| HabitError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HabitError::sync(format!(
                "Snapshot fetch failed with status {}",
                response.status()
            )));
        }

        response
            .json::<ServerSnapshot>()
            .await
            .map_err(|e| HabitError::sync(format!("Failed to parse snapshot: {}", e)))
    }

    async fn claim(&self, identity: &str, guest: &GuestSnapshot) -> HabitResult<()> {
        let response = self
            .client
            .post(format!("{}/account/claim", self.base_url))
            .header(ACCOUNT_ID_HEADER, identity)
            .json(guest)
            .send()
            .await
            .map_err(|e| HabitError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HabitError::sync(format!(
                "Claim failed with status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let transport = HttpTransport::new("https://sync.example.com/").unwrap();
        assert_eq!(transport.base_url, "https://sync.example.com");
    }
}
