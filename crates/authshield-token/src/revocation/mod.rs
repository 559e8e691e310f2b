//! Revocation store interface and backends.
//!
//! A revoked token is tracked by its [`TokenId`] until the token would have
//! expired on its own. Past that point the codec rejects it as expired, so
//! the record is only taking up space and may be swept.

use crate::codec::TokenId;
use crate::Result;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "file-store")]
mod file;
mod memory;

#[cfg(feature = "file-store")]
pub use file::FileRevocationStore;
pub use memory::MemoryRevocationStore;

/// One revoked token identity and how long it must be remembered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Identity of the revoked token.
    pub token_id: TokenId,
    /// The token's own `exp`, seconds since epoch.
    pub expires_at: u64,
}

impl RevocationRecord {
    /// True while the record must still be honoured.
    pub fn is_live(&self, now_secs: u64) -> bool {
        now_secs < self.expires_at
    }
}

/// Storage for revoked token identities.
///
/// Implementations must be safe to share across tasks. A revocation that
/// completed before an `is_revoked` call started must be visible to it.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record `token_id` as revoked until `expires_at`.
    ///
    /// Idempotent: revoking an identity twice succeeds and keeps the later
    /// horizon.
    async fn revoke(&self, token_id: &TokenId, expires_at: u64) -> Result<()>;

    /// True iff a live record exists for `token_id`.
    async fn is_revoked(&self, token_id: &TokenId) -> Result<bool>;

    /// Delete records whose horizon has passed. Returns how many were removed.
    async fn sweep_expired(&self) -> Result<u64>;
}

/// Spawn a task that calls [`RevocationStore::sweep_expired`] every `every`
/// until `shutdown` is cancelled.
pub fn spawn_sweeper(
    store: Arc<dyn RevocationStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("revocation sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    match store.sweep_expired().await {
                        Ok(0) => {}
                        Ok(removed) => tracing::info!(removed, "swept expired revocation records"),
                        Err(e) => tracing::error!(error = %e, "revocation sweep failed"),
                    }
                }
            }
        }
    })
}
