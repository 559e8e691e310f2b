use crate::clock::Clock;
use crate::codec::TokenId;
use crate::revocation::RevocationStore;
use crate::Result;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local revocation store backed by a [`DashMap`].
///
/// Reads and writes on different identities never contend beyond the shard
/// lock. Expired records are dropped lazily on read and by
/// [`RevocationStore::sweep_expired`].
#[derive(Debug)]
pub struct MemoryRevocationStore {
    records: DashMap<TokenId, u64>,
    clock: Arc<dyn Clock>,
}

impl MemoryRevocationStore {
    /// An empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Number of records currently held, live or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, token_id: &TokenId, expires_at: u64) -> Result<()> {
        self.records
            .entry(token_id.clone())
            .and_modify(|horizon| *horizon = (*horizon).max(expires_at))
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, token_id: &TokenId) -> Result<bool> {
        let now = self.clock.now_secs();
        let Some(horizon) = self.records.get(token_id).map(|r| *r.value()) else {
            return Ok(false);
        };
        if now < horizon {
            return Ok(true);
        }
        // Re-check under the shard lock: a concurrent revoke may have
        // extended the horizon since the read above.
        self.records.remove_if(token_id, |_, horizon| now >= *horizon);
        Ok(false)
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now_secs();
        let mut removed = 0;
        self.records.retain(|_, horizon| {
            let live = now < *horizon;
            if !live {
                removed += 1;
            }
            live
        });
        Ok(removed)
    }
}
