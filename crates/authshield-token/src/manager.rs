//! Token lifecycle: issue, authenticate, refresh, revoke.

use crate::admission::{Admission, AdmissionController};
use crate::claims::ClaimSet;
use crate::clock::{Clock, SystemClock};
use crate::codec::{SignedToken, TokenCodec};
use crate::config::AuthConfig;
use crate::revocation::RevocationStore;
use crate::{Error, Result};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Orchestrates the codec and the revocation store.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct TokenManager {
    codec: TokenCodec,
    store: Arc<dyn RevocationStore>,
    admission: Option<Arc<AdmissionController>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    store_timeout: Duration,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("codec", &self.codec)
            .field("admission", &self.admission)
            .field("default_ttl", &self.default_ttl)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// A manager on wall-clock time.
    pub fn new(config: &AuthConfig, store: Arc<dyn RevocationStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// A manager reading time from `clock`.
    ///
    /// The store should be built on the same clock.
    pub fn with_clock(
        config: &AuthConfig,
        store: Arc<dyn RevocationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec: TokenCodec::new(&config.signing_key, clock.clone()),
            store,
            admission: None,
            clock,
            default_ttl: config.default_ttl,
            store_timeout: config.store_timeout,
        }
    }

    /// Gate [`TokenManager::issue_for_client`] behind `admission`.
    ///
    /// Pass an `Arc` to share the controller with
    /// [`spawn_admission_sweeper`](crate::spawn_admission_sweeper).
    #[must_use]
    pub fn with_admission(mut self, admission: impl Into<Arc<AdmissionController>>) -> Self {
        self.admission = Some(admission.into());
        self
    }

    /// The admission controller, if one is attached.
    pub fn admission(&self) -> Option<&AdmissionController> {
        self.admission.as_deref()
    }

    /// The underlying codec.
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Issue a token with the default ttl.
    pub fn issue(&self, claims: ClaimSet) -> Result<SignedToken> {
        self.issue_with_ttl(claims, self.default_ttl)
    }

    /// Issue a token living for `ttl`.
    pub fn issue_with_ttl(&self, claims: ClaimSet, ttl: Duration) -> Result<SignedToken> {
        let token = self.codec.issue(claims, ttl)?;
        tracing::debug!(token_id = %token.id(), ttl_secs = ttl.as_secs(), "issued token");
        Ok(token)
    }

    /// Admit `client`, then issue with the default ttl.
    ///
    /// Without an admission controller this is plain [`TokenManager::issue`].
    pub fn issue_for_client(&self, client: &str, claims: ClaimSet) -> Result<SignedToken> {
        if let Some(admission) = &self.admission {
            if let Admission::Rejected { retry_after } = admission.try_admit(client) {
                return Err(Error::RateLimited { retry_after });
            }
        }
        self.issue(claims)
    }

    /// Verify a presented token.
    ///
    /// The revocation store is consulted first and its failure rejects the
    /// token. Codec errors are returned as they are.
    pub async fn authenticate(&self, token: &SignedToken) -> Result<ClaimSet> {
        self.authenticate_inner(token, None).await
    }

    /// [`TokenManager::authenticate`], aborted with [`Error::Cancelled`]
    /// when `cancel` fires during the store lookup.
    pub async fn authenticate_with_cancel(
        &self,
        token: &SignedToken,
        cancel: &CancellationToken,
    ) -> Result<ClaimSet> {
        self.authenticate_inner(token, Some(cancel)).await
    }

    async fn authenticate_inner(
        &self,
        token: &SignedToken,
        cancel: Option<&CancellationToken>,
    ) -> Result<ClaimSet> {
        let token_id = token.id();

        let revoked = self
            .bounded("is_revoked", cancel, self.store.is_revoked(&token_id))
            .await?;
        if revoked {
            // A revoked token past its own expiry reports as expired. The
            // unverified `exp` is safe to read here: the identity hashes the
            // whole token, so an edited payload would not have matched.
            if let Some(expired_at) = TokenCodec::inspect(token)
                .ok()
                .and_then(|c| c.expires_at())
                .filter(|exp| self.clock.now_secs() >= *exp)
            {
                return Err(Error::Expired { expired_at });
            }
            tracing::debug!(token_id = %token_id, "rejected revoked token");
            return Err(Error::Revoked);
        }

        let claims = self.codec.verify(token)?;
        tracing::debug!(token_id = %token_id, sub = claims.subject(), "authenticated token");
        Ok(claims)
    }

    /// Authenticate `token` and issue a successor with the same non-time
    /// claims and a fresh default ttl.
    ///
    /// The presented token stays valid; revoke it explicitly for single-use
    /// refresh.
    pub async fn refresh(&self, token: &SignedToken) -> Result<SignedToken> {
        let claims = self.authenticate(token).await?;
        let fresh = self.issue(claims.without_time_claims())?;
        tracing::debug!(from = %token.id(), to = %fresh.id(), "refreshed token");
        Ok(fresh)
    }

    /// Record `token` as revoked until its own `exp`.
    ///
    /// Only parses the token; the signature is not required to be valid.
    /// Already-expired tokens are accepted without a store write.
    pub async fn revoke(&self, token: &SignedToken) -> Result<()> {
        self.revoke_inner(token, None).await
    }

    /// [`TokenManager::revoke`], aborted with [`Error::Cancelled`] when
    /// `cancel` fires during the store write.
    pub async fn revoke_with_cancel(
        &self,
        token: &SignedToken,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.revoke_inner(token, Some(cancel)).await
    }

    async fn revoke_inner(
        &self,
        token: &SignedToken,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let claims = TokenCodec::inspect(token)?;
        let expires_at = claims
            .expires_at()
            .ok_or_else(|| Error::Malformed("missing or non-integer `exp` claim".to_string()))?;
        let token_id = token.id();

        if self.clock.now_secs() >= expires_at {
            tracing::debug!(token_id = %token_id, "token already expired, nothing to revoke");
            return Ok(());
        }

        self.bounded("revoke", cancel, self.store.revoke(&token_id, expires_at))
            .await?;
        tracing::info!(token_id = %token_id, expires_at, "revoked token");
        Ok(())
    }

    /// Reclaim expired revocation records.
    pub async fn sweep_expired(&self) -> Result<u64> {
        self.bounded("sweep_expired", None, self.store.sweep_expired())
            .await
    }

    async fn bounded<T, F>(
        &self,
        op: &'static str,
        cancel: Option<&CancellationToken>,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timed = tokio::time::timeout(self.store_timeout, fut);
        let outcome = match cancel {
            Some(cancel) => tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = timed => outcome,
            },
            None => timed.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(op, timeout_ms, "revocation store timed out");
                Err(Error::StoreUnavailable(format!(
                    "{op} timed out after {timeout_ms}ms"
                )))
            }
        }
    }
}
