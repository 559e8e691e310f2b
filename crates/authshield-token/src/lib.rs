//! authshield-token
//!
//! Stateless bearer tokens with explicit revocation and rate-limited issuance.
//! It covers four recurring needs:
//!
//! - **Issuing** HS256 tokens carrying a subject and opaque application claims
//! - **Authenticating** them: revocation lookup first, then signature, then expiry
//! - **Refreshing** them without losing claims
//! - **Revoking** them through a pluggable [`RevocationStore`]
//!
//! Issuance paths may be gated by an [`AdmissionController`], a per-client
//! fixed-window limiter. Verified claims can be checked against a
//! [`RolePolicy`].
//!
//! ## Quick start
//! ```no_run
//! use std::sync::Arc;
//! use authshield_token::{
//!     AuthConfig, ClaimSet, MemoryRevocationStore, SigningKey, SystemClock, TokenManager,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::new(SigningKey::from("a-long-random-secret-from-the-environment"));
//! let store = Arc::new(MemoryRevocationStore::new(Arc::new(SystemClock)));
//! let manager = TokenManager::new(&config, store);
//!
//! let token = manager.issue(ClaimSet::for_subject("a@example.com"))?;
//! let claims = manager.authenticate(&token).await?;
//! println!("sub={:?}", claims.subject());
//!
//! manager.revoke(&token).await?;
//! assert!(manager.authenticate(&token).await.is_err());
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]

mod admission;
mod claims;
mod clock;
mod codec;
mod config;
mod error;
mod manager;
mod rbac;
mod revocation;

pub use admission::{Admission, AdmissionController, AdmissionPolicy, spawn_admission_sweeper};
pub use claims::{ClaimSet, EXPIRES_AT, ISSUED_AT, SUBJECT, TIME_CLAIMS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{SignedToken, SigningKey, TokenCodec, TokenId};
pub use config::{
    AuthConfig, ENV_ADMISSION_MAX, ENV_ADMISSION_WINDOW, ENV_SIGNING_KEY, ENV_STORE_TIMEOUT,
    ENV_TOKEN_TTL, parse_duration,
};
pub use error::{Error, Result};
pub use manager::TokenManager;
pub use rbac::{ROLE_CLAIM, RolePolicy};
#[cfg(feature = "file-store")]
pub use revocation::FileRevocationStore;
pub use revocation::{MemoryRevocationStore, RevocationRecord, RevocationStore, spawn_sweeper};
