//! Error types.

use std::time::Duration;

use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
///
/// Every variant is a distinct outcome; the boundary layer maps them to
/// different responses (see [`Error::status_code`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Token cannot be parsed into header, payload and signature.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature does not match the payload (tampered or wrong key).
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// Current time is at or past the `exp` claim.
    #[error("token expired at {expired_at}")]
    Expired {
        /// The token's `exp` claim, seconds since epoch.
        expired_at: u64,
    },

    /// Token identity is present in the revocation store.
    #[error("token has been revoked")]
    Revoked,

    /// Claims or ttl cannot be encoded into a token.
    #[error("cannot encode token: {0}")]
    Encoding(String),

    /// Revocation store failed or did not answer in time.
    #[error("revocation store unavailable: {0}")]
    StoreUnavailable(String),

    /// Caller cancelled a store-backed operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Admission controller rejected the request.
    #[error("rate limit exceeded, retry after {}ms", retry_after.as_millis())]
    RateLimited {
        /// Time until the client's window resets.
        retry_after: Duration,
    },

    /// Verified claims do not grant the requested permission.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status the boundary layer should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Malformed(_) | Error::SignatureInvalid | Error::Expired { .. } | Error::Revoked => {
                401
            }
            Error::Encoding(_) => 400,
            Error::Forbidden(_) => 403,
            Error::RateLimited { .. } => 429,
            Error::StoreUnavailable(_) | Error::Cancelled => 503,
            Error::Config(_) => 500,
        }
    }

    /// True for outcomes that reject a presented token.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        self.status_code() == 401
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Error::SignatureInvalid,
            _ => Error::Malformed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_stay_distinct() {
        assert_eq!(Error::Revoked.status_code(), 401);
        assert_eq!(Error::Forbidden("write".into()).status_code(), 403);
        assert_eq!(
            Error::RateLimited {
                retry_after: Duration::from_secs(3)
            }
            .status_code(),
            429
        );
        assert_eq!(Error::StoreUnavailable("down".into()).status_code(), 503);
        assert!(Error::SignatureInvalid.is_rejection());
        assert!(!Error::Cancelled.is_rejection());
    }

    #[test]
    fn rate_limited_message_carries_retry_after() {
        let err = Error::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "rate limit exceeded, retry after 1500ms");
    }
}
