//! HS256 token encoding and verification.

use crate::claims::ClaimSet;
use crate::clock::Clock;
use crate::{Error, Result};

use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

/// Shared secret used to sign and check tokens.
#[derive(Clone)]
pub struct SigningKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl SigningKey {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes.into()),
        }
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the key holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&str> for SigningKey {
    fn from(secret: &str) -> Self {
        Self::from_bytes(secret.as_bytes())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey(<{} bytes redacted>)", self.len())
    }
}

/// An opaque signed token as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedToken(String);

impl SignedToken {
    /// Borrow the token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the token string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Stable identity used by the revocation store.
    pub fn id(&self) -> TokenId {
        TokenId::of(self)
    }
}

impl From<String> for SignedToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for SignedToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex SHA-256 of the full token string.
///
/// Any change to any byte of the token yields a different identity, so a
/// revocation record can never be matched by a forged variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Identity of `token`.
    pub fn of(token: &SignedToken) -> Self {
        Self(hex::encode(Sha256::digest(token.as_str().as_bytes())))
    }

    /// Borrow the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signs and verifies claim sets with HMAC-SHA256.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    header: Header,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("alg", &self.header.alg)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec for `key`.
    pub fn new(key: &SigningKey, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked here against the injected clock, after the
        // signature, with no leeway.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(key.as_bytes()),
            decoding: DecodingKey::from_secret(key.as_bytes()),
            header: Header::new(Algorithm::HS256),
            validation,
            clock,
        }
    }

    /// Stamp `iat`/`exp` onto `claims` and sign them.
    ///
    /// `exp` has whole-second resolution, so `ttl` must be a whole number of
    /// seconds. A fractional ttl is rejected, not truncated.
    ///
    /// Fails with [`Error::Encoding`] when `sub` is missing, when `ttl` is
    /// shorter than one second or fractional, or when the claims cannot be
    /// serialized.
    pub fn issue(&self, mut claims: ClaimSet, ttl: Duration) -> Result<SignedToken> {
        claims.require_subject()?;

        let ttl_secs = ttl.as_secs();
        if ttl_secs == 0 {
            return Err(Error::Encoding(format!(
                "ttl must be at least one second, got {}ms",
                ttl.as_millis()
            )));
        }
        if ttl.subsec_nanos() != 0 {
            return Err(Error::Encoding(format!(
                "ttl must be a whole number of seconds, got {}ms",
                ttl.as_millis()
            )));
        }

        let issued_at = self.clock.now_secs();
        let expires_at = issued_at
            .checked_add(ttl_secs)
            .filter(|exp| i64::try_from(*exp).is_ok())
            .ok_or_else(|| Error::Encoding(format!("ttl of {ttl_secs}s overflows `exp`")))?;
        claims.stamp(issued_at, expires_at);

        let token = jsonwebtoken::encode(&self.header, &claims, &self.encoding)
            .map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(SignedToken(token))
    }

    /// Parse, check the signature, then check expiry.
    ///
    /// Nothing in the payload is trusted until the signature matches.
    pub fn verify(&self, token: &SignedToken) -> Result<ClaimSet> {
        let data = jsonwebtoken::decode::<Map<String, Value>>(
            token.as_str(),
            &self.decoding,
            &self.validation,
        )?;
        let claims = ClaimSet::from(data.claims);

        let expires_at = claims
            .expires_at()
            .ok_or_else(|| Error::Malformed("missing or non-integer `exp` claim".to_string()))?;
        if claims.issued_at().is_none() {
            return Err(Error::Malformed(
                "missing or non-integer `iat` claim".to_string(),
            ));
        }

        if self.clock.now_secs() >= expires_at {
            return Err(Error::Expired {
                expired_at: expires_at,
            });
        }

        Ok(claims)
    }

    /// Decode the payload without checking the signature.
    ///
    /// Only for decisions that cannot be abused by a forged payload, such as
    /// choosing how long to retain a revocation record.
    pub fn inspect(token: &SignedToken) -> Result<ClaimSet> {
        let mut segments = token.as_str().split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(Error::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        };
        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(Error::Malformed("empty token segment".to_string()));
        }

        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| Error::Malformed(format!("invalid payload encoding: {e}")))?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(claims)) => Ok(ClaimSet::from(claims)),
            Ok(_) => Err(Error::Malformed("payload is not a JSON object".to_string())),
            Err(e) => Err(Error::Malformed(format!("invalid payload JSON: {e}"))),
        }
    }
}
