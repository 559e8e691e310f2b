//! Claim sets carried inside tokens.

use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Subject claim name.
pub const SUBJECT: &str = "sub";
/// Issued-at claim name (seconds since epoch).
pub const ISSUED_AT: &str = "iat";
/// Expiry claim name (seconds since epoch).
pub const EXPIRES_AT: &str = "exp";

/// Claim names regenerated on every issuance.
pub const TIME_CLAIMS: [&str; 2] = [ISSUED_AT, EXPIRES_AT];

/// Ordered mapping of claim names to JSON values.
///
/// Application claims are opaque and survive refresh unchanged; `iat` and
/// `exp` are always stamped by the codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet {
    claims: Map<String, Value>,
}

impl ClaimSet {
    /// A claim set holding only `sub`.
    pub fn for_subject(subject: impl Into<String>) -> Self {
        let mut claims = Map::new();
        claims.insert(SUBJECT.to_string(), Value::String(subject.into()));
        Self { claims }
    }

    /// Builder-style insert of an already-JSON value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    /// Insert any serializable value.
    ///
    /// Fails with [`Error::Encoding`] if `value` cannot be represented as JSON.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| Error::Encoding(format!("claim {key}: {e}")))?;
        self.claims.insert(key, value);
        Ok(())
    }

    /// Remove a claim, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.claims.remove(key)
    }

    /// Get a claim by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    /// Convenience accessor for `sub`.
    pub fn subject(&self) -> Option<&str> {
        self.get(SUBJECT).and_then(Value::as_str)
    }

    /// Convenience accessor for `iat`.
    pub fn issued_at(&self) -> Option<u64> {
        self.get(ISSUED_AT).and_then(Value::as_u64)
    }

    /// Convenience accessor for `exp`.
    pub fn expires_at(&self) -> Option<u64> {
        self.get(EXPIRES_AT).and_then(Value::as_u64)
    }

    /// Copy of this set without `iat`/`exp`.
    #[must_use]
    pub fn without_time_claims(&self) -> Self {
        let mut out = self.clone();
        for key in TIME_CLAIMS {
            out.claims.remove(key);
        }
        out
    }

    /// Iterate claims in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.claims.iter()
    }

    /// Number of claims.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// True if there are no claims.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Borrow as a JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Consume into a JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.claims
    }

    pub(crate) fn stamp(&mut self, issued_at: u64, expires_at: u64) {
        self.claims.insert(ISSUED_AT.to_string(), Value::from(issued_at));
        self.claims.insert(EXPIRES_AT.to_string(), Value::from(expires_at));
    }

    pub(crate) fn require_subject(&self) -> Result<&str> {
        match self.subject() {
            Some(s) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(Error::Encoding("subject claim is empty".to_string())),
            None => Err(Error::Encoding(
                "claim set has no string `sub` claim".to_string(),
            )),
        }
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(claims: Map<String, Value>) -> Self {
        Self { claims }
    }
}

impl TryFrom<Value> for ClaimSet {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(claims) => Ok(Self { claims }),
            other => Err(Error::Encoding(format!(
                "claims must be a JSON object, got {other}"
            ))),
        }
    }
}
