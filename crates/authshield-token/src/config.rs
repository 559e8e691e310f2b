//! Configuration loaded from TOML and environment overrides.

use crate::admission::AdmissionPolicy;
use crate::codec::SigningKey;
use crate::rbac::RolePolicy;
use crate::{Error, Result};

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the signing secret.
pub const ENV_SIGNING_KEY: &str = "AUTHSHIELD_SIGNING_KEY";
/// Environment variable overriding `default_ttl`.
pub const ENV_TOKEN_TTL: &str = "AUTHSHIELD_TOKEN_TTL";
/// Environment variable overriding `store_timeout`.
pub const ENV_STORE_TIMEOUT: &str = "AUTHSHIELD_STORE_TIMEOUT";
/// Environment variable overriding `admission.window`.
pub const ENV_ADMISSION_WINDOW: &str = "AUTHSHIELD_ADMISSION_WINDOW";
/// Environment variable overriding `admission.max_requests`.
pub const ENV_ADMISSION_MAX: &str = "AUTHSHIELD_ADMISSION_MAX";

const MIN_RECOMMENDED_KEY_LEN: usize = 32;

/// Everything the token core needs from the outside.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret.
    pub signing_key: SigningKey,
    /// Lifetime of issued and refreshed tokens.
    pub default_ttl: Duration,
    /// Upper bound on any single revocation store call.
    pub store_timeout: Duration,
    /// Issuance rate limit.
    pub admission: AdmissionPolicy,
    /// Role table for permission checks.
    pub roles: RolePolicy,
}

impl AuthConfig {
    /// Config with defaults for everything but the key.
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            default_ttl: Duration::from_secs(15 * 60),
            store_timeout: Duration::from_secs(2),
            admission: AdmissionPolicy::default(),
            roles: RolePolicy::default(),
        }
    }

    /// Parse a TOML document, then validate.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        raw.into_config(|_| None)
    }

    /// Load `path` (if given) and apply `AUTHSHIELD_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Like [`AuthConfig::load`] with an explicit variable lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("invalid TOML in {}: {e}", path.display()))
                })?
            }
            None => RawConfig::default(),
        };
        raw.into_config(lookup)
    }

    /// Reject unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.signing_key.is_empty() {
            return Err(Error::Config("signing key is empty".to_string()));
        }
        if self.default_ttl < Duration::from_secs(1) {
            return Err(Error::Config(
                "default_ttl must be at least one second".to_string(),
            ));
        }
        if self.default_ttl.subsec_nanos() != 0 {
            return Err(Error::Config(
                "default_ttl must be a whole number of seconds".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(Error::Config("store_timeout must be non-zero".to_string()));
        }
        if self.admission.window.is_zero() {
            return Err(Error::Config("admission window must be non-zero".to_string()));
        }
        if self.signing_key.len() < MIN_RECOMMENDED_KEY_LEN {
            tracing::warn!(
                key_len = self.signing_key.len(),
                "signing key is shorter than {MIN_RECOMMENDED_KEY_LEN} bytes"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    signing_key: Option<String>,
    default_ttl: Option<String>,
    store_timeout: Option<String>,
    #[serde(default)]
    admission: RawAdmission,
    roles: Option<RolePolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAdmission {
    window: Option<String>,
    max_requests: Option<u32>,
}

impl RawConfig {
    fn into_config<F>(self, lookup: F) -> Result<AuthConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let signing_key = env(ENV_SIGNING_KEY)
            .or(self.signing_key)
            .ok_or_else(|| {
                Error::Config(format!(
                    "no signing key: set `signing_key` or {ENV_SIGNING_KEY}"
                ))
            })?;

        let mut cfg = AuthConfig::new(SigningKey::from(signing_key.as_str()));

        if let Some(v) = env(ENV_TOKEN_TTL).or(self.default_ttl) {
            cfg.default_ttl = parse_duration(&v)?;
        }
        if let Some(v) = env(ENV_STORE_TIMEOUT).or(self.store_timeout) {
            cfg.store_timeout = parse_duration(&v)?;
        }
        if let Some(v) = env(ENV_ADMISSION_WINDOW).or(self.admission.window) {
            cfg.admission.window = parse_duration(&v)?;
        }
        if let Some(v) = env(ENV_ADMISSION_MAX) {
            cfg.admission.max_requests = v
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{ENV_ADMISSION_MAX}={v}: {e}")))?;
        } else if let Some(max) = self.admission.max_requests {
            cfg.admission.max_requests = max;
        }
        if let Some(roles) = self.roles {
            cfg.roles = roles;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

/// Parse `"500ms"`, `"30s"`, `"15m"`, `"1h"`, `"1d"` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || Error::Config(format!("invalid duration {s:?}"));

    let (digits, unit_ms): (&str, u64) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else if let Some(v) = s.strip_suffix('d') {
        (v, 86_400_000)
    } else {
        (s, 1_000)
    };

    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    n.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}
