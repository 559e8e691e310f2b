use std::time::Duration;

use anyhow::Context;
use authshield_token::{AuthConfig, ClaimSet, SignedToken, TokenCodec, TokenManager};
use serde_json::{Value, json};

use crate::pout;

pub fn issue(
    manager: &TokenManager,
    json_mode: bool,
    sub: String,
    extra: Vec<(String, String)>,
    ttl: Option<Duration>,
) -> anyhow::Result<()> {
    let claims = build_claims(sub, extra);
    let token = match ttl {
        Some(ttl) => manager.issue_with_ttl(claims, ttl)?,
        None => manager.issue(claims)?,
    };
    let text = token.to_string();
    pout(json_mode, json!({ "token": token }), &text)
}

pub async fn verify(manager: &TokenManager, json_mode: bool, raw: &str) -> anyhow::Result<()> {
    let claims = manager
        .authenticate(&SignedToken::from(raw))
        .await
        .context("token rejected")?;
    let text = format!("Authenticated as {}", claims.subject().unwrap_or("<no subject>"));
    pout(json_mode, serde_json::to_value(&claims)?, &text)
}

pub async fn refresh(
    manager: &TokenManager,
    json_mode: bool,
    raw: &str,
    revoke_old: bool,
) -> anyhow::Result<()> {
    let presented = SignedToken::from(raw);
    let fresh = manager
        .refresh(&presented)
        .await
        .context("cannot refresh token")?;
    if revoke_old {
        manager
            .revoke(&presented)
            .await
            .context("refreshed, but failed to revoke the presented token")?;
    }
    let text = fresh.to_string();
    pout(
        json_mode,
        json!({ "token": fresh, "previous_revoked": revoke_old }),
        &text,
    )
}

pub async fn revoke(manager: &TokenManager, json_mode: bool, raw: &str) -> anyhow::Result<()> {
    let token = SignedToken::from(raw);
    manager.revoke(&token).await.context("cannot revoke token")?;
    pout(
        json_mode,
        json!({ "ok": true, "token_id": token.id() }),
        "Token revoked",
    )
}

pub fn inspect(json_mode: bool, raw: &str) -> anyhow::Result<()> {
    let claims = TokenCodec::inspect(&SignedToken::from(raw))?;
    let pretty = serde_json::to_string_pretty(&claims)?;
    pout(json_mode, serde_json::to_value(&claims)?, &pretty)
}

pub async fn check(
    manager: &TokenManager,
    config: &AuthConfig,
    json_mode: bool,
    raw: &str,
    permission: &str,
) -> anyhow::Result<()> {
    let claims = manager
        .authenticate(&SignedToken::from(raw))
        .await
        .context("token rejected")?;
    config.roles.authorize(&claims, permission)?;
    pout(
        json_mode,
        json!({ "ok": true, "sub": claims.subject(), "permission": permission }),
        &format!("Permission {permission} granted"),
    )
}

pub async fn sweep(manager: &TokenManager, json_mode: bool) -> anyhow::Result<()> {
    let removed = manager.sweep_expired().await?;
    pout(
        json_mode,
        json!({ "removed": removed }),
        &format!("Removed {removed} expired revocation records"),
    )
}

fn build_claims(sub: String, extra: Vec<(String, String)>) -> ClaimSet {
    extra.into_iter().fold(ClaimSet::for_subject(sub), |claims, (key, raw)| {
        let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        claims.with(key, value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_values_parse_as_json_when_possible() {
        let claims = build_claims(
            "a@example.com".to_string(),
            vec![
                ("role".to_string(), "admin".to_string()),
                ("level".to_string(), "3".to_string()),
                ("scopes".to_string(), "[\"read\"]".to_string()),
            ],
        );
        assert_eq!(claims.subject(), Some("a@example.com"));
        assert_eq!(claims.get("role"), Some(&json!("admin")));
        assert_eq!(claims.get("level"), Some(&json!(3)));
        assert_eq!(claims.get("scopes"), Some(&json!(["read"])));
    }
}
