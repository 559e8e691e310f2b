mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use authshield_token::{
    AuthConfig, Clock, FileRevocationStore, RevocationStore, SystemClock, TokenManager,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::tokens;

#[derive(Debug, Parser)]
#[command(name = "authshield", about = "Issue, verify, refresh and revoke AuthShield tokens")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// TOML config file (AUTHSHIELD_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Revocation store file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Issue a token for a subject (not rate-limited)
    Issue {
        #[arg(long)]
        sub: String,
        /// Extra claim; VALUE is parsed as JSON when possible
        #[arg(long = "claim", value_parser = parse_key_val)]
        claims: Vec<(String, String)>,
        /// Token lifetime, e.g. 15m (defaults to the configured ttl)
        #[arg(long, value_parser = parse_ttl)]
        ttl: Option<Duration>,
    },
    /// Authenticate a token and print its claims
    Verify { token: String },
    /// Issue a successor token with the same claims
    Refresh {
        token: String,
        /// Revoke the presented token after refreshing
        #[arg(long)]
        revoke_old: bool,
    },
    /// Revoke a token until its natural expiry
    Revoke { token: String },
    /// Decode a token's claims without verifying it
    Inspect { token: String },
    /// Authenticate a token and check a permission against its role
    Check {
        token: String,
        #[arg(long)]
        permission: String,
    },
    /// Remove expired revocation records
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if let Commands::Inspect { token } = &cli.command {
        return tokens::inspect(cli.json, token);
    }

    let config = AuthConfig::load(cli.config.as_deref())?;
    let store_path = cli.store.clone().unwrap_or_else(default_store_path);
    tracing::debug!(store = %store_path.display(), "using revocation store");
    let clock = Arc::new(SystemClock);
    let store = Arc::new(FileRevocationStore::open(&store_path, clock.clone()).await?);
    let manager = build_manager(&config, store, clock);

    match cli.command {
        Commands::Issue { sub, claims, ttl } => {
            tokens::issue(&manager, cli.json, sub, claims, ttl)?;
        }
        Commands::Verify { token } => tokens::verify(&manager, cli.json, &token).await?,
        Commands::Refresh { token, revoke_old } => {
            tokens::refresh(&manager, cli.json, &token, revoke_old).await?;
        }
        Commands::Revoke { token } => tokens::revoke(&manager, cli.json, &token).await?,
        Commands::Check { token, permission } => {
            tokens::check(&manager, &config, cli.json, &token, &permission).await?;
        }
        Commands::Sweep => tokens::sweep(&manager, cli.json).await?,
        Commands::Inspect { token } => tokens::inspect(cli.json, &token)?,
    }

    Ok(())
}

/// Each invocation issues at most one token and then exits, so admission
/// windows could never carry over between runs. No `AdmissionController` is
/// attached; the `[admission]` settings only apply to embedding services.
fn build_manager(
    config: &AuthConfig,
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
) -> TokenManager {
    TokenManager::with_clock(config, store, clock)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".authshield"))
        .join("authshield")
        .join("revocations.json")
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| "must be KEY=VALUE".to_string())?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_ttl(s: &str) -> Result<Duration, String> {
    authshield_token::parse_duration(s).map_err(|e| e.to_string())
}

pub fn pout(json_mode: bool, value: serde_json::Value, text: &str) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_val_splits_on_first_equals() {
        assert_eq!(
            parse_key_val("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn cli_parses_issue() {
        let cli = Cli::try_parse_from([
            "authshield", "--json", "issue", "--sub", "a@example.com", "--claim", "role=admin",
            "--ttl", "10m",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Issue { sub, claims, ttl } => {
                assert_eq!(sub, "a@example.com");
                assert_eq!(claims, vec![("role".to_string(), "admin".to_string())]);
                assert_eq!(ttl, Some(Duration::from_secs(600)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_manager_does_not_rate_limit_issuance() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(authshield_token::MemoryRevocationStore::new(clock.clone()));
        let config = AuthConfig::new(authshield_token::SigningKey::from(
            "cli-secret-cli-secret-cli-secret!",
        ));
        let manager = build_manager(&config, store, clock);

        assert!(manager.admission().is_none());
        for _ in 0..=config.admission.max_requests {
            manager
                .issue_for_client("local", authshield_token::ClaimSet::for_subject("ops"))
                .unwrap();
        }
    }
}
