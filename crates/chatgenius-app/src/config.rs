use std::path::PathBuf;

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use tracing::warn;

/// Placeholder JWT secrets that must not be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

const DEFAULT_DB_PATH: &str = "chatgenius.db";
const DEFAULT_SESSION_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub session_ttl: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let db_path = lookup("CHATGENIUS_DB_PATH")
            .unwrap_or_else(|| DEFAULT_DB_PATH.into())
            .into();

        let jwt_secret = match lookup("CHATGENIUS_JWT_SECRET") {
            Some(secret) if PLACEHOLDER_SECRETS.contains(&secret.as_str()) => {
                bail!("CHATGENIUS_JWT_SECRET is still a placeholder, set a real secret")
            }
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("CHATGENIUS_JWT_SECRET unset, sessions will not survive a restart");
                random_secret()
            }
        };

        let hours = match lookup("CHATGENIUS_SESSION_HOURS") {
            Some(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("CHATGENIUS_SESSION_HOURS is not a number: {raw}"))?,
            None => DEFAULT_SESSION_HOURS,
        };
        if hours <= 0 {
            bail!("CHATGENIUS_SESSION_HOURS must be positive, got {}", hours);
        }

        Ok(Self {
            db_path,
            jwt_secret,
            session_ttl: Duration::hours(hours),
        })
    }
}

fn random_secret() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}
