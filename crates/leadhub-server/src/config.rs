use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use leadhub_connect::LifecycleConfig;

/// Placeholder JWT secrets that must not be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub webhook_secret: Option<String>,
    pub lifecycle: LifecycleConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys fall back to defaults, except
    /// the JWT secret.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("LEADHUB_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("LEADHUB_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let host = get("LEADHUB_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&get, "LEADHUB_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let defaults = LifecycleConfig::default();
        let lifecycle = LifecycleConfig {
            whatsapp_delay: millis_or(&get, "LEADHUB_WHATSAPP_DELAY_MS", defaults.whatsapp_delay)?,
            instagram_delay: millis_or(&get, "LEADHUB_INSTAGRAM_DELAY_MS", defaults.instagram_delay)?,
            poll_interval: millis_or(&get, "LEADHUB_POLL_INTERVAL_MS", defaults.poll_interval)?,
            stale_after: Duration::from_secs(parse_or(
                &get,
                "LEADHUB_STALE_AFTER_SECS",
                defaults.stale_after.as_secs(),
            )?),
            ..defaults
        };
        if lifecycle.poll_interval.is_zero() {
            bail!("LEADHUB_POLL_INTERVAL_MS must be greater than zero");
        }

        Ok(Self {
            addr,
            db_path: get("LEADHUB_DB_PATH").unwrap_or_else(|| "leadhub.db".into()).into(),
            jwt_secret,
            webhook_secret: get("LEADHUB_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            lifecycle,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

fn millis_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_or(get, key, default_ms).map(Duration::from_millis)
}
