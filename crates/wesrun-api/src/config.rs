//! Server configuration.

use std::net::SocketAddr;

use anyhow::Context as _;
use chrono::Duration;

/// Deployment posture for runtime guardrails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Posture {
    /// Local development posture (in-memory fallbacks allowed).
    #[default]
    Dev,
    /// Deployed posture (engine URL and token required).
    Deployed,
}

impl Posture {
    /// Returns true when posture is dev.
    #[must_use]
    pub fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }
}

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Deployment posture.
    pub posture: Posture,
    /// Base URL of the external analysis engine.
    pub engine_url: Option<String>,
    /// API token for the external analysis engine.
    pub engine_token: Option<String>,
    /// Source identifier stamped on outbound bus events.
    pub event_source: String,
    /// Technical-tag key marking analyses owned by this deployment.
    pub tag_key: String,
    /// How long terminal job records are retained.
    pub terminal_ttl: Duration,
    /// Delivery attempts before an inbound event is dead-lettered.
    pub ingest_max_attempts: u32,
}

impl Config {
    /// Loads configuration from `WESRUN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparseable, or if the
    /// deployed posture is missing its engine binding.
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env_or("WESRUN_HTTP_ADDR", "0.0.0.0:8080")
            .parse()
            .context("WESRUN_HTTP_ADDR is not a valid socket address")?;
        let posture = match env_or("WESRUN_POSTURE", "dev").as_str() {
            "dev" => Posture::Dev,
            "deployed" => Posture::Deployed,
            other => anyhow::bail!("WESRUN_POSTURE must be 'dev' or 'deployed', got '{other}'"),
        };
        let terminal_ttl_hours: i64 = env_or("WESRUN_TERMINAL_TTL_HOURS", "720")
            .parse()
            .context("WESRUN_TERMINAL_TTL_HOURS is not a valid integer")?;
        let ingest_max_attempts: u32 = env_or("WESRUN_INGEST_MAX_ATTEMPTS", "3")
            .parse()
            .context("WESRUN_INGEST_MAX_ATTEMPTS is not a valid integer")?;

        let config = Self {
            listen_addr,
            posture,
            engine_url: std::env::var("WESRUN_ENGINE_URL").ok(),
            engine_token: std::env::var("WESRUN_ENGINE_TOKEN").ok(),
            event_source: env_or("WESRUN_EVENT_SOURCE", "orcabus.wesrun"),
            tag_key: env_or("WESRUN_TAG_KEY", "wesrun-id"),
            terminal_ttl: Duration::hours(terminal_ttl_hours),
            ingest_max_attempts,
        };

        if config.posture == Posture::Deployed {
            anyhow::ensure!(
                config.engine_url.is_some(),
                "WESRUN_ENGINE_URL is required when WESRUN_POSTURE=deployed"
            );
            anyhow::ensure!(
                config.engine_token.is_some(),
                "WESRUN_ENGINE_TOKEN is required when WESRUN_POSTURE=deployed"
            );
        }
        Ok(config)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
