//! `wesrun-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;

use wesrun_api::config::{Config, Posture};
use wesrun_api::engine_client::EngineClient;
use wesrun_api::server::Server;
use wesrun_core::observability::{init_logging, LogFormat};
use wesrun_flow::engine::memory::InMemoryEngine;
use wesrun_flow::engine::AnalysisEngine;
use wesrun_flow::ingest::InMemoryDeadLetters;
use wesrun_flow::outbox::InMemoryBus;
use wesrun_flow::store::memory::InMemoryJobStore;

fn choose_log_format(config: &Config) -> LogFormat {
    if config.posture.is_dev() {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));

    let engine: Arc<dyn AnalysisEngine> =
        match (config.engine_url.as_deref(), config.engine_token.as_deref()) {
            (Some(url), Some(token)) => {
                tracing::info!(url, "using HTTP engine client");
                Arc::new(EngineClient::new(url, token))
            }
            _ => {
                if config.posture != Posture::Dev {
                    anyhow::bail!("engine binding is required outside dev posture");
                }
                tracing::warn!("WESRUN_ENGINE_URL not set; using in-memory engine (dev only)");
                Arc::new(InMemoryEngine::accepting("dev-analysis"))
            }
        };

    let store = Arc::new(InMemoryJobStore::with_terminal_ttl(config.terminal_ttl));
    let server = Server::new(
        config,
        store,
        engine,
        Arc::new(InMemoryBus::new()),
        Arc::new(InMemoryDeadLetters::new()),
    );
    server.serve().await?;
    Ok(())
}
