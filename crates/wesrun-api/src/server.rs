//! API server implementation.
//!
//! Provides health, ready, and API endpoints for the analysis manager.

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use wesrun_flow::engine::AnalysisEngine;
use wesrun_flow::ingest::{DeadLetterSink, IngestPipe};
use wesrun_flow::orchestrator::AnalysisService;
use wesrun_flow::outbox::EventPublisher;
use wesrun_flow::reconciler::{NoopCompletionHooks, Reconciler};
use wesrun_flow::retry::RetryPolicy;
use wesrun_flow::store::JobStore;

use crate::config::Config;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Launch/abort orchestrator and read façade.
    pub service: Arc<AnalysisService>,
    /// Inbound event pipe.
    pub pipe: Arc<IngestPipe>,
    store: Arc<dyn JobStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("service", &"<AnalysisService>")
            .field("pipe", &"<IngestPipe>")
            .finish()
    }
}

/// The wesrun API server.
pub struct Server {
    config: Config,
    store: Arc<dyn JobStore>,
    engine: Arc<dyn AnalysisEngine>,
    publisher: Arc<dyn EventPublisher>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish()
    }
}

impl Server {
    /// Creates a new server over the given collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn JobStore>,
        engine: Arc<dyn AnalysisEngine>,
        publisher: Arc<dyn EventPublisher>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            publisher,
            dead_letters,
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn build_state(&self) -> Arc<AppState> {
        let retry = RetryPolicy::default();
        let service = Arc::new(
            AnalysisService::new(
                Arc::clone(&self.store),
                Arc::clone(&self.engine),
                Arc::clone(&self.publisher),
                retry,
                self.config.event_source.clone(),
            )
            .with_tag_key(self.config.tag_key.clone()),
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Arc::clone(&self.publisher),
            Arc::new(NoopCompletionHooks),
            RetryPolicy::default(),
            self.config.event_source.clone(),
        ));
        let pipe = Arc::new(
            IngestPipe::new(
                reconciler,
                Arc::clone(&self.dead_letters),
                self.config.ingest_max_attempts,
            )
            .with_tag_key(self.config.tag_key.clone()),
        );
        Arc::new(AppState {
            config: self.config.clone(),
            service,
            pipe,
            store: Arc::clone(&self.store),
        })
    }

    /// Creates the router with all routes and middleware.
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .nest("/api/v1", crate::routes::api_v1_routes())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Returns a router suitable for in-process testing.
    #[must_use]
    pub fn test_router(&self) -> Router {
        Self::create_router(self.build_state())
    }

    /// Serves HTTP until shutdown, sweeping expired terminal records in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve(self) -> anyhow::Result<()> {
        let state = self.build_state();
        let router = Self::create_router(Arc::clone(&state));

        tokio::spawn(sweep_expired(Arc::clone(&state.store)));

        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        tracing::info!(addr = %self.config.listen_addr, "listening");
        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// Periodically removes terminal records past their retention window.
async fn sweep_expired(store: Arc<dyn JobStore>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
    loop {
        interval.tick().await;
        match store.expire(chrono::Utc::now()).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "expired terminal records"),
            Err(err) => tracing::error!(error = %err, "expiry sweep failed"),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn ready() -> impl IntoResponse {
    Json(ReadyResponse { ready: true })
}
