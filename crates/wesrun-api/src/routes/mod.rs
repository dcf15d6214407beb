//! HTTP route handlers.

pub mod analyses;
pub mod events;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/api/v1` routes.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(analyses::routes())
        .merge(events::routes())
}
