//! Inbound engine-event route.
//!
//! ## Routes
//!
//! - `POST /events` - Deliver a raw engine notification
//!
//! The handler always answers 200 for messages it could take responsibility
//! for: dropped and dead-lettered messages must not be redelivered by the
//! upstream bus.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use wesrun_flow::prelude::{DeliveryOutcome, Outcome};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// How the pipe disposed of a delivered message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    /// Disposition: `applied`, `duplicate`, `anomaly`, `dropped`, or
    /// `deadLettered`.
    pub disposition: &'static str,
}

/// Builds the event routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/events", post(deliver_event))
}

async fn deliver_event(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<Value>,
) -> ApiResult<Json<DeliveryResponse>> {
    let outcome = state
        .pipe
        .deliver(raw)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let disposition = match outcome {
        DeliveryOutcome::Delivered(Outcome::Applied(_)) => "applied",
        DeliveryOutcome::Delivered(Outcome::Duplicate) => "duplicate",
        DeliveryOutcome::Delivered(Outcome::Anomaly { .. }) => "anomaly",
        DeliveryOutcome::Dropped => "dropped",
        DeliveryOutcome::DeadLettered => "deadLettered",
    };
    Ok(Json(DeliveryResponse { disposition }))
}
