//! API integration tests.
//!
//! Tests the complete request flow: HTTP -> routes -> orchestration -> store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use wesrun_api::config::{Config, Posture};
use wesrun_api::server::Server;
use wesrun_flow::engine::memory::InMemoryEngine;
use wesrun_flow::ingest::{InMemoryDeadLetters, ANALYSIS_STATE_CHANGE_CODE};
use wesrun_flow::outbox::InMemoryBus;
use wesrun_flow::store::memory::InMemoryJobStore;

fn test_config() -> Config {
    Config {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        posture: Posture::Dev,
        engine_url: None,
        engine_token: None,
        event_source: "orcabus.wesrun".to_string(),
        tag_key: "wesrun-id".to_string(),
        terminal_ttl: Duration::hours(720),
        ingest_max_attempts: 2,
    }
}

fn test_router() -> axum::Router {
    test_router_with_engine(Arc::new(InMemoryEngine::accepting("ext-1")))
}

fn test_router_with_engine(engine: Arc<InMemoryEngine>) -> axum::Router {
    Server::new(
        test_config(),
        Arc::new(InMemoryJobStore::new()),
        engine,
        Arc::new(InMemoryBus::new()),
        Arc::new(InMemoryDeadLetters::new()),
    )
    .test_router()
}

fn launch_body(name: &str) -> Value {
    json!({
        "name": name,
        "payloadRef": {
            "uri": "s3://bucket/params.json",
            "outputUri": "icav2://project/out/",
            "logsUri": "s3://bucket/logs/"
        }
    })
}

fn state_change_event(job_id: &str, status: &str) -> Value {
    json!({
        "ica-event": {
            "eventCode": ANALYSIS_STATE_CHANGE_CODE,
            "payload": {
                "id": "ext-1",
                "status": status,
                "tags": { "technicalTags": [format!("wesrun-id={job_id}")] }
            }
        }
    })
}

mod helpers {
    use super::*;
    use serde::de::DeserializeOwned;

    fn make_request(
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Result<Request<Body>> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");

        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).context("serialize request body")?),
            None => Body::empty(),
        };

        builder.body(body).context("build request")
    }

    async fn send_json<T: DeserializeOwned>(
        router: axum::Router,
        request: Request<Body>,
    ) -> Result<(StatusCode, T)> {
        let response = router.oneshot(request).await.map_err(|err| -> anyhow::Error { match err {} })?;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .context("read response body")?;
        let json = serde_json::from_slice(&body).with_context(|| {
            format!(
                "parse JSON response (status={status}): {}",
                String::from_utf8_lossy(&body)
            )
        })?;
        Ok((status, json))
    }

    pub async fn get_json<T: DeserializeOwned>(
        router: axum::Router,
        uri: &str,
    ) -> Result<(StatusCode, T)> {
        send_json(router, make_request(Method::GET, uri, None)?).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        router: axum::Router,
        uri: &str,
        body: Value,
    ) -> Result<(StatusCode, T)> {
        send_json(router, make_request(Method::POST, uri, Some(body))?).await
    }

    pub async fn delete_json<T: DeserializeOwned>(
        router: axum::Router,
        uri: &str,
    ) -> Result<(StatusCode, T)> {
        send_json(router, make_request(Method::DELETE, uri, None)?).await
    }
}

#[tokio::test]
async fn health_and_ready_respond() -> Result<()> {
    let router = test_router();

    let (status, body): (_, Value) = helpers::get_json(router.clone(), "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body): (_, Value) = helpers::get_json(router, "/ready").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    Ok(())
}

#[tokio::test]
async fn launch_creates_pending_analysis() -> Result<()> {
    let router = test_router();

    let (status, body): (_, Value) =
        helpers::post_json(router.clone(), "/api/v1/analyses", launch_body("wgs-1")).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["name"], "wgs-1");
    assert!(body["id"].as_str().is_some());

    let id = body["id"].as_str().context("id")?;
    let (status, fetched): (_, Value) =
        helpers::get_json(router, &format!("/api/v1/analyses/{id}")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], body["id"]);
    Ok(())
}

#[tokio::test]
async fn duplicate_name_returns_conflict() -> Result<()> {
    let router = test_router();

    let (status, _): (_, Value) =
        helpers::post_json(router.clone(), "/api/v1/analyses", launch_body("wgs-1")).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body): (_, Value) =
        helpers::post_json(router, "/api/v1/analyses", launch_body("wgs-1")).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn invalid_payload_uri_returns_bad_request() -> Result<()> {
    let router = test_router();

    let mut body = launch_body("wgs-1");
    body["payloadRef"]["uri"] = json!("file:///tmp/params.json");
    let (status, body): (_, Value) =
        helpers::post_json(router, "/api/v1/analyses", body).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn rejected_launch_returns_bad_gateway() -> Result<()> {
    let router = test_router_with_engine(Arc::new(InMemoryEngine::rejecting("no capacity")));

    let (status, body): (_, Value) =
        helpers::post_json(router, "/api/v1/analyses", launch_body("wgs-1")).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "ENGINE_ERROR");
    Ok(())
}

#[tokio::test]
async fn event_delivery_drives_lifecycle() -> Result<()> {
    let router = test_router();

    let (_, created): (_, Value) =
        helpers::post_json(router.clone(), "/api/v1/analyses", launch_body("wgs-1")).await?;
    let id = created["id"].as_str().context("id")?.to_string();

    let (status, body): (_, Value) = helpers::post_json(
        router.clone(),
        "/api/v1/events",
        state_change_event(&id, "INPROGRESS"),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "applied");

    let (_, fetched): (_, Value) =
        helpers::get_json(router.clone(), &format!("/api/v1/analyses/{id}")).await?;
    assert_eq!(fetched["status"], "RUNNING");
    assert_eq!(fetched["externalAnalysisId"], "ext-1");

    let (_, body): (_, Value) = helpers::post_json(
        router.clone(),
        "/api/v1/events",
        state_change_event(&id, "SUCCEEDED"),
    )
    .await?;
    assert_eq!(body["disposition"], "applied");

    // Redelivery of the terminal event is acknowledged as a duplicate.
    let (_, body): (_, Value) = helpers::post_json(
        router.clone(),
        "/api/v1/events",
        state_change_event(&id, "SUCCEEDED"),
    )
    .await?;
    assert_eq!(body["disposition"], "duplicate");

    let (_, fetched): (_, Value) =
        helpers::get_json(router, &format!("/api/v1/analyses/{id}")).await?;
    assert_eq!(fetched["status"], "SUCCEEDED");
    Ok(())
}

#[tokio::test]
async fn unowned_event_is_dropped() -> Result<()> {
    let router = test_router();

    let event = json!({
        "ica-event": {
            "eventCode": ANALYSIS_STATE_CHANGE_CODE,
            "payload": {
                "id": "ext-9",
                "status": "SUCCEEDED",
                "tags": { "technicalTags": ["portal-run=abc"] }
            }
        }
    });
    let (status, body): (_, Value) =
        helpers::post_json(router, "/api/v1/events", event).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disposition"], "dropped");
    Ok(())
}

#[tokio::test]
async fn abort_transitions_and_second_abort_conflicts() -> Result<()> {
    let router = test_router();

    let (_, created): (_, Value) =
        helpers::post_json(router.clone(), "/api/v1/analyses", launch_body("wgs-1")).await?;
    let id = created["id"].as_str().context("id")?.to_string();

    let (status, body): (_, Value) =
        helpers::delete_json(router.clone(), &format!("/api/v1/analyses/{id}")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ABORTED");

    let (status, body): (_, Value) =
        helpers::delete_json(router, &format!("/api/v1/analyses/{id}")).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn get_unknown_analysis_returns_not_found() -> Result<()> {
    let router = test_router();

    let ghost = wesrun_core::AnalysisId::generate();
    let (status, body): (_, Value) =
        helpers::get_json(router.clone(), &format!("/api/v1/analyses/{ghost}")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body): (_, Value) =
        helpers::get_json(router, "/api/v1/analyses/not-an-id").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn list_supports_filters() -> Result<()> {
    let router = test_router();

    let (_, first): (_, Value) =
        helpers::post_json(router.clone(), "/api/v1/analyses", launch_body("wgs-1")).await?;
    let (_, _second): (_, Value) =
        helpers::post_json(router.clone(), "/api/v1/analyses", launch_body("wgs-2")).await?;
    let id = first["id"].as_str().context("id")?.to_string();
    let (_, _): (_, Value) =
        helpers::delete_json(router.clone(), &format!("/api/v1/analyses/{id}")).await?;

    let (_, body): (_, Value) = helpers::get_json(router.clone(), "/api/v1/analyses").await?;
    assert_eq!(body["analyses"].as_array().context("analyses")?.len(), 2);

    let (_, body): (_, Value) =
        helpers::get_json(router.clone(), "/api/v1/analyses?status=PENDING").await?;
    assert_eq!(body["analyses"].as_array().context("analyses")?.len(), 1);
    assert_eq!(body["analyses"][0]["name"], "wgs-2");

    let (_, body): (_, Value) =
        helpers::get_json(router.clone(), "/api/v1/analyses?name=wgs-1").await?;
    assert_eq!(body["analyses"][0]["status"], "ABORTED");

    let (status, _): (_, Value) =
        helpers::get_json(router, "/api/v1/analyses?status=BOGUS").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
