//! Route registration and request handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::debug;

use hashgate_client::HashClient;
use hashgate_common::HashgateError;

/// Builds the gateway router.
pub fn router(client: HashClient) -> Router {
    Router::new()
        .route("/hash", post(handle_hash))
        .route("/compare", post(handle_compare))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(client)
}

#[derive(Debug, Default, Deserialize)]
struct HashBody {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompareBody {
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    hash: Option<String>,
}

async fn handle_hash(
    State(client): State<HashClient>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: HashBody = match parse_body(&headers, &body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    match client.hash(body.password.as_deref().unwrap_or_default()).await {
        Ok(digest) => (StatusCode::OK, digest).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_compare(
    State(client): State<HashClient>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: CompareBody = match parse_body(&headers, &body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    let outcome = client
        .compare(
            body.password.as_deref().unwrap_or_default(),
            body.hash.as_deref().unwrap_or_default(),
        )
        .await;
    match outcome {
        Ok(matched) => (StatusCode::OK, matched.to_string()).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "OK" }))
}

/// Parses a JSON or form-urlencoded body depending on the content type.
/// An empty body deserializes to the default (all fields absent), which the
/// client rejects as a validation error downstream.
fn parse_body<T: DeserializeOwned + Default>(
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<T, Response> {
    if body.is_empty() {
        return Ok(T::default());
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let parsed = if content_type.starts_with("application/json") {
        serde_json::from_slice(body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_bytes(body).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| (StatusCode::BAD_REQUEST, format!("Error: {}", e)).into_response())
}

/// Status translation kept from the legacy front end: every client failure
/// is reported as 404 with an `Error:` prefix.
fn error_response(err: HashgateError) -> Response {
    debug!(%err, "request failed");
    (StatusCode::NOT_FOUND, format!("Error: {}", err)).into_response()
}
