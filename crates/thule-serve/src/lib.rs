pub mod payload;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::info;

use thule_core::{IngressError, IngressService};

use crate::payload::decode_event;

const SIGNATURE_HEADER: &str = "x-thule-signature";

#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<IngressService>,
    pub secret: Option<Vec<u8>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(ingress: Arc<IngressService>, secret: Option<String>) -> Self {
        Self {
            ingress,
            secret: secret
                .filter(|secret| !secret.is_empty())
                .map(String::into_bytes),
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    code: &'static str,
    message: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> Result<(), std::io::Error> {
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "thule ingress listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.secret {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, provided) {
            return error_response(StatusCode::UNAUTHORIZED, "bad_signature", "invalid signature");
        }
    }

    let event = match decode_event(&body) {
        Ok(event) => event,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_payload", &err.to_string())
        }
    };

    match state
        .ingress
        .handle_merge_request_event(&state.shutdown, &event)
        .await
    {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "queued"})),
        )
            .into_response(),
        Err(err) => {
            let (status, code) = match &err {
                IngressError::InvalidEvent { .. } => (StatusCode::BAD_REQUEST, "invalid_event"),
                IngressError::LockedByOther { .. } => (StatusCode::BAD_REQUEST, "locked_by_other"),
                IngressError::Enqueue(_) => (StatusCode::INTERNAL_SERVER_ERROR, "enqueue_failed"),
            };
            error_response(status, code, &err.to_string())
        }
    }
}

fn error_response(status: StatusCode, code: &'static str, message: &str) -> Response {
    (
        status,
        Json(ErrorEnvelope {
            code,
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Constant-time check of `sha256=<hex>` HMAC signatures.
fn verify_signature(secret: &[u8], body: &[u8], provided: &str) -> bool {
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    if provided.is_empty() {
        return false;
    }
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}
