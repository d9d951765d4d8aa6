// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Thin axum binding for the proxy core: three routes, no logic.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tracing::info;

use crate::service::{ProxyResponse, ProxyService};
use crate::ProxyError;

const PROXY_KEY_HEADER: &str = "x-proxy-key";

pub fn router(service: Arc<ProxyService>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .with_state(service)
}

/// Serve the proxy until the process exits.
pub async fn serve(service: Arc<ProxyService>, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "proxy listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

fn proxy_key(headers: &HeaderMap) -> Option<&str> {
    headers.get(PROXY_KEY_HEADER).and_then(|v| v.to_str().ok())
}

fn error_response(err: ProxyError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "type": "error",
        "error": { "type": err.code(), "message": err.to_string() },
    });
    (status, axum::Json(body)).into_response()
}

async fn index(State(service): State<Arc<ProxyService>>) -> Response {
    axum::Json(service.index()).into_response()
}

async fn messages(
    State(service): State<Arc<ProxyService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match service.handle_messages(&body, proxy_key(&headers)).await {
        Ok(ProxyResponse::Json(value)) => axum::Json(value).into_response(),
        Ok(ProxyResponse::Sse(stream)) => Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(err) => error_response(err),
    }
}

async fn count_tokens(
    State(service): State<Arc<ProxyService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match service.handle_count_tokens(&body, proxy_key(&headers)).await {
        Ok(value) => axum::Json(value).into_response(),
        Err(err) => error_response(err),
    }
}
