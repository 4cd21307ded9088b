use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::routing::post;
use axum::{
    Router,
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use channel::{Action, ChannelError, Context};
use platform::ConfigStore;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use worker::{FetchOutcome, FetchRequest, ResponseEnvelope};

use crate::state::GatewayState;

/// Page-side trigger for a config reload, answered once the worker replies.
pub const RELOAD_CONFIG_PATH: &str = "/_sw/reload-config";

pub fn app_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(RELOAD_CONFIG_PATH, post(reload_config))
        .fallback(handle_request)
        .with_state(state)
}

async fn handle_request(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let url = request_url(state.scheme(), &request);
    tracing::debug!("[http] request {} {}", request.method(), url);

    let fetch = FetchRequest {
        url,
        method: request.method().as_str().to_string(),
        headers: forwarded_headers(request.headers()),
    };

    let worker = match state.worker().await {
        Ok(worker) => worker,
        Err(err) => {
            tracing::error!("[http] worker unavailable: {}", err);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("worker unavailable: {}", err));
        }
    };

    match worker.handle_fetch(&fetch).await {
        FetchOutcome::Respond(envelope) => envelope_response(envelope),
        FetchOutcome::Passthrough => passthrough(&state, request).await,
    }
}

async fn reload_config(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    if !body.is_empty() {
        let config = match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(config) => config,
            Err(err) => {
                return text_response(StatusCode::BAD_REQUEST, format!("invalid config: {}", err));
            }
        };
        if let Err(err) = state.host().browser_config().write(config) {
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("config write failed: {}", err));
        }
    }

    // Make sure a live worker is listening before asking it.
    if let Err(err) = state.worker().await {
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("worker unavailable: {}", err));
    }

    let window = state.bus().channel(Context::Window).with_timeout(state.channel_timeout());
    match window
        .message_and_wait_for_response(Context::Sw, Action::ReloadConfig, None)
        .await
    {
        Ok(reply) if reply.action == Action::ReloadConfigSuccess => {
            text_response(StatusCode::OK, "config reloaded".to_string())
        }
        Ok(reply) => {
            let reason = reply
                .payload
                .as_ref()
                .and_then(|payload| payload.as_str())
                .unwrap_or("unknown error")
                .to_string();
            text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("config reload failed: {}", reason))
        }
        Err(err @ ChannelError::NoResponse { .. }) => {
            text_response(StatusCode::GATEWAY_TIMEOUT, err.to_string())
        }
        Err(err) => text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn passthrough(state: &GatewayState, request: Request) -> Response {
    let Some(dir) = state.static_dir() else {
        return text_response(StatusCode::NOT_FOUND, "not found".to_string());
    };
    match ServeDir::new(dir).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(err) => match err {},
    }
}

/// Headers with a textual value; opaque byte values are dropped.
fn forwarded_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut forwarded = Vec::with_capacity(headers.len());
    for (key, value) in headers.iter() {
        match value.to_str() {
            Ok(value) => forwarded.push((key.as_str().to_string(), value.to_string())),
            Err(_) => tracing::debug!("[http] dropping non-text header {}", key),
        }
    }
    forwarded
}

/// Absolute URL as the page saw it. Browsers never send the fragment.
fn request_url(scheme: &str, request: &Request) -> String {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|authority| authority.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    let path = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    format!("{}://{}{}", scheme, host, path)
}

fn envelope_response(envelope: ResponseEnvelope) -> Response {
    let status = StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, value) in &envelope.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(envelope.body))
        .unwrap_or_else(|err| {
            text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("invalid response: {}", err))
        })
}

fn text_response(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, "text/plain")], body).into_response()
}
