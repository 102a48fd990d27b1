use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::header,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::relay::mode::RelayMode;
use crate::relay::pipeline::{self, InboundRelay};
use crate::server::AppState;
use crate::server::util::authorization;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub async fn chat_completions(
    State(app_state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, GatewayError> {
    relay_request(RelayMode::ChatCompletions, app_state, request).await
}

pub async fn embeddings(
    State(app_state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, GatewayError> {
    relay_request(RelayMode::Embeddings, app_state, request).await
}

pub async fn audio_speech(
    State(app_state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, GatewayError> {
    relay_request(RelayMode::AudioSpeech, app_state, request).await
}

// 流水线在独立任务中运行：客户端断开时本 future 被丢弃，drop guard 触发取消，
// 任务仍会完成退款和记账
async fn relay_request(
    mode: RelayMode,
    app_state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let credential = authorization(&parts.headers);
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("failed to read request body: {}", e)))?;

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let inbound = InboundRelay {
        mode,
        credential,
        client_ip,
        body,
    };
    let task = tokio::spawn(pipeline::relay(app_state, inbound, cancel));
    let joined = task.await;
    guard.disarm();

    let outcome = joined
        .map_err(|e| GatewayError::Internal(format!("relay task failed: {}", e)))??;
    Ok(([(header::CONTENT_TYPE, outcome.content_type)], outcome.body).into_response())
}
