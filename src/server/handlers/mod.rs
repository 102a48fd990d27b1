use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::server::AppState;

mod auth;
mod dashboard;
mod models;
mod relay;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        // OpenAI 兼容中继
        .route("/v1/chat/completions", post(relay::chat_completions))
        .route("/v1/embeddings", post(relay::embeddings))
        .route("/v1/audio/speech", post(relay::audio_speech))
        .route("/v1/models", get(models::list_models))
        // 看板
        .route("/api/dashboard", get(dashboard::get_dashboard))
        .route("/api/dashboard/{group}", get(dashboard::get_group_dashboard))
        .route(
            "/api/dashboard/{group}/models",
            get(dashboard::get_group_dashboard_models),
        )
}
