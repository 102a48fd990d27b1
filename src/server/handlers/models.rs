use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::request::Parts,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::relay::pipeline::authenticate;
use crate::server::AppState;
use crate::server::util::authorization;

#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<Model>,
}

// 当前令牌可用的模型（已按启用模型收窄）
pub async fn list_models(
    State(app_state): State<Arc<AppState>>,
    parts: Parts,
) -> Result<Json<ModelListResponse>, GatewayError> {
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let snapshot = app_state.identity.snapshot();
    let credential = authorization(&parts.headers);
    let mut caller = authenticate(&app_state, &snapshot, credential.as_deref(), client_ip).await?;
    caller.token.narrow_models(&snapshot.models);

    let data = caller
        .token
        .models
        .iter()
        .filter_map(|name| snapshot.models.get(name))
        .map(|config| Model {
            id: config.model.clone(),
            object: "model".to_string(),
            created: 0,
            owned_by: config.owner.clone(),
        })
        .collect();
    Ok(Json(ModelListResponse {
        object: "list".to_string(),
        data,
    }))
}
