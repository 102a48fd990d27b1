use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::auth::ensure_admin;
use crate::error::{ApiResponse, ErrorKind, GatewayError};
use crate::logging::DashboardQuery;
use crate::model::{DashboardResponse, ModelConfig};
use crate::server::AppState;
use crate::server::dashboard::{dashboard_time, fill_gaps};

#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub model: Option<String>,
    pub token_name: Option<String>,
    pub result_only: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// 与常见布尔字符串写法兼容：1/t/true，大小写不敏感
fn parse_bool(v: Option<&str>) -> bool {
    matches!(
        v.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "t" | "true")
    )
}

async fn load_dashboard(
    app_state: &AppState,
    group: Option<String>,
    params: &DashboardParams,
) -> Result<DashboardResponse, GatewayError> {
    let (start, end, span) = dashboard_time(params.kind.as_deref(), Utc::now().timestamp());
    let query = DashboardQuery {
        group,
        token_name: non_empty(&params.token_name),
        model: non_empty(&params.model),
        start,
        end,
        span,
    };
    let store = &app_state.usage_store;
    let chart = store.chart_data(&query).await?;
    let summary = store.dashboard_summary(&query).await?;
    let models = if parse_bool(params.result_only.as_deref()) {
        None
    } else {
        Some(store.used_models(&query).await?)
    };
    Ok(DashboardResponse {
        chart_data: fill_gaps(chart, start, end, span),
        models,
        total_count: summary.total_count,
        exception_count: summary.exception_count,
        used_amount: summary.used_amount,
        rpm: 0,
    })
}

pub async fn get_dashboard(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DashboardParams>,
) -> Result<Response, GatewayError> {
    ensure_admin(&headers, &app_state)?;
    let mut dashboard = match load_dashboard(&app_state, None, &params).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("failed to load dashboard: {}", e);
            return Ok(
                ApiResponse::failure(ErrorKind::Internal, "failed to get statistics").into_response(),
            );
        }
    };
    let model = non_empty(&params.model).unwrap_or_default();
    dashboard.rpm = app_state.rpm.current_rpm("", &model);
    Ok(ApiResponse::ok(dashboard).into_response())
}

pub async fn get_group_dashboard(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(group): Path<String>,
    Query(params): Query<DashboardParams>,
) -> Result<Response, GatewayError> {
    ensure_admin(&headers, &app_state)?;
    let group = group.trim().to_string();
    if group.is_empty() {
        return Ok(ApiResponse::failure(ErrorKind::BadRequest, "invalid parameter").into_response());
    }
    let mut dashboard = match load_dashboard(&app_state, Some(group.clone()), &params).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(group = %group, "failed to load group dashboard: {}", e);
            return Ok(
                ApiResponse::failure(ErrorKind::Internal, "failed to get statistics").into_response(),
            );
        }
    };
    // 按令牌过滤时 RPM 没有对应维度
    if non_empty(&params.token_name).is_none() {
        let model = non_empty(&params.model).unwrap_or_default();
        dashboard.rpm = app_state.rpm.current_rpm(&group, &model);
    }
    Ok(ApiResponse::ok(dashboard).into_response())
}

pub async fn get_group_dashboard_models(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(group): Path<String>,
) -> Result<Response, GatewayError> {
    ensure_admin(&headers, &app_state)?;
    let snapshot = app_state.identity.snapshot();
    let configs = &snapshot.models.enabled_model_configs;
    let models: Vec<ModelConfig> = match app_state.identity.resolve_group(&snapshot, &group).await {
        Ok(Some(g)) => configs.iter().map(|c| c.adjusted_for_group(&g)).collect(),
        // 未知分组返回未调整的列表
        Ok(None) => configs.iter().map(|c| c.as_ref().clone()).collect(),
        Err(e) => {
            return Ok(ApiResponse::failure(
                ErrorKind::Internal,
                format!("failed to get group: {}", e.user_message()),
            )
            .into_response());
        }
    };
    Ok(ApiResponse::ok(models).into_response())
}
