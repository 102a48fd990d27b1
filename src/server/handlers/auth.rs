use axum::http::HeaderMap;

use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::util::{authorization, normalize_key};

// 看板接口的管理员校验；未配置 admin_key 时不做限制
pub fn ensure_admin(headers: &HeaderMap, app_state: &AppState) -> Result<(), GatewayError> {
    let Some(admin_key) = app_state
        .config
        .auth
        .admin_key
        .as_deref()
        .filter(|k| !k.is_empty())
    else {
        return Ok(());
    };
    let provided = authorization(headers).unwrap_or_default();
    if normalize_key(&provided) == normalize_key(admin_key) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized("admin key required".into()))
    }
}
