use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// 稳定的机器可读错误类别，随 `{success:false}` 响应一起返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    ModelNotFound,
    InvalidModelName,
    PriceNotFound,
    InsufficientBalance,
    RateLimited,
    BadRequest,
    UpstreamProtocolError,
    UpstreamTimeout,
    UpstreamError,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::InvalidModelName => "invalid_model_name",
            ErrorKind::PriceNotFound => "price_not_found",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::UpstreamProtocolError => "upstream_protocol_error",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid model name: {0}")]
    InvalidModelName(String),

    #[error("model price not found: {0}")]
    PriceNotFound(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("upstream request failed: {0}")]
    UpstreamConnect(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::UpstreamTimeout(e.to_string())
        } else if e.is_decode() || e.is_body() {
            GatewayError::UpstreamProtocol(e.to_string())
        } else {
            GatewayError::UpstreamConnect(e.to_string())
        }
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthorized(_) => ErrorKind::Unauthorized,
            GatewayError::Forbidden(_) => ErrorKind::Forbidden,
            GatewayError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            GatewayError::InvalidModelName(_) => ErrorKind::InvalidModelName,
            GatewayError::PriceNotFound(_) => ErrorKind::PriceNotFound,
            GatewayError::InsufficientBalance(_) => ErrorKind::InsufficientBalance,
            GatewayError::RateLimited(_) => ErrorKind::RateLimited,
            GatewayError::BadRequest(_) => ErrorKind::BadRequest,
            GatewayError::UpstreamProtocol(_) => ErrorKind::UpstreamProtocolError,
            GatewayError::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            GatewayError::UpstreamStatus { .. } | GatewayError::UpstreamConnect(_) => {
                ErrorKind::UpstreamError
            }
            GatewayError::Cancelled => ErrorKind::Cancelled,
            GatewayError::Db(_)
            | GatewayError::Io(_)
            | GatewayError::Config(_)
            | GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden | ErrorKind::InsufficientBalance => StatusCode::FORBIDDEN,
            ErrorKind::ModelNotFound | ErrorKind::InvalidModelName | ErrorKind::BadRequest => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamProtocolError | ErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            // 客户端已断开，状态码不会被读取
            ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::PriceNotFound | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回给调用方的文本；内部错误不暴露存储细节
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Db(_) | GatewayError::Io(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// 统一响应包：`{success, data?, message?, kind?}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            kind: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            kind: Some(kind),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self.kind() {
            ErrorKind::Internal => tracing::error!("internal error: {}", self),
            ErrorKind::UpstreamProtocolError
            | ErrorKind::UpstreamTimeout
            | ErrorKind::UpstreamError => tracing::warn!("upstream failure: {}", self),
            ErrorKind::Unauthorized | ErrorKind::Forbidden => {
                tracing::info!("authorization failure: {}", self)
            }
            _ => tracing::debug!("request rejected: {}", self),
        }

        let status = self.status_code();
        let body = ApiResponse::failure(self.kind(), self.user_message());
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
