use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::model::{Channel, GroupCache, ModelConfig, TokenCache};
use crate::relay::mode::RelayMode;

/// 单个请求的上下文，由流水线独占，请求结束即丢弃
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    pub mode: RelayMode,
    /// 客户端请求的模型名
    pub origin_model: String,
    /// 适配器归一化后发往上游的模型名
    pub actual_model: String,
    pub token: TokenCache,
    pub group: GroupCache,
    pub channel: Arc<Channel>,
    pub model_config: Arc<ModelConfig>,
    pub is_internal: bool,
    /// 客户端是否要求流式输出
    pub stream: bool,
    pub input_tokens: u32,
    pub started_at: DateTime<Utc>,
}
