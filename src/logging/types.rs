use chrono::{DateTime, Utc};

use crate::model::TimeSpanType;
use crate::relay::mode::RelayMode;

/// 一次中继的用量记录；按 request_id 去重
#[derive(Debug, Clone)]
pub struct UsageLog {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub group_id: String,
    pub token_id: i64,
    pub token_name: String,
    pub origin_model: String,
    pub actual_model: String,
    pub channel_id: Option<i64>,
    pub mode: RelayMode,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub cache_creation_tokens: u32,
    // 实际结算金额；失败请求为 0
    pub amount: f64,
    pub status_code: u16,
    pub error_message: Option<String>,
}

impl UsageLog {
    pub fn is_exception(&self) -> bool {
        self.status_code != 200
    }
}

#[derive(Debug, Clone)]
pub struct DashboardQuery {
    pub group: Option<String>,
    pub token_name: Option<String>,
    pub model: Option<String>,
    pub start: i64,
    pub end: i64,
    pub span: TimeSpanType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    pub total_count: i64,
    pub exception_count: i64,
    pub used_amount: f64,
}
