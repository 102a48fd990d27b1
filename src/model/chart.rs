use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSpanType {
    Hour,
    Day,
}

impl TimeSpanType {
    pub fn seconds(self) -> i64 {
        match self {
            TimeSpanType::Hour => 3600,
            TimeSpanType::Day => 86_400,
        }
    }
}

/// 一个时间桶的聚合数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub timestamp: i64,
    pub request_count: i64,
    pub used_amount: f64,
    pub exception_count: i64,
}

impl ChartData {
    pub fn zero(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.request_count == 0 && self.exception_count == 0 && self.used_amount == 0.0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardResponse {
    pub chart_data: Vec<ChartData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    pub total_count: i64,
    pub exception_count: i64,
    pub used_amount: f64,
    pub rpm: u64,
}
