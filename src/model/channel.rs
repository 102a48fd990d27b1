use std::time::Duration;

use crate::config::ChannelConfig;

/// 上游渠道的运行期视图；每次请求由注册表选出一个
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub channel_type: String,
    pub base_url: String,
    pub api_key: String,
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl Channel {
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl From<&ChannelConfig> for Channel {
    fn from(c: &ChannelConfig) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            channel_type: c.channel_type.clone(),
            base_url: c.base_url.clone(),
            api_key: c.api_key.clone(),
            models: c.models.clone(),
            timeout: Duration::from_secs(c.timeout_secs),
        }
    }
}
