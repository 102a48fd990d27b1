use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::GatewayError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
    #[serde(default)]
    pub load_balancing: LoadBalancing,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// 一个上游渠道（具体的供应商账号/连接）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub name: String,
    pub id: i64,
    /// 适配器标识，如 "openai" / "cohere" / "xunfei"
    #[serde(rename = "type")]
    pub channel_type: String,
    pub base_url: String,
    pub api_key: String,
    /// 为空表示使用适配器内置的模型列表
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_channel_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancing {
    #[serde(default)]
    pub strategy: BalanceStrategy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    #[default]
    FirstAvailable,
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub database_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            database_path: "data/gateway.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// 管理员密钥：既可访问 /api/dashboard，也可作为内部凭证调用中继
    #[serde(default)]
    pub admin_key: Option<String>,
    #[serde(default)]
    pub internal_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub enabled: bool,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub refresh_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// false 时 RPM 仅做统计（advisory）
    #[serde(default)]
    pub enforce: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub no_proxy: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            no_proxy: false,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, GatewayError> {
        let config_path = Self::find_config_file()?;
        let config_content = std::fs::read_to_string(&config_path)?;
        let mut settings = Self::from_toml_str(&config_content)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, GatewayError> {
        let mut settings: Settings =
            toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))?;

        for (name, channel) in &mut settings.channels {
            channel.name = name.clone();
        }

        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_non_empty("GATEWAY_ADMIN_KEY") {
            self.auth.admin_key = Some(v);
        }
        if let Some(v) = env_non_empty("GATEWAY_INTERNAL_TOKEN") {
            self.auth.internal_token = Some(v);
        }
        if let Some(v) = env_non_empty("GATEWAY_BILLING_ENABLED") {
            self.billing.enabled = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES");
        }
        if let Some(v) = env_non_empty("GATEWAY_DATABASE_PATH") {
            self.logging.database_path = v;
        }
    }

    fn find_config_file() -> Result<String, GatewayError> {
        let possible_names = ["custom-config.toml", "config.toml"];

        for name in &possible_names {
            if Path::new(name).exists() {
                return Ok(name.to_string());
            }
        }

        Err(GatewayError::Config(
            "Configuration file not found. Please create custom-config.toml or config.toml".into(),
        ))
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
