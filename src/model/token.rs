use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::GatewayError;
use crate::model::group::INTERNAL_GROUP_ID;
use crate::model::model_config::ModelCaches;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Enabled,
    Disabled,
}

impl TokenStatus {
    pub fn from_db_value(v: i64) -> Self {
        if v == 1 {
            TokenStatus::Enabled
        } else {
            TokenStatus::Disabled
        }
    }

    pub fn as_db_value(self) -> i64 {
        match self {
            TokenStatus::Enabled => 1,
            TokenStatus::Disabled => 2,
        }
    }
}

/// 缓存中的令牌。`models` 为空表示允许全部已启用模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCache {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub key: String,
    pub group: String,
    pub status: TokenStatus,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub subnets: Vec<IpNet>,
    #[serde(default)]
    pub expired_at: Option<i64>,
}

impl TokenCache {
    /// 管理员/内部凭证对应的伪令牌
    pub fn internal() -> Self {
        Self {
            id: 0,
            name: "internal".to_string(),
            key: String::new(),
            group: INTERNAL_GROUP_ID.to_string(),
            status: TokenStatus::Enabled,
            models: Vec::new(),
            subnets: Vec::new(),
            expired_at: None,
        }
    }

    pub fn ensure_usable(&self, now_secs: i64) -> Result<(), GatewayError> {
        if self.status != TokenStatus::Enabled {
            return Err(GatewayError::Unauthorized("token is disabled".into()));
        }
        if let Some(exp) = self.expired_at
            && exp > 0
            && exp <= now_secs
        {
            return Err(GatewayError::Unauthorized("token has expired".into()));
        }
        Ok(())
    }

    /// 收窄到当前启用模型；只作用于本请求持有的副本
    pub fn narrow_models(&mut self, caches: &ModelCaches) {
        if self.models.is_empty() {
            self.models = caches.enabled_models.clone();
            return;
        }
        let mut narrowed = Vec::with_capacity(self.models.len());
        for m in &self.models {
            if caches.contains(m) && !narrowed.contains(m) {
                narrowed.push(m.clone());
            }
        }
        self.models = narrowed;
    }

    pub fn allows_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// 未配置网段时不限制来源
    pub fn allows_ip(&self, ip: Option<IpAddr>) -> bool {
        if self.subnets.is_empty() {
            return true;
        }
        match ip {
            Some(ip) => self.subnets.iter().any(|net| net.contains(&ip)),
            None => false,
        }
    }
}

/// 解析逗号分隔的网段列表；单个 IP 视为 /32 或 /128
pub fn parse_subnets(raw: &str) -> Result<Vec<IpNet>, GatewayError> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let net = match part.parse::<IpNet>() {
            Ok(net) => net,
            Err(_) => {
                let ip: IpAddr = part
                    .parse()
                    .map_err(|_| GatewayError::Config(format!("invalid subnet: {part}")))?;
                let prefix = if ip.is_ipv4() { 32 } else { 128 };
                IpNet::new(ip, prefix)
                    .map_err(|_| GatewayError::Config(format!("invalid subnet: {part}")))?
            }
        };
        out.push(net);
    }
    Ok(out)
}
