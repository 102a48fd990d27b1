use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::channel::Channel;
use crate::model::group::GroupCache;
use crate::relay::mode::RelayMode;

/// 价格以每 1000 单位（token 或字符）计
pub const PRICE_UNIT: f64 = 1000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_price: f64,
    pub output_price: f64,
    #[serde(default)]
    pub cached_price: f64,
    #[serde(default)]
    pub cache_creation_price: f64,
}

impl ModelPrice {
    /// 缓存价为 0 时按输入价计
    pub fn effective_cached_price(&self) -> f64 {
        if self.cached_price > 0.0 {
            self.cached_price
        } else {
            self.input_price
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub owner: String,
    pub mode: RelayMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<ModelPrice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u64>,
    pub enabled: bool,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, owner: impl Into<String>, mode: RelayMode) -> Self {
        Self {
            model: model.into(),
            owner: owner.into(),
            mode,
            price: None,
            rpm: None,
            enabled: true,
        }
    }

    pub fn with_price(mut self, input_price: f64, output_price: f64) -> Self {
        self.price = Some(ModelPrice {
            input_price,
            output_price,
            ..Default::default()
        });
        self
    }

    pub fn with_rpm(mut self, rpm: u64) -> Self {
        self.rpm = Some(rpm);
        self
    }

    /// 按分组倍率缩放后的 RPM 上限
    pub fn rpm_ceiling_for(&self, group: &GroupCache) -> Option<u64> {
        let rpm = self.rpm?;
        if rpm == 0 {
            return None;
        }
        let ratio = if group.rpm_ratio > 0.0 { group.rpm_ratio } else { 1.0 };
        Some(((rpm as f64) * ratio).round().max(1.0) as u64)
    }

    pub fn adjusted_for_group(&self, group: &GroupCache) -> ModelConfig {
        let mut out = self.clone();
        out.rpm = self.rpm_ceiling_for(group).or(self.rpm);
        out
    }
}

/// 一次刷新生成的只读模型快照
#[derive(Debug, Default)]
pub struct ModelCaches {
    pub enabled_model_configs: Vec<Arc<ModelConfig>>,
    pub enabled_models: Vec<String>,
    pub enabled_models_map: HashMap<String, Arc<ModelConfig>>,
    lowercase_index: HashMap<String, String>,
    model_channels: HashMap<String, Vec<Arc<Channel>>>,
}

impl ModelCaches {
    /// `channels` 中每项为渠道及其实际可服务的模型列表
    pub fn build(configs: Vec<ModelConfig>, channels: Vec<(Arc<Channel>, Vec<String>)>) -> Self {
        let mut caches = ModelCaches::default();

        for config in configs.into_iter().filter(|c| c.enabled) {
            if caches.enabled_models_map.contains_key(&config.model) {
                tracing::warn!(model = %config.model, "duplicate enabled model config ignored");
                continue;
            }
            let config = Arc::new(config);
            caches
                .lowercase_index
                .entry(config.model.to_lowercase())
                .or_insert_with(|| config.model.clone());
            caches.enabled_models.push(config.model.clone());
            caches
                .enabled_models_map
                .insert(config.model.clone(), config.clone());
            caches.enabled_model_configs.push(config);
        }

        for (channel, models) in channels {
            for model in models {
                if !caches.enabled_models_map.contains_key(&model) {
                    continue;
                }
                let entry = caches.model_channels.entry(model).or_default();
                if !entry.iter().any(|c| c.id == channel.id) {
                    entry.push(channel.clone());
                }
            }
        }

        caches
    }

    /// 精确匹配优先，其次大小写不敏感
    pub fn get(&self, name: &str) -> Option<&Arc<ModelConfig>> {
        if let Some(c) = self.enabled_models_map.get(name) {
            return Some(c);
        }
        let canonical = self.lowercase_index.get(&name.to_lowercase())?;
        self.enabled_models_map.get(canonical)
    }

    pub fn channels_for(&self, model: &str) -> &[Arc<Channel>] {
        self.model_channels
            .get(model)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, model: &str) -> bool {
        self.enabled_models_map.contains_key(model)
    }
}
