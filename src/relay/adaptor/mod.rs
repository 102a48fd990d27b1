pub mod cohere;
pub mod openai;
pub mod xunfei;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::BalanceStrategy;
use crate::error::GatewayError;
use crate::model::{Channel, ModelCaches, ModelConfig};
use crate::relay::meta::RequestMeta;
use crate::relay::request::RelayRequest;
use crate::relay::transport::{self, UpstreamRequest, UpstreamResponse};
use crate::routing::{LoadBalancer, LoadBalancerState};

/// 统一的用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub cache_creation_tokens: u32,
}

/// 适配器解析后的结果，body 已是统一（OpenAI 兼容）格式
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub content_type: String,
    pub body: Bytes,
    /// 上游未返回用量时为 None，由流水线估算
    pub usage: Option<Usage>,
    /// 生成的文本，用于缺失用量时的估算
    pub completion_text: String,
}

/// 一个上游供应商家族
///
/// 新增供应商只需实现该 trait 并注册到 [`AdaptorRegistry`]，流水线无需改动。
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// 与渠道配置中的 `type` 对应
    fn channel_type(&self) -> &'static str;

    /// 内置模型列表，启动时写入模型配置（不覆盖已有配置）
    fn model_list(&self) -> Vec<ModelConfig>;

    /// 把请求的模型名映射为上游标识；未知名称必须报错
    fn normalize_model(&self, requested: &str) -> Result<String, GatewayError>;

    fn build_upstream_request(
        &self,
        meta: &RequestMeta,
        request: &RelayRequest,
    ) -> Result<UpstreamRequest, GatewayError>;

    async fn do_request(
        &self,
        client: &reqwest::Client,
        meta: &RequestMeta,
        request: UpstreamRequest,
    ) -> Result<UpstreamResponse, GatewayError> {
        transport::send(client, meta.channel.timeout, request).await
    }

    fn parse_upstream_response(
        &self,
        meta: &RequestMeta,
        response: UpstreamResponse,
    ) -> Result<RelayOutcome, GatewayError>;
}

/// 一次选择的结果
#[derive(Clone)]
pub struct Selection {
    pub config: Arc<ModelConfig>,
    pub channel: Arc<Channel>,
    pub adaptor: Arc<dyn Adaptor>,
}

/// channel_type → 适配器
#[derive(Default)]
pub struct AdaptorRegistry {
    adaptors: HashMap<&'static str, Arc<dyn Adaptor>>,
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(openai::OpenAIAdaptor));
        registry.register(Arc::new(xunfei::XunfeiAdaptor));
        registry.register(Arc::new(cohere::CohereAdaptor));
        registry
    }

    pub fn register(&mut self, adaptor: Arc<dyn Adaptor>) {
        self.adaptors.insert(adaptor.channel_type(), adaptor);
    }

    pub fn get(&self, channel_type: &str) -> Option<&Arc<dyn Adaptor>> {
        self.adaptors.get(channel_type)
    }

    /// 渠道实际可服务的模型：显式配置优先，否则取适配器内置列表
    pub fn channel_models(&self, channels: &[Arc<Channel>]) -> Vec<(Arc<Channel>, Vec<String>)> {
        let mut out = Vec::with_capacity(channels.len());
        for channel in channels {
            let models = if !channel.models.is_empty() {
                channel.models.clone()
            } else if let Some(adaptor) = self.get(&channel.channel_type) {
                adaptor.model_list().into_iter().map(|c| c.model).collect()
            } else {
                tracing::warn!(
                    channel = %channel.name,
                    channel_type = %channel.channel_type,
                    "no adaptor registered for channel type"
                );
                Vec::new()
            };
            out.push((channel.clone(), models));
        }
        out
    }

    /// 已配置渠道所用适配器的内置模型配置
    pub fn builtin_model_configs(&self, channels: &[Arc<Channel>]) -> Vec<ModelConfig> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for channel in channels {
            if !seen.insert(channel.channel_type.as_str()) {
                continue;
            }
            if let Some(adaptor) = self.get(&channel.channel_type) {
                out.extend(adaptor.model_list());
            }
        }
        out
    }

    /// 模型名 → (配置, 渠道, 适配器)；查表为 O(1)
    pub fn select(
        &self,
        models: &ModelCaches,
        model: &str,
        strategy: &BalanceStrategy,
        lb_state: &LoadBalancerState,
    ) -> Result<Selection, GatewayError> {
        let config = models
            .get(model)
            .ok_or_else(|| GatewayError::ModelNotFound(model.to_string()))?
            .clone();
        let channel = LoadBalancer::new(models.channels_for(&config.model), strategy, lb_state)
            .select_channel(&config.model)?;
        let adaptor = self.get(&channel.channel_type).cloned().ok_or_else(|| {
            GatewayError::Internal(format!(
                "no adaptor registered for channel type {}",
                channel.channel_type
            ))
        })?;
        Ok(Selection {
            config,
            channel,
            adaptor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mode::RelayMode;
    use std::time::Duration;

    fn channel(id: i64, channel_type: &str, models: &[&str]) -> Arc<Channel> {
        Arc::new(Channel {
            id,
            name: format!("{channel_type}-{id}"),
            channel_type: channel_type.into(),
            base_url: "http://upstream.invalid".into(),
            api_key: "k".into(),
            models: models.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn channel_models_fall_back_to_builtin_list() {
        let registry = AdaptorRegistry::builtin();
        let channels = vec![
            channel(1, "cohere", &[]),
            channel(2, "xunfei", &["spark-lite"]),
            channel(3, "unknown", &[]),
        ];
        let resolved = registry.channel_models(&channels);
        assert!(resolved[0].1.contains(&"command-r".to_string()));
        assert_eq!(resolved[1].1, vec!["spark-lite".to_string()]);
        assert!(resolved[2].1.is_empty());

        let seeds = registry.builtin_model_configs(&channels);
        assert!(seeds.iter().any(|c| c.model == "command-r-plus"));
        assert!(seeds.iter().any(|c| c.model == "spark-max-32k"));
    }

    #[test]
    fn select_resolves_config_channel_and_adaptor() {
        let registry = AdaptorRegistry::builtin();
        let channels = vec![channel(1, "xunfei", &[])];
        let caches = ModelCaches::build(
            vec![ModelConfig::new("spark-max-32k", "xunfei", RelayMode::ChatCompletions)],
            registry.channel_models(&channels),
        );
        let state = LoadBalancerState::new();
        let sel = registry
            .select(&caches, "Spark-Max-32K", &BalanceStrategy::FirstAvailable, &state)
            .unwrap();
        assert_eq!(sel.config.model, "spark-max-32k");
        assert_eq!(sel.channel.id, 1);
        assert_eq!(sel.adaptor.channel_type(), "xunfei");

        let err = registry
            .select(&caches, "gpt-5", &BalanceStrategy::FirstAvailable, &state)
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::ModelNotFound(_)));
    }
}
