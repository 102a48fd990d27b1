use std::future::Future;
use std::pin::Pin;

use crate::error::GatewayError;
use crate::logging::DatabaseLogger;
use crate::logging::types::{DashboardQuery, UsageLog, UsageSummary};
use crate::model::{ChartData, GroupCache, ModelConfig, TokenCache};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// 身份与模型配置来源（缓存刷新时整体读取，未命中时单条回源）
pub trait IdentityStore: Send + Sync {
    fn load_tokens<'a>(&'a self) -> BoxFuture<'a, Result<Vec<TokenCache>, GatewayError>>;
    fn load_groups<'a>(&'a self) -> BoxFuture<'a, Result<Vec<GroupCache>, GatewayError>>;
    fn load_model_configs<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ModelConfig>, GatewayError>>;
    fn load_token<'a>(&'a self, key: &'a str)
    -> BoxFuture<'a, Result<Option<TokenCache>, GatewayError>>;
    fn load_group<'a>(&'a self, id: &'a str)
    -> BoxFuture<'a, Result<Option<GroupCache>, GatewayError>>;
    /// 只插入不存在的模型，已有配置保持不变；返回新增条数
    fn seed_model_configs<'a>(
        &'a self,
        configs: &'a [ModelConfig],
    ) -> BoxFuture<'a, Result<usize, GatewayError>>;
}

// 用量日志与看板查询
pub trait UsageLogStore: Send + Sync {
    /// 返回 false 表示该 request_id 已记录过
    fn record_usage<'a>(&'a self, log: UsageLog) -> BoxFuture<'a, Result<bool, GatewayError>>;
    fn chart_data<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<Vec<ChartData>, GatewayError>>;
    fn dashboard_summary<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<UsageSummary, GatewayError>>;
    fn used_models<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<Vec<String>, GatewayError>>;
}

impl IdentityStore for DatabaseLogger {
    fn load_tokens<'a>(&'a self) -> BoxFuture<'a, Result<Vec<TokenCache>, GatewayError>> {
        Box::pin(async move { self.load_tokens().await })
    }

    fn load_groups<'a>(&'a self) -> BoxFuture<'a, Result<Vec<GroupCache>, GatewayError>> {
        Box::pin(async move { self.load_groups().await })
    }

    fn load_model_configs<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ModelConfig>, GatewayError>> {
        Box::pin(async move { self.load_model_configs().await })
    }

    fn load_token<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<TokenCache>, GatewayError>> {
        Box::pin(async move { self.load_token(key).await })
    }

    fn load_group<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<GroupCache>, GatewayError>> {
        Box::pin(async move { self.load_group(id).await })
    }

    fn seed_model_configs<'a>(
        &'a self,
        configs: &'a [ModelConfig],
    ) -> BoxFuture<'a, Result<usize, GatewayError>> {
        Box::pin(async move { self.seed_model_configs(configs).await })
    }
}

impl UsageLogStore for DatabaseLogger {
    fn record_usage<'a>(&'a self, log: UsageLog) -> BoxFuture<'a, Result<bool, GatewayError>> {
        Box::pin(async move { self.record_usage(log).await })
    }

    fn chart_data<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<Vec<ChartData>, GatewayError>> {
        Box::pin(async move { self.chart_data(query).await })
    }

    fn dashboard_summary<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<UsageSummary, GatewayError>> {
        Box::pin(async move { self.dashboard_summary(query).await })
    }

    fn used_models<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<Vec<String>, GatewayError>> {
        Box::pin(async move { self.used_models(query).await })
    }
}
