use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::model::{Channel, GroupCache, ModelCaches, TokenCache};
use crate::server::storage_traits::IdentityStore;

/// 某一时刻的令牌、分组和模型视图，构建后不再修改
#[derive(Debug, Default)]
pub struct IdentitySnapshot {
    pub tokens: HashMap<String, TokenCache>,
    pub groups: HashMap<String, GroupCache>,
    pub models: Arc<ModelCaches>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// 身份缓存。刷新时整体替换快照指针，请求持有的旧快照不受影响
pub struct IdentityCache {
    inner: RwLock<Arc<IdentitySnapshot>>,
    store: Arc<dyn IdentityStore>,
    channels: Vec<(Arc<Channel>, Vec<String>)>,
}

impl IdentityCache {
    /// 首次加载失败直接返回错误，进程不带空缓存启动
    pub async fn load(
        store: Arc<dyn IdentityStore>,
        channels: Vec<(Arc<Channel>, Vec<String>)>,
    ) -> Result<Self, GatewayError> {
        let cache = Self {
            inner: RwLock::new(Arc::new(IdentitySnapshot::default())),
            store,
            channels,
        };
        cache.refresh().await?;
        Ok(cache)
    }

    pub fn snapshot(&self) -> Arc<IdentitySnapshot> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn build_snapshot(&self) -> Result<IdentitySnapshot, GatewayError> {
        let tokens = self.store.load_tokens().await?;
        let groups = self.store.load_groups().await?;
        let configs = self.store.load_model_configs().await?;
        Ok(IdentitySnapshot {
            tokens: tokens.into_iter().map(|t| (t.key.clone(), t)).collect(),
            groups: groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
            models: Arc::new(ModelCaches::build(configs, self.channels.clone())),
            loaded_at: Some(Utc::now()),
        })
    }

    /// 重新读取存储并原子替换；失败时保留旧快照
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let next = Arc::new(self.build_snapshot().await?);
        tracing::debug!(
            tokens = next.tokens.len(),
            groups = next.groups.len(),
            models = next.models.enabled_models.len(),
            "identity snapshot refreshed"
        );
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = next;
        Ok(())
    }

    pub fn spawn_refresher(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            tracing::error!("identity cache refresh failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// 快照未命中时回源查询一次，结果不写回快照
    pub async fn resolve_token(
        &self,
        snapshot: &IdentitySnapshot,
        key: &str,
    ) -> Result<Option<TokenCache>, GatewayError> {
        if let Some(token) = snapshot.tokens.get(key) {
            return Ok(Some(token.clone()));
        }
        self.store.load_token(key).await
    }

    pub async fn resolve_group(
        &self,
        snapshot: &IdentitySnapshot,
        id: &str,
    ) -> Result<Option<GroupCache>, GatewayError> {
        if let Some(group) = snapshot.groups.get(id) {
            return Ok(Some(group.clone()));
        }
        self.store.load_group(id).await
    }
}
