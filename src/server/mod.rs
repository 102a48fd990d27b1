pub mod dashboard;
pub mod handlers;
pub mod identity_cache;
pub mod storage_traits;
pub mod token_model_limits;
pub(crate) mod util;

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::balance::{Ledger, spawn_stale_sweeper};
use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::http_client;
use crate::logging::DatabaseLogger;
use crate::model::Channel;
use crate::relay::adaptor::AdaptorRegistry;
use crate::routing::{LoadBalancerState, RpmLimiter};
use crate::server::identity_cache::IdentityCache;
use crate::server::storage_traits::{IdentityStore, UsageLogStore};

const RPM_PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const RESERVATION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
// 远长于任何渠道超时，仍为 held 的预扣只可能是结算失败遗留的
const STALE_RESERVATION_AGE: Duration = Duration::from_secs(3600);

pub struct AppState {
    pub config: Settings,
    pub identity: Arc<IdentityCache>,
    pub registry: AdaptorRegistry,
    pub rpm: Arc<RpmLimiter>,
    pub lb_state: LoadBalancerState,
    pub ledger: Arc<dyn Ledger>,
    pub usage_store: Arc<dyn UsageLogStore>,
    pub http: reqwest::Client,
    /// 关闭时取消后台刷新与清理任务
    pub background: CancellationToken,
}

impl AppState {
    /// 启动缓存刷新、RPM 清理和预扣回收任务
    pub fn spawn_background_tasks(&self) {
        let every = Duration::from_secs(self.config.cache.refresh_interval_secs.max(1));
        self.identity
            .clone()
            .spawn_refresher(every, self.background.child_token());
        self.rpm
            .clone()
            .spawn_pruner(RPM_PRUNE_INTERVAL, self.background.child_token());
        spawn_stale_sweeper(
            self.ledger.clone(),
            RESERVATION_SWEEP_INTERVAL,
            STALE_RESERVATION_AGE,
            self.background.child_token(),
        );
    }
}

/// 按配置中的渠道构建 AppState（不含 HTTP 层）
pub async fn build_state(config: Settings) -> AppResult<Arc<AppState>> {
    let db = Arc::new(DatabaseLogger::new(&config.logging.database_path).await?);
    let registry = AdaptorRegistry::builtin();

    let mut channels: Vec<Arc<Channel>> = config
        .channels
        .iter()
        .map(|(name, c)| {
            let mut channel = Channel::from(c);
            if channel.name.is_empty() {
                channel.name = name.clone();
            }
            Arc::new(channel)
        })
        .collect();
    // HashMap 无序，按 id 固定渠道顺序
    channels.sort_by_key(|c| c.id);
    for channel in &channels {
        if registry.get(&channel.channel_type).is_none() {
            tracing::warn!(
                channel = %channel.name,
                channel_type = %channel.channel_type,
                "channel has no registered adaptor and will not serve traffic"
            );
        }
    }

    let seeds = registry.builtin_model_configs(&channels);
    let inserted = db.seed_model_configs(&seeds).await?;
    if inserted > 0 {
        tracing::info!(inserted, "seeded built-in model configs");
    }

    let store: Arc<dyn IdentityStore> = db.clone();
    let identity = Arc::new(IdentityCache::load(store, registry.channel_models(&channels)).await?);
    let http = http_client::build_client(&config.upstream)?;

    Ok(Arc::new(AppState {
        config,
        identity,
        registry,
        rpm: Arc::new(RpmLimiter::new()),
        lb_state: LoadBalancerState::new(),
        ledger: db.clone(),
        usage_store: db,
        http,
        background: CancellationToken::new(),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    use axum::http::{Method, header};
    use tower_http::cors::{AllowOrigin, CorsLayer};

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(AllowOrigin::mirror_request());

    handlers::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn create_app(config: Settings) -> AppResult<(Router, Arc<AppState>)> {
    let state = build_state(config).await?;
    state.spawn_background_tasks();
    tracing::info!(
        models = state.identity.snapshot().models.enabled_models.len(),
        "identity cache loaded"
    );
    Ok((router(state.clone()), state))
}
