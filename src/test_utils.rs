use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::balance::{Ledger, Reservation, ReservationState, ReserveOutcome};
use crate::config::Settings;
use crate::error::GatewayError;
use crate::logging::types::{DashboardQuery, UsageLog, UsageSummary};
use crate::model::{
    Channel, ChartData, GroupCache, GroupStatus, ModelConfig, TokenCache, TokenStatus,
};
use crate::relay::adaptor::{Adaptor, AdaptorRegistry, RelayOutcome, Usage};
use crate::relay::meta::RequestMeta;
use crate::relay::mode::RelayMode;
use crate::relay::request::RelayRequest;
use crate::relay::transport::{UpstreamRequest, UpstreamResponse};
use crate::routing::{LoadBalancerState, RpmLimiter};
use crate::server::AppState;
use crate::server::identity_cache::IdentityCache;
use crate::server::storage_traits::{BoxFuture, IdentityStore, UsageLogStore};

/// 沙箱里不能监听端口时跳过 httpmock 测试
pub fn should_skip_httpmock() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_err()
}

pub fn test_token(key: &str, group: &str, models: &[&str]) -> TokenCache {
    TokenCache {
        id: 1,
        name: key.to_string(),
        key: key.to_string(),
        group: group.to_string(),
        status: TokenStatus::Enabled,
        models: models.iter().map(|m| m.to_string()).collect(),
        subnets: Vec::new(),
        expired_at: None,
    }
}

pub fn test_channel(channel_type: &str, base_url: &str) -> Arc<Channel> {
    Arc::new(Channel {
        id: 1,
        name: format!("{channel_type}-test"),
        channel_type: channel_type.to_string(),
        base_url: base_url.to_string(),
        api_key: "sk-test-key".to_string(),
        models: Vec::new(),
        timeout: Duration::from_secs(5),
    })
}

pub fn meta_for(channel: Arc<Channel>, model: &str, mode: RelayMode) -> RequestMeta {
    let owner = channel.channel_type.clone();
    RequestMeta {
        request_id: "req-test".to_string(),
        mode,
        origin_model: model.to_string(),
        actual_model: model.to_string(),
        token: test_token("test", "g1", &[]),
        group: GroupCache {
            id: "g1".to_string(),
            status: GroupStatus::Enabled,
            rpm_ratio: 1.0,
        },
        channel,
        model_config: Arc::new(ModelConfig::new(model, owner, mode)),
        is_internal: false,
        stream: false,
        input_tokens: 0,
        started_at: Utc::now(),
    }
}

// ---- 账本 ----

struct HeldReservation {
    group_id: String,
    amount: f64,
    state: ReservationState,
    created_at: i64,
}

#[derive(Default)]
struct LedgerInner {
    balances: HashMap<String, f64>,
    reservations: HashMap<String, HeldReservation>,
    // 为真时 finalize / release 返回错误且不改动任何状态
    settlement_fails: bool,
}

/// 内存账本，检查与扣减在同一把锁内完成
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl MemoryLedger {
    pub fn with_balance(group_id: &str, balance: f64) -> Self {
        let ledger = Self::default();
        ledger.set_balance(group_id, balance);
        ledger
    }

    pub fn set_balance(&self, group_id: &str, balance: f64) {
        self.lock().balances.insert(group_id.to_string(), balance);
    }

    pub fn balance(&self, group_id: &str) -> f64 {
        self.lock().balances.get(group_id).copied().unwrap_or(0.0)
    }

    pub fn fail_settlements(&self, fail: bool) {
        self.lock().settlement_fails = fail;
    }

    pub fn reservation_count(&self) -> usize {
        self.lock().reservations.len()
    }

    pub fn held_count(&self) -> usize {
        self.count_in(ReservationState::Held)
    }

    pub fn released_count(&self) -> usize {
        self.count_in(ReservationState::Released)
    }

    fn count_in(&self, state: ReservationState) -> usize {
        self.lock()
            .reservations
            .values()
            .filter(|r| r.state == state)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn close(
        &self,
        reservation: Reservation,
        refund: f64,
        state: ReservationState,
    ) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        if inner.settlement_fails {
            return Err(GatewayError::Db(rusqlite::Error::InvalidQuery));
        }
        let Some(held) = inner.reservations.get_mut(&reservation.id) else {
            return Ok(());
        };
        if held.state != ReservationState::Held {
            return Ok(());
        }
        held.state = state;
        let group_id = held.group_id.clone();
        *inner.balances.entry(group_id).or_insert(0.0) += refund;
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn check_and_reserve(
        &self,
        group_id: &str,
        request_id: &str,
        amount: f64,
    ) -> Result<ReserveOutcome, GatewayError> {
        let mut inner = self.lock();
        let balance = inner.balances.get(group_id).copied().unwrap_or(0.0);
        if balance < amount {
            return Ok(ReserveOutcome::Insufficient { balance });
        }
        inner.balances.insert(group_id.to_string(), balance - amount);
        inner.reservations.insert(
            request_id.to_string(),
            HeldReservation {
                group_id: group_id.to_string(),
                amount,
                state: ReservationState::Held,
                created_at: Utc::now().timestamp(),
            },
        );
        Ok(ReserveOutcome::Reserved(Reservation {
            id: request_id.to_string(),
            group_id: group_id.to_string(),
            amount,
        }))
    }

    async fn finalize(
        &self,
        reservation: Reservation,
        actual_amount: f64,
    ) -> Result<(), GatewayError> {
        let refund = reservation.amount - actual_amount;
        self.close(reservation, refund, ReservationState::Finalized)
    }

    async fn release(&self, reservation: Reservation) -> Result<(), GatewayError> {
        let refund = reservation.amount;
        self.close(reservation, refund, ReservationState::Released)
    }

    async fn release_stale(&self, held_before: i64) -> Result<usize, GatewayError> {
        let mut inner = self.lock();
        let LedgerInner {
            balances,
            reservations,
            ..
        } = &mut *inner;
        let mut released = 0;
        for held in reservations.values_mut() {
            if held.state == ReservationState::Held && held.created_at <= held_before {
                held.state = ReservationState::Released;
                *balances.entry(held.group_id.clone()).or_insert(0.0) += held.amount;
                released += 1;
            }
        }
        Ok(released)
    }
}

// ---- 用量日志 ----

#[derive(Default)]
pub struct MemoryUsageStore {
    logs: Mutex<Vec<UsageLog>>,
}

impl MemoryUsageStore {
    pub fn logs(&self) -> Vec<UsageLog> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn matching(&self, query: &DashboardQuery) -> Vec<UsageLog> {
        self.logs()
            .into_iter()
            .filter(|l| {
                let ts = l.timestamp.timestamp();
                ts >= query.start
                    && ts <= query.end
                    && query.group.as_ref().is_none_or(|g| &l.group_id == g)
                    && query.token_name.as_ref().is_none_or(|t| &l.token_name == t)
                    && query.model.as_ref().is_none_or(|m| &l.origin_model == m)
            })
            .collect()
    }
}

impl UsageLogStore for MemoryUsageStore {
    fn record_usage<'a>(&'a self, log: UsageLog) -> BoxFuture<'a, Result<bool, GatewayError>> {
        Box::pin(async move {
            let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
            if logs.iter().any(|l| l.request_id == log.request_id) {
                return Ok(false);
            }
            logs.push(log);
            Ok(true)
        })
    }

    fn chart_data<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<Vec<ChartData>, GatewayError>> {
        Box::pin(async move {
            let step = query.span.seconds();
            let mut buckets: BTreeMap<i64, ChartData> = BTreeMap::new();
            for log in self.matching(query) {
                let ts = log.timestamp.timestamp();
                let bucket = ts - ts.rem_euclid(step);
                let entry = buckets
                    .entry(bucket)
                    .or_insert_with(|| ChartData::zero(bucket));
                entry.request_count += 1;
                entry.used_amount += log.amount;
                if log.is_exception() {
                    entry.exception_count += 1;
                }
            }
            Ok(buckets.into_values().collect())
        })
    }

    fn dashboard_summary<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<UsageSummary, GatewayError>> {
        Box::pin(async move {
            let logs = self.matching(query);
            Ok(UsageSummary {
                total_count: logs.len() as i64,
                exception_count: logs.iter().filter(|l| l.is_exception()).count() as i64,
                used_amount: logs.iter().map(|l| l.amount).sum(),
            })
        })
    }

    fn used_models<'a>(
        &'a self,
        query: &'a DashboardQuery,
    ) -> BoxFuture<'a, Result<Vec<String>, GatewayError>> {
        Box::pin(async move {
            let mut models: Vec<String> = self
                .matching(query)
                .into_iter()
                .map(|l| l.origin_model)
                .collect();
            models.sort();
            models.dedup();
            Ok(models)
        })
    }
}

// ---- 身份存储 ----

#[derive(Default)]
pub struct MemoryIdentityStore {
    tokens: Mutex<Vec<TokenCache>>,
    groups: Mutex<Vec<GroupCache>>,
    models: Mutex<Vec<ModelConfig>>,
    failing: AtomicBool,
}

impl MemoryIdentityStore {
    pub fn put_token(&self, token: TokenCache) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.retain(|t| t.key != token.key);
        tokens.push(token);
    }

    pub fn put_group(&self, id: &str, status: GroupStatus) {
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        groups.retain(|g| g.id != id);
        groups.push(GroupCache {
            id: id.to_string(),
            status,
            rpm_ratio: 1.0,
        });
    }

    pub fn put_model(&self, config: ModelConfig) {
        let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
        models.retain(|m| m.model != config.model);
        models.push(config);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Internal("identity store unavailable".into()));
        }
        Ok(())
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load_tokens<'a>(&'a self) -> BoxFuture<'a, Result<Vec<TokenCache>, GatewayError>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.tokens.lock().unwrap_or_else(|e| e.into_inner()).clone())
        })
    }

    fn load_groups<'a>(&'a self) -> BoxFuture<'a, Result<Vec<GroupCache>, GatewayError>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.groups.lock().unwrap_or_else(|e| e.into_inner()).clone())
        })
    }

    fn load_model_configs<'a>(&'a self) -> BoxFuture<'a, Result<Vec<ModelConfig>, GatewayError>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.models.lock().unwrap_or_else(|e| e.into_inner()).clone())
        })
    }

    fn load_token<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<TokenCache>, GatewayError>> {
        Box::pin(async move {
            self.check()?;
            let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            Ok(tokens.iter().find(|t| t.key == key).cloned())
        })
    }

    fn load_group<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<GroupCache>, GatewayError>> {
        Box::pin(async move {
            self.check()?;
            let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            Ok(groups.iter().find(|g| g.id == id).cloned())
        })
    }

    fn seed_model_configs<'a>(
        &'a self,
        configs: &'a [ModelConfig],
    ) -> BoxFuture<'a, Result<usize, GatewayError>> {
        Box::pin(async move {
            self.check()?;
            let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
            let mut inserted = 0;
            for config in configs {
                if !models.iter().any(|m| m.model == config.model) {
                    models.push(config.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }
}

// ---- 脚本化适配器 ----

type ErrorFactory = Box<dyn Fn() -> GatewayError + Send + Sync>;

/// 不发网络请求的适配器，按预设返回结果
pub struct ScriptedAdaptor {
    usage: Option<Usage>,
    completion_text: String,
    error: Option<ErrorFactory>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAdaptor {
    pub fn ok(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            completion_text: String::new(),
            error: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 上游不返回用量，只给出生成文本
    pub fn without_usage(text: &str) -> Self {
        let mut adaptor = Self::ok(Usage::default());
        adaptor.usage = None;
        adaptor.completion_text = text.to_string();
        adaptor
    }

    pub fn failing(error: impl Fn() -> GatewayError + Send + Sync + 'static) -> Self {
        let mut adaptor = Self::ok(Usage::default());
        adaptor.error = Some(Box::new(error));
        adaptor
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Adaptor for ScriptedAdaptor {
    fn channel_type(&self) -> &'static str {
        "mock"
    }

    fn model_list(&self) -> Vec<ModelConfig> {
        Vec::new()
    }

    fn normalize_model(&self, requested: &str) -> Result<String, GatewayError> {
        Ok(requested.to_string())
    }

    fn build_upstream_request(
        &self,
        meta: &RequestMeta,
        request: &RelayRequest,
    ) -> Result<UpstreamRequest, GatewayError> {
        let body = serde_json::to_vec(&request.body_with_model(&meta.actual_model))
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        Ok(UpstreamRequest {
            method: reqwest::Method::POST,
            url: meta.channel.endpoint("/v1/chat/completions"),
            headers: reqwest::header::HeaderMap::new(),
            body: Bytes::from(body),
        })
    }

    async fn do_request(
        &self,
        _client: &reqwest::Client,
        _meta: &RequestMeta,
        _request: UpstreamRequest,
    ) -> Result<UpstreamResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.error {
            return Err(error());
        }
        Ok(UpstreamResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(br#"{"object":"chat.completion","choices":[]}"#),
        })
    }

    fn parse_upstream_response(
        &self,
        _meta: &RequestMeta,
        response: UpstreamResponse,
    ) -> Result<RelayOutcome, GatewayError> {
        Ok(RelayOutcome {
            content_type: response
                .content_type
                .unwrap_or_else(|| "application/json".to_string()),
            body: response.body,
            usage: self.usage,
            completion_text: self.completion_text.clone(),
        })
    }
}

// ---- 组装 ----

pub struct TestApp {
    pub state: Arc<AppState>,
    pub ledger: Arc<MemoryLedger>,
    pub usage: Arc<MemoryUsageStore>,
    pub identity_store: Arc<MemoryIdentityStore>,
    calls: Arc<AtomicUsize>,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    pub fn adaptor_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct TestAppBuilder {
    settings: Settings,
    groups: Vec<(String, GroupStatus, f64)>,
    tokens: Vec<TokenCache>,
    models: Vec<ModelConfig>,
    adaptor: Option<ScriptedAdaptor>,
}

impl TestAppBuilder {
    pub fn group(mut self, id: &str, status: GroupStatus, balance: f64) -> Self {
        self.groups.push((id.to_string(), status, balance));
        self
    }

    pub fn token(mut self, token: TokenCache) -> Self {
        self.tokens.push(token);
        self
    }

    pub fn model(mut self, config: ModelConfig) -> Self {
        self.models.push(config);
        self
    }

    pub fn adaptor(mut self, adaptor: ScriptedAdaptor) -> Self {
        self.adaptor = Some(adaptor);
        self
    }

    pub fn admin_key(mut self, key: &str) -> Self {
        self.settings.auth.admin_key = Some(key.to_string());
        self
    }

    pub fn enforce_rpm(mut self) -> Self {
        self.settings.rate_limit.enforce = true;
        self
    }

    /// 所有模型都挂在同一个 mock 渠道上
    pub async fn build(self) -> TestApp {
        let ledger = Arc::new(MemoryLedger::default());
        let store = Arc::new(MemoryIdentityStore::default());
        for (id, status, balance) in &self.groups {
            store.put_group(id, *status);
            ledger.set_balance(id, *balance);
        }
        for token in self.tokens {
            store.put_token(token);
        }
        let names: Vec<String> = self.models.iter().map(|m| m.model.clone()).collect();
        for model in self.models {
            store.put_model(model);
        }

        let adaptor = self
            .adaptor
            .unwrap_or_else(|| ScriptedAdaptor::ok(Usage::default()));
        let calls = adaptor.calls();
        let mut registry = AdaptorRegistry::new();
        registry.register(Arc::new(adaptor));

        let channel = test_channel("mock", "http://mock.invalid");
        let identity = IdentityCache::load(store.clone(), vec![(channel, names)])
            .await
            .expect("identity cache should load from memory store");

        let usage = Arc::new(MemoryUsageStore::default());
        let state = Arc::new(AppState {
            config: self.settings,
            identity: Arc::new(identity),
            registry,
            rpm: Arc::new(RpmLimiter::new()),
            lb_state: LoadBalancerState::new(),
            ledger: ledger.clone(),
            usage_store: usage.clone(),
            http: reqwest::Client::new(),
            background: CancellationToken::new(),
        });
        TestApp {
            state,
            ledger,
            usage,
            identity_store: store,
            calls,
        }
    }
}
