use bytes::Bytes;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::field::{Empty, display};

use crate::balance::Reservation;
use crate::error::GatewayError;
use crate::logging::UsageLog;
use crate::model::{GroupCache, TokenCache};
use crate::relay::adaptor::{RelayOutcome, Usage};
use crate::relay::billing::{self, PreCheckBalanceRequest};
use crate::relay::meta::RequestMeta;
use crate::relay::mode::RelayMode;
use crate::relay::request::RelayRequest;
use crate::relay::tokenizer;
use crate::server::AppState;
use crate::server::identity_cache::IdentitySnapshot;
use crate::server::token_model_limits::enforce_model_allowed_for_token;
use crate::server::util::{mask_key, normalize_key};

/// 进入流水线的原始请求
#[derive(Debug, Clone)]
pub struct InboundRelay {
    pub mode: RelayMode,
    /// Authorization 头原文
    pub credential: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub body: Bytes,
}

/// 已认证的调用方
pub(crate) struct Caller {
    pub token: TokenCache,
    pub group: GroupCache,
    pub is_internal: bool,
}

/// 流水线入口：认证 → 选路 → 限流 → 预扣 → 转发 → 结算
pub async fn relay(
    state: Arc<AppState>,
    inbound: InboundRelay,
    cancel: CancellationToken,
) -> Result<RelayOutcome, GatewayError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "relay",
        reqid = %request_id,
        mode = %inbound.mode,
        model = Empty,
        gid = Empty,
        tid = Empty,
        tname = Empty,
        key = Empty,
        internal = Empty,
        actmodel = Empty,
        chid = Empty,
        chname = Empty,
        chtype = Empty,
    );
    run(state, inbound, cancel, request_id).instrument(span).await
}

async fn run(
    state: Arc<AppState>,
    inbound: InboundRelay,
    cancel: CancellationToken,
    request_id: String,
) -> Result<RelayOutcome, GatewayError> {
    // 整个请求只看这一份快照
    let snapshot = state.identity.snapshot();
    let caller = authenticate(
        &state,
        &snapshot,
        inbound.credential.as_deref(),
        inbound.client_ip,
    )
    .await?;

    let span = tracing::Span::current();
    span.record("gid", display(&caller.group.id));
    span.record("tid", caller.token.id);
    span.record("tname", display(&caller.token.name));
    span.record("internal", caller.is_internal);

    let request = RelayRequest::parse(inbound.mode, &inbound.body)?;
    span.record("model", display(&request.model));

    let mut log = UsageLog {
        request_id: request_id.clone(),
        timestamp: Utc::now(),
        group_id: caller.group.id.clone(),
        token_id: caller.token.id,
        token_name: caller.token.name.clone(),
        origin_model: request.model.clone(),
        actual_model: request.model.clone(),
        channel_id: None,
        mode: inbound.mode,
        input_tokens: 0,
        output_tokens: 0,
        cached_tokens: 0,
        cache_creation_tokens: 0,
        amount: 0.0,
        status_code: 200,
        error_message: None,
    };

    let result = dispatch(&state, &snapshot, caller, request, request_id, &cancel, &mut log).await;
    if let Err(e) = &result {
        log.status_code = e.status_code().as_u16();
        log.error_message = Some(e.user_message());
        log.amount = 0.0;
    }
    record_usage(&state, log).await;
    result
}

/// 凭证 → (令牌, 分组)；管理员/内部凭证直接落到内部分组
pub(crate) async fn authenticate(
    state: &AppState,
    snapshot: &IdentitySnapshot,
    credential: Option<&str>,
    client_ip: Option<IpAddr>,
) -> Result<Caller, GatewayError> {
    let key = normalize_key(credential.unwrap_or_default());
    if key.is_empty() {
        return Err(GatewayError::Unauthorized("missing api key".into()));
    }
    tracing::Span::current().record("key", display(mask_key(key)));

    let auth = &state.config.auth;
    let is_privileged = [auth.admin_key.as_deref(), auth.internal_token.as_deref()]
        .into_iter()
        .flatten()
        .any(|configured| !configured.is_empty() && normalize_key(configured) == key);
    if is_privileged {
        return Ok(Caller {
            token: TokenCache::internal(),
            group: GroupCache::internal(),
            is_internal: true,
        });
    }

    let token = state
        .identity
        .resolve_token(snapshot, key)
        .await?
        .ok_or_else(|| GatewayError::Unauthorized("invalid api key".into()))?;
    token.ensure_usable(Utc::now().timestamp())?;
    if !token.allows_ip(client_ip) {
        return Err(GatewayError::Forbidden(format!(
            "source ip {} is not allowed for token",
            client_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".into())
        )));
    }

    let group = state
        .identity
        .resolve_group(snapshot, &token.group)
        .await
        .map_err(|e| {
            tracing::error!("failed to load group {}: {}", token.group, e);
            GatewayError::Internal("failed to get group".into())
        })?
        .ok_or_else(|| GatewayError::Internal("failed to get group".into()))?;
    if !group.is_admitted() {
        return Err(GatewayError::Forbidden("group is disabled".into()));
    }

    let is_internal = group.bypasses_balance();
    Ok(Caller {
        token,
        group,
        is_internal,
    })
}

async fn dispatch(
    state: &AppState,
    snapshot: &IdentitySnapshot,
    caller: Caller,
    request: RelayRequest,
    request_id: String,
    cancel: &CancellationToken,
    log: &mut UsageLog,
) -> Result<RelayOutcome, GatewayError> {
    let Caller {
        mut token,
        group,
        is_internal,
    } = caller;
    token.narrow_models(&snapshot.models);

    let selection = state.registry.select(
        &snapshot.models,
        &request.model,
        &state.config.load_balancing.strategy,
        &state.lb_state,
    )?;
    let config = selection.config;
    enforce_model_allowed_for_token(&token, &config.model)?;
    if config.mode != request.mode {
        return Err(GatewayError::BadRequest(format!(
            "model {} does not support {}",
            config.model, request.mode
        )));
    }

    let actual_model = selection.adaptor.normalize_model(&config.model)?;
    let span = tracing::Span::current();
    span.record("actmodel", display(&actual_model));
    span.record("chid", selection.channel.id);
    span.record("chname", display(&selection.channel.name));
    span.record("chtype", display(&selection.channel.channel_type));
    log.origin_model = config.model.clone();
    log.actual_model = actual_model.clone();
    log.channel_id = Some(selection.channel.id);

    // 默认只记录；enforce 模式下超过上限直接拒绝且不计数
    let rpm = if state.config.rate_limit.enforce {
        let ceiling = config.rpm_ceiling_for(&group);
        state.rpm.admit_with_ceiling(&group.id, &config.model, ceiling)?
    } else {
        state.rpm.admit(&group.id, &config.model)
    };
    tracing::debug!(rpm, "rate admitted");

    let input_tokens = billing::count_input(&request, &actual_model);
    let estimate = billing::estimate(state.config.billing.enabled, &group, &config, input_tokens)?;
    let reservation =
        billing::check_balance(state.ledger.as_ref(), &group, &request_id, &estimate).await?;

    let meta = RequestMeta {
        request_id,
        mode: request.mode,
        origin_model: config.model.clone(),
        actual_model,
        token,
        group,
        channel: selection.channel,
        model_config: config,
        is_internal,
        stream: request.stream,
        input_tokens,
        started_at: Utc::now(),
    };

    let adaptor = selection.adaptor;
    let upstream = async {
        let upstream_req = adaptor.build_upstream_request(&meta, &request)?;
        let response = adaptor.do_request(&state.http, &meta, upstream_req).await?;
        adaptor.parse_upstream_response(&meta, response)
    };
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        r = upstream => r,
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            release(state, reservation).await;
            return Err(e);
        }
    };

    let usage = outcome.usage.unwrap_or_else(|| Usage {
        input_tokens: meta.input_tokens,
        output_tokens: tokenizer::count_text(&meta.actual_model, &outcome.completion_text),
        ..Default::default()
    });
    let amount = billing::final_amount(&estimate, &usage);
    settle(state, reservation, &estimate, amount).await;

    log.input_tokens = usage.input_tokens;
    log.output_tokens = usage.output_tokens;
    log.cached_tokens = usage.cached_tokens;
    log.cache_creation_tokens = usage.cache_creation_tokens;
    log.amount = amount;
    tracing::info!(
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        amount,
        "relay completed"
    );
    Ok(outcome)
}

async fn release(state: &AppState, reservation: Option<Reservation>) {
    let Some(reservation) = reservation else {
        return;
    };
    let id = reservation.id.clone();
    if let Err(e) = state.ledger.release(reservation).await {
        tracing::error!(reservation = %id, "failed to release reservation: {}", e);
    }
}

/// 上游已产生用量，按实际费用结算；结算失败只记日志，响应照常返回，
/// 遗留的 held 预扣由 `spawn_stale_sweeper` 回收
async fn settle(
    state: &AppState,
    reservation: Option<Reservation>,
    estimate: &PreCheckBalanceRequest,
    amount: f64,
) {
    let Some(reservation) = reservation else {
        if estimate.billable && amount > 0.0 {
            tracing::debug!(amount, "usage not charged: no reservation held");
        }
        return;
    };
    let id = reservation.id.clone();
    if let Err(e) = state.ledger.finalize(reservation, amount).await {
        tracing::error!(reservation = %id, amount, "failed to finalize reservation: {}", e);
    }
}

async fn record_usage(state: &AppState, log: UsageLog) {
    match state.usage_store.record_usage(log).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!("usage already recorded for this request"),
        Err(e) => tracing::error!("failed to record usage: {}", e),
    }
}
