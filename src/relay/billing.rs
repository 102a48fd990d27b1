use serde_json::Value;

use crate::balance::{Ledger, Reservation, ReserveOutcome};
use crate::error::GatewayError;
use crate::model::{GroupCache, ModelConfig, ModelPrice, PRICE_UNIT};
use crate::relay::adaptor::Usage;
use crate::relay::mode::RelayMode;
use crate::relay::request::RelayRequest;
use crate::relay::tokenizer;

/// 发往上游前的费用估算，用一次即丢
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreCheckBalanceRequest {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub cache_creation_tokens: u32,
    pub price: ModelPrice,
    /// false 表示无需走账本（计费关闭或内部分组无价格）
    pub billable: bool,
}

impl PreCheckBalanceRequest {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn amount(&self) -> f64 {
        if !self.billable {
            return 0.0;
        }
        cost(
            &self.price,
            &Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
                cached_tokens: self.cached_tokens,
                cache_creation_tokens: self.cache_creation_tokens,
            },
        )
    }
}

/// 按单价折算费用；cached 部分从 input 中扣出按缓存价计
fn cost(price: &ModelPrice, usage: &Usage) -> f64 {
    let cached = usage.cached_tokens.min(usage.input_tokens);
    let uncached = usage.input_tokens - cached;
    (uncached as f64 * price.input_price
        + cached as f64 * price.effective_cached_price()
        + usage.cache_creation_tokens as f64 * price.cache_creation_price
        + usage.output_tokens as f64 * price.output_price)
        / PRICE_UNIT
}

/// 计算请求的输入量：文本模式数 token，TTS 数字符
pub fn count_input(request: &RelayRequest, actual_model: &str) -> u32 {
    match request.mode {
        RelayMode::ChatCompletions => tokenizer::count_chat_input(actual_model, &request.body),
        RelayMode::Embeddings => tokenizer::count_embedding_input(
            actual_model,
            request.body.get("input").unwrap_or(&Value::Null),
        ),
        RelayMode::AudioSpeech => {
            u32::try_from(request.speech_input().chars().count()).unwrap_or(u32::MAX)
        }
    }
}

pub fn estimate(
    billing_enabled: bool,
    group: &GroupCache,
    config: &ModelConfig,
    input_tokens: u32,
) -> Result<PreCheckBalanceRequest, GatewayError> {
    if !billing_enabled {
        return Ok(PreCheckBalanceRequest::free());
    }
    match config.price {
        Some(price) => Ok(PreCheckBalanceRequest {
            input_tokens,
            price,
            billable: true,
            ..Default::default()
        }),
        // 内部分组不受价格约束
        None if group.bypasses_balance() => Ok(PreCheckBalanceRequest {
            input_tokens,
            ..Default::default()
        }),
        None => Err(GatewayError::PriceNotFound(config.model.clone())),
    }
}

/// 预扣估算费用；内部分组和免费估算不经过账本
pub async fn check_balance(
    ledger: &dyn Ledger,
    group: &GroupCache,
    request_id: &str,
    estimate: &PreCheckBalanceRequest,
) -> Result<Option<Reservation>, GatewayError> {
    if group.bypasses_balance() || !estimate.billable {
        return Ok(None);
    }
    let amount = estimate.amount();
    match ledger.check_and_reserve(&group.id, request_id, amount).await? {
        ReserveOutcome::Reserved(reservation) => Ok(Some(reservation)),
        ReserveOutcome::Insufficient { balance } => Err(GatewayError::InsufficientBalance(
            format!(
                "group {} balance {:.6} is not enough for estimated cost {:.6}",
                group.id, balance, amount
            ),
        )),
    }
}

/// 上游实际用量对应的费用
pub fn final_amount(estimate: &PreCheckBalanceRequest, usage: &Usage) -> f64 {
    if !estimate.billable {
        return 0.0;
    }
    cost(&estimate.price, usage)
}
