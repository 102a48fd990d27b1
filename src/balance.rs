use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Held,
    Finalized,
    Released,
}

impl ReservationState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Held => "held",
            ReservationState::Finalized => "finalized",
            ReservationState::Released => "released",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "held" => Some(ReservationState::Held),
            "finalized" => Some(ReservationState::Finalized),
            "released" => Some(ReservationState::Released),
            _ => None,
        }
    }
}

/// 预扣凭据。不可 Clone：finalize / release 按值消费，保证每个请求至多结算一次
#[derive(Debug)]
pub struct Reservation {
    pub id: String,
    pub group_id: String,
    pub amount: f64,
}

#[derive(Debug)]
pub enum ReserveOutcome {
    Reserved(Reservation),
    Insufficient { balance: f64 },
}

/// 外部账本。预扣必须是单条条件扣减，不能先读余额再扣
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn check_and_reserve(
        &self,
        group_id: &str,
        request_id: &str,
        amount: f64,
    ) -> Result<ReserveOutcome, GatewayError>;

    /// 按实际费用结算（多退少补）
    async fn finalize(&self, reservation: Reservation, actual_amount: f64)
    -> Result<(), GatewayError>;

    /// 全额退回
    async fn release(&self, reservation: Reservation) -> Result<(), GatewayError>;

    /// 全额退回 `held_before`（unix 秒，含）之前创建且仍为 held 的预扣，返回退回条数
    ///
    /// finalize / release 失败或进程中途退出时，预扣由此回收。
    async fn release_stale(&self, held_before: i64) -> Result<usize, GatewayError>;
}

/// 定期回收超过 `max_age` 仍未结算的预扣
pub fn spawn_stale_sweeper(
    ledger: Arc<dyn Ledger>,
    every: Duration,
    max_age: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let cutoff = Utc::now().timestamp().saturating_sub(max_age);
                    match ledger.release_stale(cutoff).await {
                        Ok(0) => {}
                        Ok(released) => tracing::warn!(released, "released stale reservations"),
                        Err(e) => tracing::error!("failed to release stale reservations: {}", e),
                    }
                }
            }
        }
    })
}
