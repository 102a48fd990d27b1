use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

const WINDOW_SECS: u64 = 60;
const COUNT_BITS: u32 = 24;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;
/// 超过此时长无请求的 key 会被清理
const IDLE_SECS: u64 = 5 * WINDOW_SECS;

fn pack(second: u64, count: u64) -> u64 {
    (second << COUNT_BITS) | count.min(COUNT_MASK)
}

fn unpack(v: u64) -> (u64, u64) {
    (v >> COUNT_BITS, v & COUNT_MASK)
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 60 个一秒槽位的环；每个槽位打包 (秒, 计数)
#[derive(Debug)]
struct RpmWindow {
    slots: [AtomicU64; WINDOW_SECS as usize],
    last_seen: AtomicU64,
    // 上限检查与计数必须在同一临界区内
    gate: Mutex<()>,
}

impl RpmWindow {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
            last_seen: AtomicU64::new(0),
            gate: Mutex::new(()),
        }
    }

    fn record(&self, now: u64) {
        let slot = &self.slots[(now % WINDOW_SECS) as usize];
        let mut cur = slot.load(Ordering::Acquire);
        loop {
            let (second, count) = unpack(cur);
            let next = if second >= now {
                // 同一秒（或时钟回拨）累加到现有槽位
                pack(second, count + 1)
            } else {
                pack(now, 1)
            };
            match slot.compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        self.last_seen.fetch_max(now, Ordering::Relaxed);
    }

    /// 当前计数低于 `limit` 时才记录；拒绝时返回当前计数
    fn record_below(&self, now: u64, limit: u64) -> Result<u64, u64> {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.count(now);
        if current >= limit {
            return Err(current);
        }
        self.record(now);
        Ok(current + 1)
    }

    fn count(&self, now: u64) -> u64 {
        self.slots
            .iter()
            .map(|s| unpack(s.load(Ordering::Acquire)))
            .filter(|(second, count)| {
                *count > 0 && *second <= now && now - *second < WINDOW_SECS
            })
            .map(|(_, count)| count)
            .sum()
    }

    fn is_idle(&self, now: u64) -> bool {
        now.saturating_sub(self.last_seen.load(Ordering::Relaxed)) > IDLE_SECS
    }
}

/// 按 (group, model) 统计最近 60 秒的请求数
///
/// 每次 admit 同时记入 (group, model)、(group, "")、("", model)、("", "")，
/// 分别用于单模型、分组汇总、模型全局和总量查询。
///
/// 记录始终在持有 DashMap 分片锁时进行，清理用的 `retain` 拿写锁，
/// 因此不会删掉正在被写入的窗口，新建窗口也不会在首次记录前被判为空闲。
#[derive(Debug, Default)]
pub struct RpmLimiter {
    windows: DashMap<(String, String), RpmWindow>,
}

impl RpmLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_window<R>(&self, group: &str, model: &str, f: impl FnOnce(&RpmWindow) -> R) -> R {
        let key = (group.to_string(), model.to_string());
        if let Some(w) = self.windows.get(&key) {
            return f(w.value());
        }
        let w = self.windows.entry(key).or_insert_with(RpmWindow::new);
        f(w.value())
    }

    /// (group, model) 之外的汇总 key，已去重
    fn record_aggregates(&self, group: &str, model: &str, now: u64) {
        let keys = [(group, model), (group, ""), ("", model), ("", "")];
        for (i, (g, m)) in keys.iter().enumerate().skip(1) {
            if keys[..i].contains(&(*g, *m)) {
                continue;
            }
            self.with_window(g, m, |w| w.record(now));
        }
    }

    /// 记录一次请求，返回记录后的 (group, model) RPM
    pub fn admit(&self, group: &str, model: &str) -> u64 {
        self.admit_at(group, model, now_secs())
    }

    pub fn admit_at(&self, group: &str, model: &str, now: u64) -> u64 {
        self.with_window(group, model, |w| w.record(now));
        self.record_aggregates(group, model, now);
        self.current_rpm_at(group, model, now)
    }

    /// 强制模式：当前 RPM 已达上限时拒绝且不计数
    pub fn admit_with_ceiling(
        &self,
        group: &str,
        model: &str,
        ceiling: Option<u64>,
    ) -> Result<u64, GatewayError> {
        self.admit_with_ceiling_at(group, model, ceiling, now_secs())
    }

    pub fn admit_with_ceiling_at(
        &self,
        group: &str,
        model: &str,
        ceiling: Option<u64>,
        now: u64,
    ) -> Result<u64, GatewayError> {
        let Some(limit) = ceiling else {
            return Ok(self.admit_at(group, model, now));
        };
        match self.with_window(group, model, |w| w.record_below(now, limit)) {
            Ok(rpm) => {
                self.record_aggregates(group, model, now);
                Ok(rpm)
            }
            Err(current) => Err(GatewayError::RateLimited(format!(
                "model {model} rpm {current} reached limit {limit}"
            ))),
        }
    }

    pub fn current_rpm(&self, group: &str, model: &str) -> u64 {
        self.current_rpm_at(group, model, now_secs())
    }

    pub fn current_rpm_at(&self, group: &str, model: &str, now: u64) -> u64 {
        self.windows
            .get(&(group.to_string(), model.to_string()))
            .map(|w| w.count(now))
            .unwrap_or(0)
    }

    pub fn prune_idle_at(&self, now: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_idle(now));
        before - self.windows.len()
    }

    /// 后台定期清理空闲 key
    pub fn spawn_pruner(
        self: Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = self.prune_idle_at(now_secs());
                        if removed > 0 {
                            tracing::debug!(removed, "pruned idle rpm windows");
                        }
                    }
                }
            }
        })
    }
}
