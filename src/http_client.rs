use std::time::Duration;

use reqwest::ClientBuilder;

use crate::config::UpstreamConfig;
use crate::error::GatewayError;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 32;

fn has_proxy_env() -> bool {
    [
        "HTTPS_PROXY",
        "https_proxy",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
    ]
    .iter()
    .any(|k| std::env::var(k).is_ok_and(|v| !v.trim().is_empty()))
}

fn should_bypass_proxy_impl(cfg: &UpstreamConfig, proxy_env_present: bool) -> bool {
    cfg.no_proxy && proxy_env_present
}

fn apply_proxy_policy(builder: ClientBuilder, cfg: &UpstreamConfig) -> ClientBuilder {
    if should_bypass_proxy_impl(cfg, has_proxy_env()) {
        tracing::info!("proxy environment detected, upstream calls bypass it (upstream.no_proxy)");
        builder.no_proxy()
    } else {
        builder
    }
}

/// 所有渠道共用的上游客户端；请求超时按渠道逐次设置
pub fn build_client(cfg: &UpstreamConfig) -> Result<reqwest::Client, GatewayError> {
    let builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs.max(1)))
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST);
    apply_proxy_policy(builder, cfg)
        .build()
        .map_err(|e| GatewayError::Config(format!("failed to build http client: {}", e)))
}
