pub mod settings;

pub use settings::{
    AuthConfig, BalanceStrategy, BillingConfig, CacheConfig, ChannelConfig, LoadBalancing,
    LoggingConfig, RateLimitConfig, ServerConfig, Settings, UpstreamConfig,
};
