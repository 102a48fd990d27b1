pub mod channel;
pub mod chart;
pub mod group;
pub mod model_config;
pub mod token;

pub use channel::Channel;
pub use chart::{ChartData, DashboardResponse, TimeSpanType};
pub use group::{GroupCache, GroupStatus, INTERNAL_GROUP_ID};
pub use model_config::{ModelCaches, ModelConfig, ModelPrice, PRICE_UNIT};
pub use token::{TokenCache, TokenStatus, parse_subnets};
