pub mod database;
pub mod database_identity;
pub mod database_ledger;
pub mod database_usage;
pub mod types;

pub use database::DatabaseLogger;
pub use types::{DashboardQuery, UsageLog, UsageSummary};
