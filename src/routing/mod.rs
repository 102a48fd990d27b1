pub mod load_balancer;
pub mod rpm_limit;

pub use load_balancer::{LoadBalancer, LoadBalancerState};
pub use rpm_limit::RpmLimiter;
