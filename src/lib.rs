pub mod balance;
pub mod config;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod model;
pub mod relay;
pub mod routing;
pub mod server;

#[cfg(test)]
pub(crate) mod test_utils;
