use crate::config::BalanceStrategy;
use crate::error::GatewayError;
use crate::model::Channel;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// 跨请求保留的轮询计数（按模型）
#[derive(Debug, Default)]
pub struct LoadBalancerState {
    per_model_counter: Mutex<HashMap<String, usize>>,
}

impl LoadBalancerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_index(&self, model: &str, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let mut map = self
            .per_model_counter
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let counter = map.entry(model.to_string()).or_insert(0);
        let idx = *counter % len;
        *counter = counter.wrapping_add(1);
        idx
    }
}

pub struct LoadBalancer<'a> {
    channels: &'a [Arc<Channel>],
    strategy: &'a BalanceStrategy,
    state: &'a LoadBalancerState,
}

#[derive(Debug)]
pub enum BalanceError {
    NoChannelsAvailable(String),
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::NoChannelsAvailable(model) => {
                write!(f, "no channel available for model {}", model)
            }
        }
    }
}

impl std::error::Error for BalanceError {}

impl From<BalanceError> for GatewayError {
    fn from(e: BalanceError) -> Self {
        GatewayError::ModelNotFound(e.to_string())
    }
}

impl<'a> LoadBalancer<'a> {
    pub fn new(
        channels: &'a [Arc<Channel>],
        strategy: &'a BalanceStrategy,
        state: &'a LoadBalancerState,
    ) -> Self {
        Self {
            channels,
            strategy,
            state,
        }
    }

    pub fn select_channel(&self, model: &str) -> Result<Arc<Channel>, BalanceError> {
        if self.channels.is_empty() {
            return Err(BalanceError::NoChannelsAvailable(model.to_string()));
        }

        let channel = match self.strategy {
            BalanceStrategy::FirstAvailable => &self.channels[0],
            BalanceStrategy::RoundRobin => {
                let index = self.state.next_index(model, self.channels.len());
                &self.channels[index]
            }
            BalanceStrategy::Random => {
                let mut rng = rand::rng();
                let index = rng.random_range(0..self.channels.len());
                &self.channels[index]
            }
        };

        Ok(channel.clone())
    }
}
