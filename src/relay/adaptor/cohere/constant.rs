use crate::model::ModelConfig;
use crate::relay::mode::RelayMode;

pub const OWNER: &str = "cohere";

/// 带该后缀的模型名会挂上联网搜索 connector
pub const INTERNET_SUFFIX: &str = "-internet";

pub const MODELS: &[&str] = &[
    "command",
    "command-nightly",
    "command-light",
    "command-light-nightly",
    "command-r",
    "command-r-plus",
];

pub fn model_list() -> Vec<ModelConfig> {
    let base = MODELS.iter().map(|m| m.to_string());
    let internet = MODELS.iter().map(|m| format!("{m}{INTERNET_SUFFIX}"));
    base.chain(internet)
        .map(|m| ModelConfig::new(m, OWNER, RelayMode::ChatCompletions))
        .collect()
}
