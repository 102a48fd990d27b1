use crate::model::ModelConfig;
use crate::relay::mode::RelayMode;

pub const OWNER: &str = "openai";

const CHAT_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
];

const EMBEDDING_MODELS: &[&str] = &[
    "text-embedding-3-small",
    "text-embedding-3-large",
    "text-embedding-ada-002",
];

const TTS_MODELS: &[&str] = &["tts-1", "tts-1-hd"];

pub fn model_list() -> Vec<ModelConfig> {
    let groups = [
        (CHAT_MODELS, RelayMode::ChatCompletions),
        (EMBEDDING_MODELS, RelayMode::Embeddings),
        (TTS_MODELS, RelayMode::AudioSpeech),
    ];
    groups
        .iter()
        .flat_map(|(names, mode)| names.iter().map(|m| ModelConfig::new(*m, OWNER, *mode)))
        .collect()
}
