use serde::{Deserialize, Serialize};
use std::fmt;

/// 中继模式，由入站路径决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    ChatCompletions,
    Embeddings,
    AudioSpeech,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayMode::ChatCompletions => "chat_completions",
            RelayMode::Embeddings => "embeddings",
            RelayMode::AudioSpeech => "audio_speech",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat_completions" => Some(RelayMode::ChatCompletions),
            "embeddings" => Some(RelayMode::Embeddings),
            "audio_speech" => Some(RelayMode::AudioSpeech),
            _ => None,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            RelayMode::ChatCompletions => "/v1/chat/completions",
            RelayMode::Embeddings => "/v1/embeddings",
            RelayMode::AudioSpeech => "/v1/audio/speech",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
