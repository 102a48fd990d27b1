use async_openai::types::CreateChatCompletionRequest;
use serde_json::Value;

use crate::error::GatewayError;
use crate::relay::mode::RelayMode;

/// 统一的入站请求：保留原始 JSON，chat 模式额外解析出强类型视图
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub mode: RelayMode,
    pub model: String,
    pub stream: bool,
    pub body: Value,
    pub chat: Option<CreateChatCompletionRequest>,
}

impl RelayRequest {
    pub fn parse(mode: RelayMode, raw: &[u8]) -> Result<Self, GatewayError> {
        let body: Value = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::BadRequest(format!("invalid request body: {}", e)))?;
        if !body.is_object() {
            return Err(GatewayError::BadRequest(
                "request body must be a JSON object".into(),
            ));
        }
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| GatewayError::BadRequest("model is required".into()))?
            .to_string();
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

        let chat = match mode {
            RelayMode::ChatCompletions => Some(
                serde_json::from_value::<CreateChatCompletionRequest>(body.clone()).map_err(
                    |e| GatewayError::BadRequest(format!("invalid chat request: {}", e)),
                )?,
            ),
            RelayMode::Embeddings => {
                if body.get("input").is_none_or(Value::is_null) {
                    return Err(GatewayError::BadRequest("input is required".into()));
                }
                None
            }
            RelayMode::AudioSpeech => {
                if body.get("input").and_then(Value::as_str).is_none() {
                    return Err(GatewayError::BadRequest("input must be a string".into()));
                }
                None
            }
        };

        Ok(Self {
            mode,
            model,
            stream: stream && mode == RelayMode::ChatCompletions,
            body,
            chat,
        })
    }

    /// TTS 的输入文本
    pub fn speech_input(&self) -> &str {
        self.body.get("input").and_then(Value::as_str).unwrap_or("")
    }

    /// 以上游模型名替换后的请求体
    pub fn body_with_model(&self, actual_model: &str) -> Value {
        let mut body = self.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".into(), Value::String(actual_model.to_string()));
        }
        body
    }
}
