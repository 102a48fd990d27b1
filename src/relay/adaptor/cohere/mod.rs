pub mod constant;

use async_openai::types as oai;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value, json};

use super::openai::{SSE_CONTENT_TYPE, json_request};
use super::{Adaptor, RelayOutcome, Usage};
use crate::error::GatewayError;
use crate::model::ModelConfig;
use crate::relay::meta::RequestMeta;
use crate::relay::mode::RelayMode;
use crate::relay::request::RelayRequest;
use crate::relay::transport::{UpstreamRequest, UpstreamResponse};
use constant::INTERNET_SUFFIX;

const CHAT_PATH: &str = "/v1/chat";

/// Cohere v1 chat 接口，请求与响应均需转换
pub struct CohereAdaptor;

fn join_texts<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.collect::<Vec<_>>().join("\n")
}

fn user_text(content: &oai::ChatCompletionRequestUserMessageContent) -> String {
    match content {
        oai::ChatCompletionRequestUserMessageContent::Text(text) => text.clone(),
        oai::ChatCompletionRequestUserMessageContent::Array(parts) => {
            join_texts(parts.iter().filter_map(|p| match p {
                oai::ChatCompletionRequestUserMessageContentPart::Text(t) => Some(t.text.as_str()),
                // 图片和音频不支持
                oai::ChatCompletionRequestUserMessageContentPart::ImageUrl(_)
                | oai::ChatCompletionRequestUserMessageContentPart::InputAudio(_) => None,
            }))
        }
    }
}

fn assistant_text(content: &Option<oai::ChatCompletionRequestAssistantMessageContent>) -> String {
    match content {
        None => String::new(),
        Some(oai::ChatCompletionRequestAssistantMessageContent::Text(text)) => text.clone(),
        Some(oai::ChatCompletionRequestAssistantMessageContent::Array(parts)) => {
            join_texts(parts.iter().map(|p| match p {
                oai::ChatCompletionRequestAssistantMessageContentPart::Text(t) => t.text.as_str(),
                oai::ChatCompletionRequestAssistantMessageContentPart::Refusal(r) => {
                    r.refusal.as_str()
                }
            }))
        }
    }
}

fn system_text(message: &oai::ChatCompletionRequestMessage) -> Option<String> {
    match message {
        oai::ChatCompletionRequestMessage::Developer(dev) => Some(match &dev.content {
            oai::ChatCompletionRequestDeveloperMessageContent::Text(s) => s.clone(),
            oai::ChatCompletionRequestDeveloperMessageContent::Array(parts) => {
                join_texts(parts.iter().map(|p| p.text.as_str()))
            }
        }),
        oai::ChatCompletionRequestMessage::System(sys) => Some(match &sys.content {
            oai::ChatCompletionRequestSystemMessageContent::Text(s) => s.clone(),
            oai::ChatCompletionRequestSystemMessageContent::Array(parts) => {
                join_texts(parts.iter().map(|p| match p {
                    oai::ChatCompletionRequestSystemMessageContentPart::Text(t) => t.text.as_str(),
                }))
            }
        }),
        _ => None,
    }
}

/// OpenAI chat 请求 → Cohere chat 请求
///
/// 最后一条 user 消息作为 `message`，其余按原顺序进入 `chat_history`；system/developer 合并为 `preamble`。
/// tool/function 消息被忽略。
pub fn convert_request(
    chat: &oai::CreateChatCompletionRequest,
    raw: &Value,
    actual_model: &str,
    with_web_search: bool,
    stream: bool,
) -> Result<Value, GatewayError> {
    let mut preamble = Vec::new();
    let mut history = Vec::new();
    for message in &chat.messages {
        if let Some(text) = system_text(message) {
            preamble.push(text);
            continue;
        }
        let (role, text) = match message {
            oai::ChatCompletionRequestMessage::User(m) => ("USER", user_text(&m.content)),
            oai::ChatCompletionRequestMessage::Assistant(m) => ("CHATBOT", assistant_text(&m.content)),
            _ => continue,
        };
        history.push(json!({ "role": role, "message": text }));
    }

    let last_user = history
        .iter()
        .rposition(|m| m["role"] == "USER")
        .ok_or_else(|| GatewayError::BadRequest("messages must contain a user message".into()))?;
    let last = history.remove(last_user);

    let mut body = Map::new();
    body.insert("model".into(), json!(actual_model));
    body.insert("message".into(), last["message"].clone());
    body.insert("chat_history".into(), Value::Array(history));
    body.insert("stream".into(), json!(stream));
    if !preamble.is_empty() {
        body.insert("preamble".into(), json!(preamble.join("\n")));
    }
    #[allow(deprecated)]
    let max_tokens = chat.max_completion_tokens.or(chat.max_tokens);
    if let Some(n) = max_tokens {
        body.insert("max_tokens".into(), json!(n));
    }
    if let Some(t) = chat.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(p) = chat.top_p {
        body.insert("p".into(), json!(p));
    }
    for (from, to) in [
        ("frequency_penalty", "frequency_penalty"),
        ("presence_penalty", "presence_penalty"),
        ("seed", "seed"),
    ] {
        if let Some(v) = raw.get(from).filter(|v| !v.is_null()) {
            body.insert(to.into(), v.clone());
        }
    }
    match raw.get("stop") {
        Some(Value::String(s)) => {
            body.insert("stop_sequences".into(), json!([s]));
        }
        Some(Value::Array(items)) => {
            body.insert("stop_sequences".into(), Value::Array(items.clone()));
        }
        _ => {}
    }
    if with_web_search {
        body.insert("connectors".into(), json!([{ "id": "web-search" }]));
    }
    Ok(Value::Object(body))
}

fn finish_reason(reason: Option<&str>) -> Value {
    match reason {
        None => Value::Null,
        Some("COMPLETE") => json!("stop"),
        Some("MAX_TOKENS") => json!("length"),
        Some(other) => json!(other.to_lowercase()),
    }
}

fn billed_usage(v: &Value) -> Option<Usage> {
    let billed = v.pointer("/meta/billed_units").filter(|b| b.is_object())?;
    let field = |k: &str| billed.get(k).and_then(Value::as_f64).unwrap_or(0.0) as u32;
    Some(Usage {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
        ..Default::default()
    })
}

fn openai_usage(usage: &Usage) -> Value {
    json!({
        "prompt_tokens": usage.input_tokens,
        "completion_tokens": usage.output_tokens,
        "total_tokens": usage.input_tokens + usage.output_tokens,
    })
}

fn completion_id(meta: &RequestMeta, upstream_id: Option<&str>) -> String {
    format!("chatcmpl-{}", upstream_id.unwrap_or(&meta.request_id))
}

fn parse_json(meta: &RequestMeta, body: &[u8]) -> Result<RelayOutcome, GatewayError> {
    let v: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::UpstreamProtocol(format!("invalid cohere response: {}", e)))?;
    let text = v
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::UpstreamProtocol("cohere response has no text".into()))?
        .to_string();
    let usage = billed_usage(&v);

    let mut out = json!({
        "id": completion_id(meta, v.get("response_id").and_then(Value::as_str)),
        "object": "chat.completion",
        "created": meta.started_at.timestamp(),
        "model": meta.origin_model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason(v.get("finish_reason").and_then(Value::as_str)),
        }],
    });
    if let Some(u) = &usage {
        out["usage"] = openai_usage(u);
    }

    let body = serde_json::to_vec(&out).map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(RelayOutcome {
        content_type: "application/json".to_string(),
        body: Bytes::from(body),
        usage,
        completion_text: text,
    })
}

fn sse_chunk(out: &mut String, chunk: &Value) {
    out.push_str("data: ");
    out.push_str(&chunk.to_string());
    out.push_str("\n\n");
}

/// Cohere 的 NDJSON 事件流 → OpenAI chunk 形式的 SSE
fn parse_stream(meta: &RequestMeta, body: &[u8]) -> Result<RelayOutcome, GatewayError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| GatewayError::UpstreamProtocol(format!("cohere stream is not utf-8: {}", e)))?;
    let id = completion_id(meta, None);
    let created = meta.started_at.timestamp();
    let chunk = |delta: Value, finish: Value| {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": meta.origin_model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish }],
        })
    };

    let mut sse = String::new();
    let mut completion_text = String::new();
    let mut usage = None;
    let mut finished = false;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: Value = serde_json::from_str(line)
            .map_err(|e| GatewayError::UpstreamProtocol(format!("invalid cohere event: {}", e)))?;
        match event.get("event_type").and_then(Value::as_str) {
            Some("text-generation") => {
                let piece = event.get("text").and_then(Value::as_str).unwrap_or_default();
                completion_text.push_str(piece);
                sse_chunk(&mut sse, &chunk(json!({ "content": piece }), Value::Null));
            }
            Some("stream-end") => {
                usage = event.get("response").and_then(billed_usage);
                let mut last = chunk(
                    json!({}),
                    finish_reason(event.get("finish_reason").and_then(Value::as_str)),
                );
                if let Some(u) = &usage {
                    last["usage"] = openai_usage(u);
                }
                sse_chunk(&mut sse, &last);
                finished = true;
            }
            _ => {}
        }
    }

    if !finished {
        return Err(GatewayError::UpstreamProtocol(
            "cohere stream ended without stream-end".into(),
        ));
    }
    sse.push_str("data: [DONE]\n\n");
    Ok(RelayOutcome {
        content_type: SSE_CONTENT_TYPE.to_string(),
        body: Bytes::from(sse),
        usage,
        completion_text,
    })
}

#[async_trait]
impl Adaptor for CohereAdaptor {
    fn channel_type(&self) -> &'static str {
        "cohere"
    }

    fn model_list(&self) -> Vec<ModelConfig> {
        constant::model_list()
    }

    fn normalize_model(&self, requested: &str) -> Result<String, GatewayError> {
        let base = requested.strip_suffix(INTERNET_SUFFIX).unwrap_or(requested);
        if constant::MODELS.contains(&base) {
            Ok(base.to_string())
        } else {
            Err(GatewayError::InvalidModelName(requested.to_string()))
        }
    }

    fn build_upstream_request(
        &self,
        meta: &RequestMeta,
        request: &RelayRequest,
    ) -> Result<UpstreamRequest, GatewayError> {
        let chat = match (meta.mode, request.chat.as_ref()) {
            (RelayMode::ChatCompletions, Some(chat)) => chat,
            _ => {
                return Err(GatewayError::BadRequest(format!(
                    "{} is not supported by cohere channels",
                    meta.mode
                )));
            }
        };
        let with_web_search = meta.model_config.model.ends_with(INTERNET_SUFFIX);
        let body = convert_request(
            chat,
            &request.body,
            &meta.actual_model,
            with_web_search,
            request.stream,
        )?;
        json_request(&meta.channel, CHAT_PATH, &body)
    }

    fn parse_upstream_response(
        &self,
        meta: &RequestMeta,
        response: UpstreamResponse,
    ) -> Result<RelayOutcome, GatewayError> {
        if meta.stream {
            parse_stream(meta, &response.body)
        } else {
            parse_json(meta, &response.body)
        }
    }
}
