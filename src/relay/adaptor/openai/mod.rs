pub mod constant;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use super::{Adaptor, RelayOutcome, Usage};
use crate::error::GatewayError;
use crate::model::{Channel, ModelConfig};
use crate::relay::meta::RequestMeta;
use crate::relay::mode::RelayMode;
use crate::relay::request::RelayRequest;
use crate::relay::transport::{UpstreamRequest, UpstreamResponse};

pub const SSE_CONTENT_TYPE: &str = "text/event-stream";
const JSON_CONTENT_TYPE: &str = "application/json";

/// OpenAI 官方接口及兼容实现
pub struct OpenAIAdaptor;

pub(crate) fn bearer_headers(channel: &Channel) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    let auth = HeaderValue::from_str(&format!("Bearer {}", channel.api_key)).map_err(|_| {
        GatewayError::Internal(format!("channel {} has an invalid api key", channel.name))
    })?;
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    Ok(headers)
}

pub(crate) fn json_request(
    channel: &Channel,
    path: &str,
    body: &Value,
) -> Result<UpstreamRequest, GatewayError> {
    let body = serde_json::to_vec(body).map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(UpstreamRequest {
        method: reqwest::Method::POST,
        url: channel.endpoint(path),
        headers: bearer_headers(channel)?,
        body: Bytes::from(body),
    })
}

/// chat 请求体：替换模型名，流式时要求上游在末尾附带 usage
pub(crate) fn chat_body(request: &RelayRequest, actual_model: &str) -> Value {
    let mut body = request.body_with_model(actual_model);
    if request.stream
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert("stream_options".into(), json!({ "include_usage": true }));
    }
    body
}

fn protocol_error(what: &str, e: impl std::fmt::Display) -> GatewayError {
    GatewayError::UpstreamProtocol(format!("{}: {}", what, e))
}

/// 从 OpenAI 形状的 `usage` 字段取用量
pub(crate) fn usage_from_value(v: &Value) -> Option<Usage> {
    let u = v.get("usage").filter(|u| u.is_object())?;
    // 超出 u32 的计数按饱和处理
    let field = |ptr: &str| {
        u.pointer(ptr)
            .and_then(Value::as_u64)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0)
    };
    Some(Usage {
        input_tokens: field("/prompt_tokens"),
        output_tokens: field("/completion_tokens"),
        cached_tokens: field("/prompt_tokens_details/cached_tokens"),
        cache_creation_tokens: 0,
    })
}

fn collect_choice_text(v: &Value, key: &str, out: &mut String) {
    if let Some(choices) = v.get("choices").and_then(Value::as_array) {
        for choice in choices {
            if let Some(text) = choice.pointer(key).and_then(Value::as_str) {
                out.push_str(text);
            }
        }
    }
}

/// 非流式 chat 响应
pub(crate) fn parse_chat_json(body: Bytes) -> Result<RelayOutcome, GatewayError> {
    let v: Value =
        serde_json::from_slice(&body).map_err(|e| protocol_error("invalid chat response", e))?;
    if v.get("choices").and_then(Value::as_array).is_none() {
        return Err(GatewayError::UpstreamProtocol(
            "chat response has no choices".into(),
        ));
    }
    let mut completion_text = String::new();
    collect_choice_text(&v, "/message/content", &mut completion_text);
    Ok(RelayOutcome {
        content_type: JSON_CONTENT_TYPE.to_string(),
        usage: usage_from_value(&v),
        completion_text,
        body,
    })
}

/// 缓冲读取完毕的 SSE 流：逐条校验 JSON，收集增量文本和末尾的 usage
pub(crate) fn parse_chat_sse(body: Bytes) -> Result<RelayOutcome, GatewayError> {
    let text =
        std::str::from_utf8(&body).map_err(|e| protocol_error("event stream is not utf-8", e))?;
    let mut usage = None;
    let mut completion_text = String::new();
    let mut events = 0usize;

    for line in text.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        events += 1;
        if data == "[DONE]" {
            break;
        }
        let v: Value =
            serde_json::from_str(data).map_err(|e| protocol_error("invalid stream chunk", e))?;
        if let Some(u) = usage_from_value(&v) {
            usage = Some(u);
        }
        collect_choice_text(&v, "/delta/content", &mut completion_text);
    }

    if events == 0 {
        return Err(GatewayError::UpstreamProtocol("empty event stream".into()));
    }
    Ok(RelayOutcome {
        content_type: SSE_CONTENT_TYPE.to_string(),
        body,
        usage,
        completion_text,
    })
}

fn parse_embeddings(body: Bytes) -> Result<RelayOutcome, GatewayError> {
    let v: Value = serde_json::from_slice(&body)
        .map_err(|e| protocol_error("invalid embeddings response", e))?;
    if v.get("data").and_then(Value::as_array).is_none() {
        return Err(GatewayError::UpstreamProtocol(
            "embeddings response has no data".into(),
        ));
    }
    Ok(RelayOutcome {
        content_type: JSON_CONTENT_TYPE.to_string(),
        usage: usage_from_value(&v).map(|u| Usage {
            output_tokens: 0,
            ..u
        }),
        completion_text: String::new(),
        body,
    })
}

fn parse_speech(meta: &RequestMeta, response: UpstreamResponse) -> Result<RelayOutcome, GatewayError> {
    if response.body.is_empty() {
        return Err(GatewayError::UpstreamProtocol("empty audio response".into()));
    }
    // TTS 按输入字符计费，上游不回报用量
    Ok(RelayOutcome {
        content_type: response
            .content_type
            .unwrap_or_else(|| "audio/mpeg".to_string()),
        body: response.body,
        usage: Some(Usage {
            input_tokens: meta.input_tokens,
            ..Default::default()
        }),
        completion_text: String::new(),
    })
}

#[async_trait::async_trait]
impl Adaptor for OpenAIAdaptor {
    fn channel_type(&self) -> &'static str {
        "openai"
    }

    fn model_list(&self) -> Vec<ModelConfig> {
        constant::model_list()
    }

    fn normalize_model(&self, requested: &str) -> Result<String, GatewayError> {
        let name = requested.trim();
        if name.is_empty() {
            return Err(GatewayError::InvalidModelName(requested.to_string()));
        }
        Ok(name.to_string())
    }

    fn build_upstream_request(
        &self,
        meta: &RequestMeta,
        request: &RelayRequest,
    ) -> Result<UpstreamRequest, GatewayError> {
        let body = match meta.mode {
            RelayMode::ChatCompletions => chat_body(request, &meta.actual_model),
            RelayMode::Embeddings | RelayMode::AudioSpeech => {
                request.body_with_model(&meta.actual_model)
            }
        };
        json_request(&meta.channel, meta.mode.path(), &body)
    }

    fn parse_upstream_response(
        &self,
        meta: &RequestMeta,
        response: UpstreamResponse,
    ) -> Result<RelayOutcome, GatewayError> {
        match meta.mode {
            RelayMode::ChatCompletions => {
                let is_sse = response
                    .content_type
                    .as_deref()
                    .is_some_and(|ct| ct.starts_with(SSE_CONTENT_TYPE));
                if is_sse {
                    parse_chat_sse(response.body)
                } else {
                    parse_chat_json(response.body)
                }
            }
            RelayMode::Embeddings => parse_embeddings(response.body),
            RelayMode::AudioSpeech => parse_speech(meta, response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::adaptor::Adaptor;
    use crate::test_utils::{meta_for, should_skip_httpmock, test_channel};
    use httpmock::prelude::*;

    fn chat_request(stream: bool) -> RelayRequest {
        let raw = json!({
            "model": "gpt-4o-mini",
            "stream": stream,
            "messages": [{"role": "user", "content": "hi"}]
        });
        RelayRequest::parse(RelayMode::ChatCompletions, raw.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn stream_requests_ask_for_usage() {
        let meta = meta_for(test_channel("openai", "http://up"), "gpt-4o-mini", RelayMode::ChatCompletions);
        let up = OpenAIAdaptor
            .build_upstream_request(&meta, &chat_request(true))
            .unwrap();
        assert_eq!(up.url, "http://up/v1/chat/completions");
        assert_eq!(up.headers[AUTHORIZATION], "Bearer sk-test-key");
        let body: Value = serde_json::from_slice(&up.body).unwrap();
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["model"], "gpt-4o-mini");

        let plain = OpenAIAdaptor
            .build_upstream_request(&meta, &chat_request(false))
            .unwrap();
        let body: Value = serde_json::from_slice(&plain.body).unwrap();
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn oversized_usage_counts_saturate() {
        let body = json!({
            "usage": {"prompt_tokens": 4_294_967_296u64 + 7, "completion_tokens": 5}
        });
        let usage = usage_from_value(&body).unwrap();
        assert_eq!(usage.input_tokens, u32::MAX);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cached_tokens, 0);
    }

    #[test]
    fn parses_chat_json_usage() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15,
                      "prompt_tokens_details": {"cached_tokens": 4}}
        });
        let out = parse_chat_json(Bytes::from(body.to_string())).unwrap();
        assert_eq!(
            out.usage,
            Some(Usage {
                input_tokens: 12,
                output_tokens: 3,
                cached_tokens: 4,
                cache_creation_tokens: 0
            })
        );
        assert_eq!(out.completion_text, "hello");
        assert!(matches!(
            parse_chat_json(Bytes::from_static(b"<html>")),
            Err(GatewayError::UpstreamProtocol(_))
        ));
    }

    #[test]
    fn parses_buffered_sse() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n"
        );
        let out = parse_chat_sse(Bytes::from_static(sse.as_bytes())).unwrap();
        assert_eq!(out.completion_text, "hello");
        assert_eq!(out.usage.unwrap().output_tokens, 2);
        assert_eq!(out.content_type, SSE_CONTENT_TYPE);

        assert!(parse_chat_sse(Bytes::from_static(b"data: {broken\n\n")).is_err());
        assert!(parse_chat_sse(Bytes::from_static(b"")).is_err());
    }

    #[test]
    fn speech_bills_counted_input() {
        let mut meta = meta_for(test_channel("openai", "http://up"), "tts-1", RelayMode::AudioSpeech);
        meta.input_tokens = 11;
        let out = OpenAIAdaptor
            .parse_upstream_response(
                &meta,
                UpstreamResponse {
                    status: 200,
                    content_type: Some("audio/mpeg".into()),
                    body: Bytes::from_static(b"ID3..."),
                },
            )
            .unwrap();
        assert_eq!(out.usage.unwrap().input_tokens, 11);
        assert_eq!(out.content_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn round_trip_against_mock_upstream() {
        if should_skip_httpmock() {
            return;
        }
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer sk-test-key");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"data":[{"embedding":[0.1]}],"usage":{"prompt_tokens":3,"total_tokens":3}}"#);
            })
            .await;

        let meta = meta_for(
            test_channel("openai", &server.base_url()),
            "text-embedding-3-small",
            RelayMode::Embeddings,
        );
        let req = RelayRequest::parse(
            RelayMode::Embeddings,
            br#"{"model":"text-embedding-3-small","input":"abc"}"#,
        )
        .unwrap();
        let up = OpenAIAdaptor.build_upstream_request(&meta, &req).unwrap();
        let resp = OpenAIAdaptor
            .do_request(&reqwest::Client::new(), &meta, up)
            .await
            .unwrap();
        let out = OpenAIAdaptor.parse_upstream_response(&meta, resp).unwrap();
        mock.assert_async().await;
        assert_eq!(out.usage.unwrap().input_tokens, 3);
    }
}
