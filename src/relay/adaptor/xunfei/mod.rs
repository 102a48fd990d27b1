use async_trait::async_trait;

use super::openai::{chat_body, json_request, parse_chat_json, parse_chat_sse, SSE_CONTENT_TYPE};
use super::{Adaptor, RelayOutcome};
use crate::error::GatewayError;
use crate::model::ModelConfig;
use crate::relay::meta::RequestMeta;
use crate::relay::mode::RelayMode;
use crate::relay::request::RelayRequest;
use crate::relay::transport::{UpstreamRequest, UpstreamResponse};

const OWNER: &str = "xunfei";

const MODELS: &[&str] = &[
    "spark-lite",
    "spark-pro",
    "spark-pro-128k",
    "spark-max",
    "spark-max-32k",
    "spark-4.0-ultra",
];

/// 上游直接接受的 domain
const DIRECT_DOMAINS: &[&str] = &["lite", "generalv3", "pro-128k", "generalv3.5", "max-32k", "4.0ultra"];

/// 讯飞星火，OpenAI 兼容的 HTTP 接口，model 字段填 domain
pub struct XunfeiAdaptor;

/// `spark-xxx` 形式的名字映射为星火 domain；已是 domain 的原样返回
pub fn spark_domain(model: &str) -> Result<String, GatewayError> {
    let lower = model.to_ascii_lowercase();
    if DIRECT_DOMAINS.contains(&lower.as_str()) {
        return Ok(model.to_string());
    }

    let invalid = || GatewayError::InvalidModelName(model.to_string());
    let (_, suffix) = lower.split_once('-').ok_or_else(invalid)?;
    let domain = match suffix {
        "lite" => "lite",
        "pro" => "generalv3",
        "pro-128k" => "pro-128k",
        "max" => "generalv3.5",
        "max-32k" => "max-32k",
        "4.0-ultra" => "4.0Ultra",
        _ => return Err(invalid()),
    };
    Ok(domain.to_string())
}

#[async_trait]
impl Adaptor for XunfeiAdaptor {
    fn channel_type(&self) -> &'static str {
        "xunfei"
    }

    fn model_list(&self) -> Vec<ModelConfig> {
        MODELS
            .iter()
            .map(|m| ModelConfig::new(*m, OWNER, RelayMode::ChatCompletions))
            .collect()
    }

    fn normalize_model(&self, requested: &str) -> Result<String, GatewayError> {
        spark_domain(requested)
    }

    fn build_upstream_request(
        &self,
        meta: &RequestMeta,
        request: &RelayRequest,
    ) -> Result<UpstreamRequest, GatewayError> {
        if meta.mode != RelayMode::ChatCompletions {
            return Err(GatewayError::BadRequest(format!(
                "{} is not supported by xunfei channels",
                meta.mode
            )));
        }
        json_request(
            &meta.channel,
            meta.mode.path(),
            &chat_body(request, &meta.actual_model),
        )
    }

    fn parse_upstream_response(
        &self,
        _meta: &RequestMeta,
        response: UpstreamResponse,
    ) -> Result<RelayOutcome, GatewayError> {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{meta_for, test_channel};

    #[test]
    fn maps_spark_aliases_to_domains() {
        assert_eq!(spark_domain("spark-max-32k").unwrap(), "max-32k");
        assert_eq!(spark_domain("spark-pro").unwrap(), "generalv3");
        assert_eq!(spark_domain("Spark-Max").unwrap(), "generalv3.5");
        assert_eq!(spark_domain("spark-4.0-ultra").unwrap(), "4.0Ultra");
        // 已是 domain 的不做改写
        assert_eq!(spark_domain("generalv3.5").unwrap(), "generalv3.5");
        assert_eq!(spark_domain("4.0Ultra").unwrap(), "4.0Ultra");
    }

    #[test]
    fn rejects_unknown_names() {
        for name in ["spark-ultra-9000", "spark", "gpt-4o"] {
            assert!(matches!(
                spark_domain(name),
                Err(GatewayError::InvalidModelName(_))
            ));
        }
    }

    #[test]
    fn builtin_models_all_normalize() {
        for config in XunfeiAdaptor.model_list() {
            assert!(XunfeiAdaptor.normalize_model(&config.model).is_ok(), "{}", config.model);
        }
    }

    #[test]
    fn sends_domain_as_model() {
        let mut meta = meta_for(
            test_channel("xunfei", "https://spark.invalid/"),
            "spark-lite",
            RelayMode::ChatCompletions,
        );
        meta.actual_model = "lite".into();
        let req = RelayRequest::parse(
            RelayMode::ChatCompletions,
            br#"{"model":"spark-lite","messages":[{"role":"user","content":"hi"}]}"#,
        )
        .unwrap();
        let up = XunfeiAdaptor.build_upstream_request(&meta, &req).unwrap();
        assert_eq!(up.url, "https://spark.invalid/v1/chat/completions");
        let body: serde_json::Value = serde_json::from_slice(&up.body).unwrap();
        assert_eq!(body["model"], "lite");

        meta.mode = RelayMode::Embeddings;
        assert!(matches!(
            XunfeiAdaptor.build_upstream_request(&meta, &req),
            Err(GatewayError::BadRequest(_))
        ));
    }
}
