use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use std::time::Duration;

use crate::error::GatewayError;

const ERROR_BODY_PREVIEW: usize = 512;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// 发起一次上游调用并完整读取响应体；非 2xx 统一映射为 upstream_error
pub async fn send(
    client: &reqwest::Client,
    timeout: Duration,
    req: UpstreamRequest,
) -> Result<UpstreamResponse, GatewayError> {
    let resp = client
        .request(req.method, &req.url)
        .headers(req.headers)
        .timeout(timeout)
        .body(req.body)
        .send()
        .await?;

    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.bytes().await?;

    if !status.is_success() {
        return Err(GatewayError::UpstreamStatus {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    Ok(UpstreamResponse {
        status: status.as_u16(),
        content_type,
        body,
    })
}

/// 尽量从错误响应体中取出 message 字段
pub fn error_message(body: &[u8]) -> String {
    if let Ok(v) = serde_json::from_slice::<Value>(body) {
        let msg = v
            .pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str);
        if let Some(m) = msg {
            return m.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    text.chars().take(ERROR_BODY_PREVIEW).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn should_skip_httpmock() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_err()
    }

    fn request(url: String) -> UpstreamRequest {
        UpstreamRequest {
            method: reqwest::Method::POST,
            url,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{}"),
        }
    }

    #[test]
    fn extracts_nested_and_flat_messages() {
        assert_eq!(error_message(br#"{"error":{"message":"bad key"}}"#), "bad key");
        assert_eq!(error_message(br#"{"message":"quota"}"#), "quota");
        assert_eq!(error_message(b"plain failure"), "plain failure");
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        if should_skip_httpmock() {
            return;
        }
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503)
                    .header("content-type", "application/json")
                    .body(r#"{"error":{"message":"overloaded"}}"#);
            })
            .await;

        let client = reqwest::Client::new();
        let err = send(
            &client,
            Duration::from_secs(5),
            request(server.url("/v1/chat/completions")),
        )
        .await
        .unwrap_err();
        mock.assert_async().await;
        match err {
            GatewayError::UpstreamStatus { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_upstream_maps_to_timeout() {
        if should_skip_httpmock() {
            return;
        }
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/slow");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .body("{}");
            })
            .await;

        let client = reqwest::Client::new();
        let err = send(&client, Duration::from_millis(50), request(server.url("/slow")))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamTimeout(_)));
    }
}
