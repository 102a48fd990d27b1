use serde_json::Value;
use tiktoken_rs::{CoreBPE, tokenizer};

/// 按模型名选择 BPE；未知模型回落到 cl100k
fn bpe_for_model(model: &str) -> &'static CoreBPE {
    match tokenizer::get_tokenizer(model).unwrap_or(tokenizer::Tokenizer::Cl100kBase) {
        tokenizer::Tokenizer::O200kHarmony => tiktoken_rs::o200k_harmony_singleton(),
        tokenizer::Tokenizer::O200kBase => tiktoken_rs::o200k_base_singleton(),
        tokenizer::Tokenizer::P50kBase => tiktoken_rs::p50k_base_singleton(),
        tokenizer::Tokenizer::P50kEdit => tiktoken_rs::p50k_edit_singleton(),
        tokenizer::Tokenizer::R50kBase | tokenizer::Tokenizer::Gpt2 => {
            tiktoken_rs::r50k_base_singleton()
        }
        tokenizer::Tokenizer::Cl100kBase => tiktoken_rs::cl100k_base_singleton(),
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub fn count_text(model: &str, text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    saturating_u32(bpe_for_model(model).encode_with_special_tokens(text).len())
}

fn content_tokens(bpe: &CoreBPE, content: &Value) -> usize {
    match content {
        Value::String(s) => bpe.encode_with_special_tokens(s).len(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| match p {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) if o.get("type").and_then(Value::as_str) == Some("text") => {
                    o.get("text").and_then(Value::as_str)
                }
                _ => None,
            })
            .map(|s| bpe.encode_with_special_tokens(s).len())
            .sum(),
        _ => 0,
    }
}

/// chat 请求的输入 token：每条消息固定开销 + role/content/name，再加回复引导的 3 个 token
pub fn count_chat_input(model: &str, request: &Value) -> u32 {
    let bpe = bpe_for_model(model);
    let Some(messages) = request.get("messages").and_then(Value::as_array) else {
        return 0;
    };
    let (per_message, per_name): (i64, i64) = if model.starts_with("gpt-3.5") {
        (4, -1)
    } else {
        (3, 1)
    };

    let mut total: i64 = 3;
    for message in messages {
        total += per_message;
        if let Some(role) = message.get("role").and_then(Value::as_str) {
            total += bpe.encode_with_special_tokens(role).len() as i64;
        }
        if let Some(content) = message.get("content") {
            total += content_tokens(bpe, content) as i64;
        }
        if let Some(name) = message.get("name").and_then(Value::as_str) {
            total += bpe.encode_with_special_tokens(name).len() as i64 + per_name;
        }
    }
    // 工具定义同样计入输入
    for field in ["tools", "functions", "tool_choice", "response_format"] {
        if let Some(v) = request.get(field).filter(|v| !v.is_null()) {
            total += bpe.encode_with_special_tokens(&v.to_string()).len() as i64;
        }
    }
    u32::try_from(total.max(0)).unwrap_or(u32::MAX)
}

/// embeddings 的 input 可以是字符串、字符串数组或已分词的整数数组
pub fn count_embedding_input(model: &str, input: &Value) -> u32 {
    let bpe = bpe_for_model(model);
    let n = match input {
        Value::String(s) => bpe.encode_with_special_tokens(s).len(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => bpe.encode_with_special_tokens(s).len(),
                Value::Number(_) => 1,
                Value::Array(ids) => ids.len(),
                _ => 0,
            })
            .sum(),
        _ => 0,
    };
    saturating_u32(n)
}
