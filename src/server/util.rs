use axum::http::HeaderMap;

// Authorization 头原文
pub fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// 去掉 "Bearer " 与 "sk-" 前缀，得到存储中的 key
pub fn normalize_key(raw: &str) -> &str {
    let key = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    key.strip_prefix("sk-").unwrap_or(key)
}

// 日志中的 key 只保留首尾 4 位
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*****{}", head, tail)
}
