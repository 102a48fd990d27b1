use std::collections::HashSet;

use crate::error::GatewayError;
use crate::model::TokenCache;

const MODEL_LIST_MAX_LEN: usize = 200;
const MODEL_ITEM_MAX_LEN: usize = 128;

/// 规范化令牌的模型白名单：去空白、去重，拒绝空串和控制字符
pub fn normalize_model_list(field: &str, list: &[String]) -> Result<Vec<String>, GatewayError> {
    if list.len() > MODEL_LIST_MAX_LEN {
        return Err(GatewayError::BadRequest(format!(
            "{} 数量不能超过 {}",
            field, MODEL_LIST_MAX_LEN
        )));
    }
    let mut seen = HashSet::<&str>::new();
    let mut out = Vec::new();
    for raw in list {
        let s = raw.trim();
        if s.is_empty() {
            return Err(GatewayError::BadRequest(format!("{} 不能包含空字符串", field)));
        }
        if s.chars().any(|c| c.is_control()) {
            return Err(GatewayError::BadRequest(format!("{} 不能包含控制字符", field)));
        }
        if s.chars().count() > MODEL_ITEM_MAX_LEN {
            return Err(GatewayError::BadRequest(format!(
                "{} 单条长度不能超过 {}",
                field, MODEL_ITEM_MAX_LEN
            )));
        }
        if seen.insert(s) {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

/// 令牌已按当前启用模型收窄后调用
pub fn enforce_model_allowed_for_token(
    token: &TokenCache,
    model: &str,
) -> Result<(), GatewayError> {
    if !token.allows_model(model) {
        return Err(GatewayError::Forbidden(format!(
            "model '{}' is not allowed for token",
            model
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelCaches, ModelConfig};
    use crate::relay::mode::RelayMode;
    use crate::test_utils::test_token;

    #[test]
    fn normalize_model_list_trims_dedups_and_rejects_empty() {
        let out = normalize_model_list("models", &["  a  ".into(), "a".into(), "b".into()]).unwrap();
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);

        let err = normalize_model_list("models", &["".into()]).unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
        assert!(normalize_model_list("models", &["a\u{7}".into()]).is_err());
    }

    #[test]
    fn narrowed_allow_list_is_enforced() {
        let caches = ModelCaches::build(
            vec![
                ModelConfig::new("gpt-4", "openai", RelayMode::ChatCompletions),
                ModelConfig::new("gpt-3.5", "openai", RelayMode::ChatCompletions),
            ],
            vec![],
        );
        let mut t = test_token("k", "g1", &["gpt-4", "retired"]);
        t.narrow_models(&caches);
        assert_eq!(t.models, vec!["gpt-4".to_string()]);
        enforce_model_allowed_for_token(&t, "gpt-4").unwrap();
        let err = enforce_model_allowed_for_token(&t, "gpt-3.5").unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden(_)));
    }
}
