//! Shared guard predicates for the built-in hooks.
//!
//! Detection goes by header presence rather than token format, so any
//! OAuth provider behind an Anthropic-compatible surface works.

use serde_json::Value;

use crate::context::Context;
use crate::hooks::OAUTH_SENTINEL_PREFIX;

/// Hosts that speak Anthropic's wire protocol.
pub(crate) const ANTHROPIC_FAMILY_HOSTS: &[&str] = &["anthropic.com", "z.ai"];

pub fn is_oauth_request(ctx: &Context) -> bool {
    ctx.authorization().to_ascii_lowercase().starts_with("bearer ")
}

pub fn is_sentinel_key(ctx: &Context) -> bool {
    let auth = ctx.authorization();
    auth.strip_prefix("Bearer ")
        .map(str::trim)
        .is_some_and(|token| token.starts_with(OAUTH_SENTINEL_PREFIX))
}

pub fn has_model_routing(ctx: &Context) -> bool {
    !ctx.litellm_model().is_empty()
}

pub fn has_model_config(ctx: &Context) -> bool {
    ctx.model_config().is_some_and(|config| !config.is_empty())
}

pub fn model_config_api_base(ctx: &Context) -> Option<String> {
    ctx.model_config()
        .and_then(|config| config.get("litellm_params"))
        .and_then(Value::as_object)
        .and_then(|params| params.get("api_base"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn model_config_api_key(ctx: &Context) -> Option<String> {
    ctx.model_config()
        .and_then(|config| config.get("litellm_params"))
        .and_then(Value::as_object)
        .and_then(|params| params.get("api_key"))
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

pub fn model_config_custom_provider(ctx: &Context) -> Option<String> {
    ctx.model_config()
        .and_then(|config| config.get("litellm_params"))
        .and_then(Value::as_object)
        .and_then(|params| params.get("custom_llm_provider"))
        .and_then(Value::as_str)
        .filter(|provider| !provider.is_empty())
        .map(str::to_string)
}

pub fn routes_to_anthropic_provider(ctx: &Context) -> bool {
    let Some(api_base) = model_config_api_base(ctx) else {
        return false;
    };
    let api_base = api_base.to_ascii_lowercase();
    ANTHROPIC_FAMILY_HOSTS.iter().any(|host| api_base.contains(host))
}

pub fn routes_to_claude_model(ctx: &Context) -> bool {
    ctx.litellm_model().to_ascii_lowercase().contains("claude")
}

pub fn is_health_check(ctx: &Context) -> bool {
    ctx.is_health_check()
}

pub fn needs_beta_headers(ctx: &Context) -> bool {
    has_model_config(ctx) && routes_to_anthropic_provider(ctx)
}

pub fn needs_identity_injection(ctx: &Context) -> bool {
    is_oauth_request(ctx) && routes_to_anthropic_provider(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::request;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> Context {
        Context::from_data(request(value))
    }

    #[test]
    fn oauth_detection_by_bearer_header() {
        let with = ctx(json!({
            "secret_fields": {"raw_headers": {"authorization": "Bearer sk-ant-oat01-x"}}
        }));
        assert!(is_oauth_request(&with));
        let without = ctx(json!({
            "secret_fields": {"raw_headers": {"x-api-key": "sk-ant-api03-x"}}
        }));
        assert!(!is_oauth_request(&without));
    }

    #[test]
    fn sentinel_detection() {
        let sentinel = ctx(json!({
            "secret_fields": {"raw_headers": {"authorization": "Bearer sk-ant-REDACTED"}}
        }));
        assert!(is_sentinel_key(&sentinel));
        let plain = ctx(json!({
            "secret_fields": {"raw_headers": {"authorization": "Bearer sk-ant-oat01-x"}}
        }));
        assert!(!is_sentinel_key(&plain));
    }

    #[test]
    fn anthropic_family_covers_zai() {
        let zai = ctx(json!({
            "metadata": {"ccproxy_model_config": {"litellm_params": {"api_base": "https://api.z.ai/api/anthropic"}}}
        }));
        assert!(routes_to_anthropic_provider(&zai));
        let openai = ctx(json!({
            "metadata": {"ccproxy_model_config": {"litellm_params": {"api_base": "https://api.openai.com/v1"}}}
        }));
        assert!(!routes_to_anthropic_provider(&openai));
        let none = ctx(json!({}));
        assert!(!routes_to_anthropic_provider(&none));
    }

    #[test]
    fn model_config_extractors() {
        let c = ctx(json!({
            "metadata": {"ccproxy_model_config": {"litellm_params": {
                "api_base": "https://api.anthropic.com",
                "api_key": "sk-ant-api03-k",
                "custom_llm_provider": "anthropic"
            }}}
        }));
        assert_eq!(model_config_api_base(&c).as_deref(), Some("https://api.anthropic.com"));
        assert_eq!(model_config_api_key(&c).as_deref(), Some("sk-ant-api03-k"));
        assert_eq!(model_config_custom_provider(&c).as_deref(), Some("anthropic"));
    }
}
