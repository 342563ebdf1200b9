//! Prepend the Claude Code identity to the system prompt for OAuth
//! requests headed to an Anthropic-family upstream.
//!
//! Eligibility is the guard's job, and detection is universal: any
//! Bearer token bound for an Anthropic-wire-protocol host (anthropic.com,
//! z.ai) gets the identity, regardless of token format.

use std::sync::Arc;

use ccproxy_common::apply_identity_prefix;
use tracing::info;

use crate::context::Context;
use crate::guards::needs_identity_injection;
use crate::hook::{HookArgs, HookResult, HookSpec};

pub fn spec() -> HookSpec {
    HookSpec::new("inject_claude_code_identity", Arc::new(handler))
        .with_guard(Arc::new(needs_identity_injection))
        .with_reads([
            "authorization",
            "ccproxy_litellm_model",
            "ccproxy_model_config",
            "system",
        ])
        .with_writes(["system"])
}

fn handler(mut ctx: Context, _args: &HookArgs<'_>) -> HookResult {
    let (system, changed) = apply_identity_prefix(ctx.system.take());
    ctx.system = Some(system);
    if changed {
        info!(model = %ctx.litellm_model(), "injected claude code identity");
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccproxy_common::CLAUDE_CODE_SYSTEM_PREFIX;
    use crate::test_support::{empty_services, request};
    use serde_json::json;

    fn run(data: serde_json::Value) -> Context {
        let services = empty_services();
        let ctx = Context::from_data(request(data));
        let args = HookArgs {
            params: &serde_json::Map::new(),
            services: &services,
            auth: None,
        };
        handler(ctx, &args).unwrap()
    }

    fn oauth_request(system: Option<serde_json::Value>) -> serde_json::Value {
        let mut data = json!({
            "model": "claude-sonnet-4-5",
            "metadata": {
                "ccproxy_litellm_model": "claude-sonnet-4-5",
                "ccproxy_model_config": {"litellm_params": {"api_base": "https://api.anthropic.com"}}
            },
            "secret_fields": {"raw_headers": {"authorization": "Bearer sk-ant-oat01-x"}}
        });
        if let Some(system) = system {
            data["system"] = system;
        }
        data
    }

    #[test]
    fn missing_system_becomes_identity() {
        let out = run(oauth_request(None));
        assert_eq!(out.system, Some(json!(CLAUDE_CODE_SYSTEM_PREFIX)));
    }

    #[test]
    fn string_system_is_prefixed() {
        let out = run(oauth_request(Some(json!("be terse"))));
        let text = out.system.unwrap();
        assert!(text.as_str().unwrap().starts_with(CLAUDE_CODE_SYSTEM_PREFIX));
    }

    #[test]
    fn block_system_gets_prefix_block() {
        let out = run(oauth_request(Some(json!([{"type": "text", "text": "t"}]))));
        let blocks = out.system.unwrap();
        assert_eq!(blocks[0]["text"], CLAUDE_CODE_SYSTEM_PREFIX);
    }

    #[test]
    fn zai_oauth_request_gets_identity() {
        // Non-Anthropic token format, z.ai upstream: still eligible.
        let spec = spec();
        let data = json!({
            "model": "glm-4.7",
            "metadata": {
                "ccproxy_litellm_model": "glm-4.7",
                "ccproxy_model_config": {"litellm_params": {"api_base": "https://api.z.ai/api/anthropic"}}
            },
            "secret_fields": {"raw_headers": {"authorization": "Bearer zai-token-xyz"}}
        });
        let ctx = Context::from_data(request(data));
        assert!(spec.should_run(&ctx));

        let services = empty_services();
        let args = HookArgs {
            params: &serde_json::Map::new(),
            services: &services,
            auth: None,
        };
        let injected = handler(ctx, &args).unwrap();
        assert_eq!(injected.system, Some(json!(CLAUDE_CODE_SYSTEM_PREFIX)));
    }

    #[test]
    fn guard_requires_oauth_and_anthropic_family() {
        let spec = spec();
        let oauth = Context::from_data(request(oauth_request(None)));
        assert!(spec.should_run(&oauth));

        // x-api-key auth: no bearer, guard holds it back.
        let api_key_only = Context::from_data(request(json!({
            "model": "claude-sonnet-4-5",
            "metadata": {
                "ccproxy_litellm_model": "claude-sonnet-4-5",
                "ccproxy_model_config": {"litellm_params": {"api_base": "https://api.anthropic.com"}}
            },
            "secret_fields": {"raw_headers": {"x-api-key": "sk-ant-api03-k"}}
        })));
        assert!(!spec.should_run(&api_key_only));

        // Bearer to a non-family upstream.
        let openai = Context::from_data(request(json!({
            "model": "gpt-4o",
            "metadata": {
                "ccproxy_litellm_model": "gpt-4o",
                "ccproxy_model_config": {"litellm_params": {"api_base": "https://api.openai.com/v1"}}
            },
            "secret_fields": {"raw_headers": {"authorization": "Bearer sk-proj-x"}}
        })));
        assert!(!spec.should_run(&openai));

        let bare = Context::from_data(request(json!({"model": "m"})));
        assert!(!spec.should_run(&bare));
    }
}
