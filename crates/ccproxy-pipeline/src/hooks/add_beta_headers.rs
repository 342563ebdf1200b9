//! Add the anthropic-beta headers Claude Max OAuth tokens require.

use std::sync::Arc;

use ccproxy_common::{ANTHROPIC_VERSION, header_get, merge_beta_headers};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::context::Context;
use crate::guards::{
    model_config_api_base, model_config_api_key, model_config_custom_provider, needs_beta_headers,
};
use crate::hook::{HookArgs, HookResult, HookSpec};
use crate::hooks::{ANTHROPIC_BETA_HEADERS, anthropic_wire_provider};

pub fn spec() -> HookSpec {
    HookSpec::new("add_beta_headers", Arc::new(handler))
        .with_guard(Arc::new(needs_beta_headers))
        .with_reads(["ccproxy_litellm_model", "ccproxy_model_config"])
        .with_writes(["anthropic-beta", "anthropic-version", "extra_headers"])
}

fn handler(mut ctx: Context, _args: &HookArgs<'_>) -> HookResult {
    let routed_model = ctx.litellm_model().to_string();
    if routed_model.is_empty() {
        return Ok(ctx);
    }

    // Wire protocol decides here, not the credential source: z.ai takes
    // the same impersonation headers as api.anthropic.com.
    let provider = anthropic_wire_provider(
        &routed_model,
        model_config_custom_provider(&ctx).as_deref(),
        model_config_api_base(&ctx).as_deref(),
    );
    if provider != Some("anthropic") {
        return Ok(ctx);
    }

    // Models with their own key authenticate normally; the impersonation
    // betas only apply to OAuth.
    if model_config_api_key(&ctx).is_some() {
        debug!(model = %routed_model, "model has configured api_key, skipping beta headers");
        return Ok(ctx);
    }

    let mut existing: Vec<String> = Vec::new();
    if let Some(original) = header_get(&ctx.headers, "anthropic-beta") {
        existing.push(original.to_string());
    }
    if let Some(extra) = ctx.get_provider_header("anthropic-beta") {
        existing.push(extra.to_string());
    }
    if let Some(top_level) = ctx
        .raw()
        .get("extra_headers")
        .and_then(Value::as_object)
        .and_then(|extra| extra.get("anthropic-beta"))
        .and_then(Value::as_str)
    {
        existing.push(top_level.to_string());
    }

    let merged = merge_beta_headers(
        ANTHROPIC_BETA_HEADERS,
        existing.iter().map(String::as_str),
    );

    ctx.ensure_custom_llm_provider("anthropic");
    ctx.set_provider_header("anthropic-beta", merged.clone());
    ctx.set_provider_header("anthropic-version", ANTHROPIC_VERSION);

    // Direct completion calls read the top-level extra_headers instead.
    let top = ctx
        .raw_mut()
        .entry("extra_headers".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(top) = top.as_object_mut() {
        top.insert("anthropic-beta".to_string(), Value::String(merged));
        top.insert(
            "anthropic-version".to_string(),
            Value::String(ANTHROPIC_VERSION.to_string()),
        );
    }

    info!(model = %routed_model, "added anthropic-beta headers");
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn anthropic_request() -> serde_json::Value {
        json!({
            "model": "claude-sonnet-4-5",
            "metadata": {
                "ccproxy_litellm_model": "claude-sonnet-4-5",
                "ccproxy_model_config": {"litellm_params": {"api_base": "https://api.anthropic.com"}}
            },
            "proxy_server_request": {"headers": {}}
        })
    }

    #[test]
    fn sets_required_betas_and_version() {
        let out = run(anthropic_request());
        let beta = out.get_provider_header("anthropic-beta").unwrap();
        assert_eq!(
            beta,
            "oauth-2025-04-20,claude-code-20250219,interleaved-thinking-2025-05-14,fine-grained-tool-streaming-2025-05-14"
        );
        assert_eq!(
            out.get_provider_header("anthropic-version"),
            Some(ANTHROPIC_VERSION)
        );
        let top = out.raw().get("extra_headers").unwrap();
        assert_eq!(top["anthropic-beta"].as_str(), Some(beta));
    }

    #[test]
    fn preserves_client_betas_after_required_ones() {
        let mut data = anthropic_request();
        data["proxy_server_request"]["headers"] =
            json!({"anthropic-beta": "context-1m-2025-08-07,oauth-2025-04-20"});
        let out = run(data);
        let beta = out.get_provider_header("anthropic-beta").unwrap();
        assert!(beta.starts_with("oauth-2025-04-20,claude-code-20250219"));
        assert!(beta.ends_with("context-1m-2025-08-07"));
        assert_eq!(beta.matches("oauth-2025-04-20").count(), 1);
    }

    #[test]
    fn zai_upstream_gets_betas_too() {
        let mut data = anthropic_request();
        data["metadata"]["ccproxy_litellm_model"] = json!("glm-4.7");
        data["metadata"]["ccproxy_model_config"]["litellm_params"]["api_base"] =
            json!("https://api.z.ai/api/anthropic");
        let out = run(data);
        assert!(
            out.get_provider_header("anthropic-beta")
                .unwrap()
                .starts_with("oauth-2025-04-20")
        );
        assert_eq!(
            out.get_provider_header("anthropic-version"),
            Some(ANTHROPIC_VERSION)
        );
    }

    #[test]
    fn non_anthropic_provider_is_untouched() {
        let mut data = anthropic_request();
        data["metadata"]["ccproxy_litellm_model"] = json!("gpt-4o");
        data["metadata"]["ccproxy_model_config"]["litellm_params"]["api_base"] =
            json!("https://api.openai.com/v1");
        let out = run(data);
        assert_eq!(out.get_provider_header("anthropic-beta"), None);
    }

    #[test]
    fn configured_api_key_skips_betas() {
        let mut data = anthropic_request();
        data["metadata"]["ccproxy_model_config"]["litellm_params"]["api_key"] = json!("sk-own");
        let out = run(data);
        assert_eq!(out.get_provider_header("anthropic-beta"), None);
    }
}
