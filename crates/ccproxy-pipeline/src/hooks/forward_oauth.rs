//! Forward OAuth bearer tokens to the resolved upstream provider.
//!
//! Handles sentinel-key substitution, cached-token fallback, the
//! Anthropic empty-`x-api-key` requirement and per-provider user agents.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::guards::{
    has_model_routing, model_config_api_base, model_config_api_key, model_config_custom_provider,
};
use crate::hook::{HookArgs, HookResult, HookSpec};
use crate::hooks::{OAUTH_SENTINEL_PREFIX, detect_provider};

pub fn spec() -> HookSpec {
    HookSpec::new("forward_oauth", Arc::new(handler))
        .with_guard(Arc::new(has_model_routing))
        .with_reads([
            "ccproxy_litellm_model",
            "ccproxy_model_config",
            "authorization",
            "secret_fields",
        ])
        .with_writes([
            "authorization",
            "x-api-key",
            "api_key",
            "provider_specific_header",
        ])
}

fn handler(mut ctx: Context, args: &HookArgs<'_>) -> HookResult {
    if !ctx.has_proxy_request() {
        return Ok(ctx);
    }

    let routed_model = ctx.litellm_model().to_string();
    if routed_model.is_empty() {
        warn!("no routed model in metadata, skipping oauth forwarding");
        return Ok(ctx);
    }

    // A per-model api_key wins; the framework will use it directly.
    if model_config_api_key(&ctx).is_some() {
        debug!(model = %routed_model, "model has configured api_key, skipping oauth forwarding");
        return Ok(ctx);
    }

    let credentials = &args.services.credentials;
    let api_base = model_config_api_base(&ctx);
    let Some(provider) = detect_provider(
        &routed_model,
        model_config_custom_provider(&ctx),
        api_base.as_deref(),
        credentials,
    ) else {
        warn!(model = %routed_model, "could not resolve provider, skipping oauth forwarding");
        return Ok(ctx);
    };

    let mut auth_header = ctx.authorization().to_string();

    // Sentinel substitution: sk-ant-oat-ccproxy-<provider> swaps in the
    // cached token for that provider. A failed substitution clears the
    // header so the literal sentinel is never forwarded.
    let sentinel_token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .unwrap_or(auth_header.as_str());
    if let Some(sentinel_provider) = sentinel_token.strip_prefix(OAUTH_SENTINEL_PREFIX) {
        match credentials.get_oauth_token(sentinel_provider) {
            Some(token) => {
                info!(provider = %sentinel_provider, "sentinel key detected, substituting oauth token");
                auth_header = format!("Bearer {token}");
            }
            None => {
                warn!(provider = %sentinel_provider, "sentinel key for provider with no cached token");
                auth_header.clear();
            }
        }
    }

    // Cached-token fallback when the request carried no auth at all.
    if auth_header.is_empty() {
        match credentials.get_oauth_token(&provider) {
            Some(token) => {
                debug!(provider = %provider, "using cached oauth token");
                auth_header = if token.starts_with("Bearer ") {
                    token
                } else {
                    format!("Bearer {token}")
                };
            }
            None => return Ok(ctx),
        }
    }

    ctx.ensure_custom_llm_provider(&provider);
    ctx.set_provider_header("authorization", auth_header.clone());
    // Anthropic rejects requests that present both credentials.
    ctx.set_provider_header("x-api-key", "");

    if let Some(token) = auth_header.strip_prefix("Bearer ") {
        ctx.api_key = Some(token.to_string());
        // The framework needs model_group when api_key is set dynamically.
        if !ctx.metadata.contains_key("model_group") {
            let group = if ctx.model.is_empty() {
                "default".to_string()
            } else {
                ctx.model.clone()
            };
            ctx.metadata
                .insert("model_group".to_string(), Value::String(group));
        }
    }

    if let Some(agent) = credentials.get_oauth_user_agent(&provider) {
        debug!(provider = %provider, user_agent = %agent, "setting custom user agent");
        ctx.set_provider_header("user-agent", agent);
    }

    info!(
        provider = %provider,
        model = %routed_model,
        "forwarding request with oauth authentication"
    );
    Ok(ctx)
}
