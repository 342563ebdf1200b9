//! Resolve the routing label to a concrete upstream model.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::classify::DEFAULT_LABEL;
use crate::context::Context;
use crate::hook::{HookArgs, HookError, HookResult, HookSpec};

pub fn spec() -> HookSpec {
    HookSpec::new("model_router", Arc::new(handler))
        .with_guard(Arc::new(|ctx: &Context| {
            !ctx.model_name().is_empty() || !ctx.model.is_empty()
        }))
        .with_reads(["ccproxy_model_name", "ccproxy_alias_model"])
        .with_writes([
            "model",
            "ccproxy_litellm_model",
            "ccproxy_model_config",
            "ccproxy_is_passthrough",
        ])
}

fn handler(mut ctx: Context, args: &HookArgs<'_>) -> HookResult {
    let services = args.services;

    // Health checks validate the configured model as-is.
    if ctx.is_health_check() {
        let model = ctx.model.clone();
        ctx.set_litellm_model(model);
        ctx.set_passthrough(true);
        return Ok(ctx);
    }

    let label = match ctx.model_name() {
        "" => {
            warn!("no classification label, using default");
            DEFAULT_LABEL.to_string()
        }
        label => label.to_string(),
    };

    if label == DEFAULT_LABEL && services.default_model_passthrough {
        let original = match ctx.alias_model() {
            "" => ctx.model.clone(),
            alias => alias.to_string(),
        };
        if !original.is_empty() {
            // Keep the client's model; the config lookup still runs so the
            // OAuth hooks downstream can match destinations.
            let config = services
                .router
                .get_model_for_label(&original)
                .map(|config| config.to_value())
                .unwrap_or_else(|| Value::Object(Map::new()));
            debug!(model = %original, "passthrough routing");
            ctx.set_litellm_model(original);
            ctx.set_model_config(config);
            ctx.set_passthrough(true);
            return Ok(ctx);
        }
        warn!("no original model for passthrough, falling back to routing");
    }

    let mut config = services.router.get_model_for_label(&label);
    if config.is_none() {
        warn!(label = %label, "no model for label, reloading routing table");
        services.router.reload_models();
        config = services.router.get_model_for_label(&label);
    }
    if config.is_none() && label != DEFAULT_LABEL {
        config = services.router.get_model_for_label(DEFAULT_LABEL);
    }

    let Some(config) = config else {
        if services.default_model_passthrough && !ctx.model.is_empty() {
            let model = ctx.model.clone();
            ctx.set_litellm_model(model);
            ctx.set_model_config(Value::Object(Map::new()));
            ctx.set_passthrough(true);
            return Ok(ctx);
        }
        return Err(HookError::Routing(format!(
            "no model configured for label '{label}' and no 'default' model available as fallback"
        )));
    };

    let routed = config.litellm_params.model.clone();
    if routed.is_empty() {
        warn!(label = %label, "model config has no litellm model");
    } else {
        ctx.model = routed.clone();
    }
    debug!(label = %label, model = %routed, "routed");
    ctx.set_litellm_model(routed);
    ctx.set_model_config(config.to_value());
    ctx.set_passthrough(false);
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookServices;
    use crate::router::{LitellmParams, ModelConfig};
    use crate::test_support::{request, services_with};
    use serde_json::json;

    fn model(label: &str, upstream: &str) -> ModelConfig {
        ModelConfig {
            model_name: label.to_string(),
            litellm_params: LitellmParams {
                model: upstream.to_string(),
                ..Default::default()
            },
        }
    }

    fn run(services: &HookServices, data: serde_json::Value) -> HookResult {
        let ctx = Context::from_data(request(data));
        let args = HookArgs {
            params: &serde_json::Map::new(),
            services,
            auth: None,
        };
        handler(ctx, &args)
    }

    #[test]
    fn routes_label_to_configured_model() {
        let services = services_with(vec![model("background", "claude-haiku-4-5")], vec![]);
        let out = run(
            &services,
            json!({
                "model": "claude-haiku-4-5-20251001",
                "metadata": {
                    "ccproxy_model_name": "background",
                    "ccproxy_alias_model": "claude-haiku-4-5-20251001"
                }
            }),
        )
        .unwrap();
        assert_eq!(out.model, "claude-haiku-4-5");
        assert_eq!(out.litellm_model(), "claude-haiku-4-5");
        assert!(!out.is_passthrough());
    }

    #[test]
    fn default_label_passes_through_original_model() {
        let services = services_with(vec![], vec![]);
        let out = run(
            &services,
            json!({
                "model": "claude-sonnet-4-5",
                "metadata": {
                    "ccproxy_model_name": "default",
                    "ccproxy_alias_model": "claude-sonnet-4-5"
                }
            }),
        )
        .unwrap();
        assert_eq!(out.model, "claude-sonnet-4-5");
        assert!(out.is_passthrough());
        assert_eq!(out.litellm_model(), "claude-sonnet-4-5");
        assert_eq!(out.model_config().map(|c| c.len()), Some(0));
    }

    #[test]
    fn missing_label_without_fallback_is_a_routing_error() {
        let mut services = services_with(vec![], vec![]);
        services.default_model_passthrough = false;
        let err = run(
            &services,
            json!({
                "model": "claude-sonnet-4-5",
                "metadata": {"ccproxy_model_name": "background"}
            }),
        )
        .unwrap_err();
        assert!(matches!(err, HookError::Routing(_)));
    }

    #[test]
    fn missing_label_falls_back_to_default_entry() {
        let mut services = services_with(vec![model("default", "claude-fallback")], vec![]);
        services.default_model_passthrough = false;
        let out = run(
            &services,
            json!({
                "model": "x",
                "metadata": {"ccproxy_model_name": "background"}
            }),
        )
        .unwrap();
        assert_eq!(out.model, "claude-fallback");
        assert!(!out.is_passthrough());
    }

    #[test]
    fn health_check_bypasses_resolution() {
        let mut services = services_with(vec![], vec![]);
        services.default_model_passthrough = false;
        let out = run(
            &services,
            json!({
                "model": "configured-model",
                "metadata": {"tags": ["litellm-internal-health-check"]}
            }),
        )
        .unwrap();
        assert_eq!(out.litellm_model(), "configured-model");
        assert!(out.is_passthrough());
    }
}
