//! Classify the request and record the routing label.

use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::guards;
use crate::hook::{HookArgs, HookResult, HookSpec};

pub fn spec() -> HookSpec {
    HookSpec::new("rule_evaluator", Arc::new(handler))
        .with_guard(Arc::new(|ctx: &Context| !guards::is_health_check(ctx)))
        .with_writes(["ccproxy_model_name", "ccproxy_alias_model"])
}

fn handler(mut ctx: Context, args: &HookArgs<'_>) -> HookResult {
    let alias = ctx.model.clone();
    ctx.set_alias_model(alias);

    // The classifier sees the envelope form, same as the rules were
    // written against.
    let data = ctx.clone().to_data();
    let label = args.services.classifier.classify(&data);
    debug!(original = %ctx.model, label = %label, "rule evaluation");
    ctx.set_model_name(label);
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Rule;
    use crate::test_support::{request, services_with};
    use serde_json::json;

    #[test]
    fn records_alias_and_label() {
        let services = services_with(
            vec![],
            vec![(
                "background".to_string(),
                Rule::MatchModel {
                    needle: "haiku".to_string(),
                },
            )],
        );
        let ctx = Context::from_data(request(json!({"model": "claude-haiku-4-5"})));
        let args = HookArgs {
            params: &serde_json::Map::new(),
            services: &services,
            auth: None,
        };
        let out = handler(ctx, &args).unwrap();
        assert_eq!(out.alias_model(), "claude-haiku-4-5");
        assert_eq!(out.model_name(), "background");
    }

    #[test]
    fn guard_skips_health_checks() {
        let spec = spec();
        let mut ctx = Context::from_data(request(json!({"model": "m"})));
        assert!(spec.should_run(&ctx));
        ctx.set_health_check(true);
        assert!(!spec.should_run(&ctx));
    }
}
