//! Forward the client's x-api-key header to the upstream request.

use std::sync::Arc;

use tracing::info;

use crate::context::Context;
use crate::hook::{HookArgs, HookResult, HookSpec};

pub fn spec() -> HookSpec {
    HookSpec::new("forward_apikey", Arc::new(handler))
        .with_guard(Arc::new(|ctx: &Context| !ctx.x_api_key().is_empty()))
        .with_reads(["secret_fields"])
        .with_writes(["x-api-key"])
}

fn handler(mut ctx: Context, _args: &HookArgs<'_>) -> HookResult {
    let api_key = ctx.x_api_key().to_string();
    if api_key.is_empty() {
        return Ok(ctx);
    }
    ctx.set_provider_header("x-api-key", api_key);
    info!("forwarding request with x-api-key header");
    Ok(ctx)
}
