//! Capture request headers into trace metadata, redacted.
//!
//! Also mirrors the trace metadata into the process-wide request store so
//! post-call callbacks (which lose custom metadata) can find it by
//! `litellm_call_id`.

use std::sync::Arc;

use ccproxy_common::{Headers, header_set, new_call_id, redact_header_value};
use serde_json::Value;

use crate::context::Context;
use crate::hook::{HookArgs, HookResult, HookSpec};

pub fn spec() -> HookSpec {
    HookSpec::new("capture_headers", Arc::new(handler))
        .with_guard(Arc::new(Context::has_proxy_request))
        .with_reads(["proxy_server_request", "secret_fields"])
        .with_writes(["trace_metadata", "http_method", "http_path"])
}

fn handler(mut ctx: Context, args: &HookArgs<'_>) -> HookResult {
    let filter: Option<Vec<String>> = args
        .params
        .get("headers")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(|name| name.to_ascii_lowercase())
                .collect()
        });

    // Raw headers carry the auth values; they shadow the cleaned set.
    let mut all: Headers = ctx.headers.clone();
    for (name, value) in &ctx.raw_headers {
        header_set(&mut all, name.clone(), value.clone());
    }

    let mut captured: Vec<(String, String)> = Vec::new();
    for (name, value) in &all {
        if value.is_empty() {
            continue;
        }
        let lower = name.to_ascii_lowercase();
        if let Some(filter) = &filter {
            if !filter.contains(&lower) {
                continue;
            }
        }
        captured.push((lower, redact_header_value(name, value)));
    }

    let method = ctx
        .proxy_request()
        .and_then(|psr| psr.get("method"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let path = ctx
        .proxy_request()
        .and_then(|psr| psr.get("url"))
        .and_then(Value::as_str)
        .and_then(url_path)
        .map(str::to_string);

    {
        let trace = ctx.trace_metadata_mut();
        for (lower, redacted) in captured {
            trace.insert(format!("header_{lower}"), Value::String(redacted));
        }
        if let Some(method) = method {
            trace.insert("http_method".to_string(), Value::String(method));
        }
        if let Some(path) = path {
            trace.insert("http_path".to_string(), Value::String(path));
        }
    }

    if ctx.litellm_call_id.is_empty() {
        ctx.litellm_call_id = new_call_id();
    }
    let snapshot = ctx
        .metadata
        .get("trace_metadata")
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));
    let mut entry = serde_json::Map::new();
    entry.insert("trace_metadata".to_string(), snapshot);
    args.services
        .metadata_store
        .store(&ctx.litellm_call_id, entry);

    Ok(ctx)
}

fn url_path(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let start = rest.find('/')?;
    let path = &rest[start..];
    let end = path.find(['?', '#']).unwrap_or(path.len());
    Some(&path[..end])
}
