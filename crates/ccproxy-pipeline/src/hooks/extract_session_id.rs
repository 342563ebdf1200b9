//! Pull session identifiers out of the request body for trace grouping.
//!
//! Claude Code packs session info into `metadata.user_id` as
//! `user_<hash>_account_<uuid>_session_<uuid>`.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::context::Context;
use crate::hook::{HookArgs, HookResult, HookSpec};

pub fn spec() -> HookSpec {
    HookSpec::new("extract_session_id", Arc::new(handler))
        .with_guard(Arc::new(Context::has_proxy_request))
        .with_reads(["proxy_server_request"])
        .with_writes(["session_id", "trace_metadata"])
}

fn handler(mut ctx: Context, _args: &HookArgs<'_>) -> HookResult {
    let Some(body_metadata) = body_metadata(&ctx) else {
        return Ok(ctx);
    };

    let user_id = body_metadata
        .get("user_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut claude_format = false;
    let parts: Vec<&str> = user_id.split("_session_").collect();
    if parts.len() == 2 {
        let session_id = parts[1].to_string();
        debug!(session_id = %session_id, "extracted claude code session");
        ctx.metadata
            .insert("session_id".to_string(), Value::String(session_id));
        claude_format = true;

        let account_parts: Vec<&str> = parts[0].split("_account_").collect();
        if account_parts.len() == 2 {
            let user_hash = account_parts[0]
                .strip_prefix("user_")
                .unwrap_or(account_parts[0])
                .to_string();
            let account_id = account_parts[1].to_string();
            let trace = ctx.trace_metadata_mut();
            trace.insert("claude_user_hash".to_string(), Value::String(user_hash));
            trace.insert("claude_account_id".to_string(), Value::String(account_id));
        }
    }

    // Fallback for non-Claude-Code clients that send a plain session_id.
    if !claude_format {
        if let Some(session) = body_metadata.get("session_id") {
            let session = match session {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ctx.metadata
                .insert("session_id".to_string(), Value::String(session));
        }
    }

    if let Some(trace_user_id) = body_metadata.get("trace_user_id") {
        let value = trace_user_id.clone();
        ctx.trace_metadata_mut()
            .insert("trace_user_id".to_string(), value);
    }
    if let Some(tags) = body_metadata.get("tags") {
        let value = tags.clone();
        ctx.trace_metadata_mut().insert("tags".to_string(), value);
    }

    Ok(ctx)
}

fn body_metadata(ctx: &Context) -> Option<Map<String, Value>> {
    ctx.proxy_request()?
        .get("body")?
        .as_object()?
        .get("metadata")?
        .as_object()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{empty_services, request};
    use serde_json::json;

    fn run(body_metadata: serde_json::Value) -> Context {
        let services = empty_services();
        let ctx = Context::from_data(request(json!({
            "model": "m",
            "proxy_server_request": {"body": {"metadata": body_metadata}}
        })));
        let args = HookArgs {
            params: &serde_json::Map::new(),
            services: &services,
            auth: None,
        };
        handler(ctx, &args).unwrap()
    }

    #[test]
    fn parses_claude_code_user_id() {
        let out = run(json!({
            "user_id": "user_abc123_account_acc-uuid_session_sess-uuid"
        }));
        assert_eq!(out.metadata.get("session_id"), Some(&json!("sess-uuid")));
        let trace = out.metadata.get("trace_metadata").unwrap();
        assert_eq!(trace["claude_user_hash"], "abc123");
        assert_eq!(trace["claude_account_id"], "acc-uuid");
    }

    #[test]
    fn malformed_user_id_with_double_session_marker_is_ignored() {
        let out = run(json!({
            "user_id": "user_a_session_b_session_c"
        }));
        assert!(!out.metadata.contains_key("session_id"));
    }

    #[test]
    fn fallback_session_id_key() {
        let out = run(json!({"session_id": 42, "trace_user_id": "u-1", "tags": ["t"]}));
        assert_eq!(out.metadata.get("session_id"), Some(&json!("42")));
        let trace = out.metadata.get("trace_metadata").unwrap();
        assert_eq!(trace["trace_user_id"], "u-1");
        assert_eq!(trace["tags"], json!(["t"]));
    }

    #[test]
    fn claude_format_wins_over_fallback() {
        let out = run(json!({
            "user_id": "user_h_account_a_session_from-user-id",
            "session_id": "from-fallback"
        }));
        assert_eq!(out.metadata.get("session_id"), Some(&json!("from-user-id")));
    }

    #[test]
    fn guard_requires_proxy_request() {
        let spec = spec();
        let bare = Context::from_data(request(json!({"model": "m"})));
        assert!(!spec.should_run(&bare));
    }
}
