//! HTTP flow interceptor: OAuth header repair plus async trace capture.
//!
//! Header repair always runs, storage or not, and never waits on
//! persistence. Storage failures are logged and swallowed.

use std::sync::Arc;

use bytes::Bytes;
use ccproxy_common::{apply_identity_prefix, header_get, header_remove, header_set, merge_beta_headers};
use ccproxy_config::MitmConfig;
use ccproxy_storage::{NewTrace, TraceCompletion, TraceStore};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::flow::{FlowRequest, FlowResponse};

/// Betas Anthropic requires on OAuth requests passing through the wire.
const REQUIRED_BETAS: &[&str] = &[
    "oauth-2025-04-20",
    "claude-code-20250219",
    "interleaved-thinking-2025-05-14",
];

pub struct MitmAddon {
    storage: Option<Arc<dyn TraceStore>>,
    config: MitmConfig,
}

impl MitmAddon {
    pub fn new(storage: Option<Arc<dyn TraceStore>>, config: MitmConfig) -> Self {
        Self { storage, config }
    }

    /// Inbound hook: repair OAuth headers, then open a trace row.
    pub async fn on_request(&self, flow: &mut FlowRequest) {
        self.fix_oauth_headers(flow);

        let Some(storage) = &self.storage else {
            return;
        };
        if self.is_excluded(&flow.host) {
            debug!(host = %flow.host, "host excluded from capture");
            return;
        }

        let traffic_type = self.classify_traffic(&flow.host, &flow.path);
        let mut trace = NewTrace {
            trace_id: flow.id.clone(),
            traffic_type: traffic_type.to_string(),
            method: flow.method.clone(),
            url: flow.url.clone(),
            host: flow.host.clone(),
            path: flow.path.clone(),
            request_headers: headers_to_json(&flow.headers),
            request_body: None,
            request_body_size: None,
            request_content_type: None,
            start_time: flow.start_time,
        };
        if self.config.capture_bodies {
            trace.request_body = self.truncate_body(flow.body.as_ref());
            trace.request_body_size = Some(body_len(flow.body.as_ref()));
            trace.request_content_type =
                header_get(&flow.headers, "content-type").map(str::to_string);
        }

        if let Err(err) = storage.create_trace(trace).await {
            error!(trace_id = %flow.id, error = %err, "failed to persist request trace");
        } else {
            debug!(method = %flow.method, url = %flow.url, trace_id = %flow.id, "captured request");
        }
    }

    /// Response hook: close the trace row with status and timing.
    pub async fn on_response(&self, flow: &FlowRequest, response: &FlowResponse) {
        let Some(storage) = &self.storage else {
            return;
        };
        if self.is_excluded(&flow.host) {
            return;
        }

        let duration_ms = (response.end_time - flow.start_time).as_seconds_f64() * 1000.0;
        let mut completion = TraceCompletion {
            status_code: i32::from(response.status_code),
            response_headers: headers_to_json(&response.headers),
            response_body: None,
            response_body_size: None,
            response_content_type: None,
            duration_ms: Some(duration_ms),
            end_time: response.end_time,
            error_message: None,
        };
        if self.config.capture_bodies {
            completion.response_body = self.truncate_body(response.body.as_ref());
            completion.response_body_size = Some(body_len(response.body.as_ref()));
            completion.response_content_type =
                header_get(&response.headers, "content-type").map(str::to_string);
        }

        if let Err(err) = storage.complete_trace(&flow.id, completion).await {
            error!(trace_id = %flow.id, error = %err, "failed to persist response trace");
        }
    }

    /// Flow error hook: close the trace with status 0 and the message.
    pub async fn on_error(&self, flow: &FlowRequest, message: &str) {
        let Some(storage) = &self.storage else {
            return;
        };
        if self.is_excluded(&flow.host) {
            return;
        }

        let completion = TraceCompletion {
            status_code: 0,
            response_headers: Value::Object(serde_json::Map::new()),
            response_body: None,
            response_body_size: None,
            response_content_type: None,
            duration_ms: None,
            end_time: OffsetDateTime::now_utc(),
            error_message: Some(message.to_string()),
        };

        warn!(trace_id = %flow.id, error = %message, "request error");
        if let Err(err) = storage.complete_trace(&flow.id, completion).await {
            error!(trace_id = %flow.id, error = %err, "failed to persist error trace");
        }
    }

    /// Anthropic rejects requests presenting both a bearer token and an
    /// x-api-key; the framework below us always sends the latter. Strip
    /// it at the wire, top up the required betas, and make sure the body
    /// carries the Claude Code identity.
    fn fix_oauth_headers(&self, flow: &mut FlowRequest) {
        if !flow.host.to_ascii_lowercase().contains("api.anthropic.com") {
            return;
        }
        let is_bearer = header_get(&flow.headers, "authorization")
            .map(|auth| auth.to_ascii_lowercase().starts_with("bearer "))
            .unwrap_or(false);
        if !is_bearer {
            return;
        }

        if header_remove(&mut flow.headers, "x-api-key").is_some() {
            info!(host = %flow.host, "removed x-api-key for oauth request");
        }

        let existing = header_get(&flow.headers, "anthropic-beta").unwrap_or_default();
        let merged = merge_beta_headers(REQUIRED_BETAS, [existing]);
        header_set(&mut flow.headers, "anthropic-beta", merged);

        self.inject_identity(flow);
    }

    fn inject_identity(&self, flow: &mut FlowRequest) {
        let Some(body) = &flow.body else {
            return;
        };
        let Ok(mut parsed) = serde_json::from_slice::<Value>(body) else {
            return;
        };
        let Some(object) = parsed.as_object_mut() else {
            return;
        };
        if !object.contains_key("messages") {
            return;
        }

        let (system, changed) = apply_identity_prefix(object.remove("system"));
        object.insert("system".to_string(), system);
        if !changed {
            return;
        }

        match serde_json::to_vec(&parsed) {
            Ok(bytes) => {
                header_set(&mut flow.headers, "content-length", bytes.len().to_string());
                flow.body = Some(Bytes::from(bytes));
                info!("injected claude code identity into system message");
            }
            Err(err) => warn!(error = %err, "failed to re-serialize request body"),
        }
    }

    fn classify_traffic(&self, host: &str, path: &str) -> &'static str {
        let host = host.to_ascii_lowercase();
        let path = path.to_ascii_lowercase();

        if self
            .config
            .llm_hosts
            .iter()
            .any(|pattern| host.contains(&pattern.to_ascii_lowercase()))
        {
            return "llm";
        }
        if host.contains("mcp") || path.contains("mcp") {
            return "mcp";
        }
        if matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1") {
            return "other";
        }
        "web"
    }

    fn is_excluded(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.config
            .excluded_hosts
            .iter()
            .any(|excluded| host.contains(&excluded.to_ascii_lowercase()))
    }

    fn truncate_body(&self, body: Option<&Bytes>) -> Option<Vec<u8>> {
        let body = body.filter(|b| !b.is_empty())?;
        if self.config.max_body_size > 0 && body.len() > self.config.max_body_size {
            Some(body[..self.config.max_body_size].to_vec())
        } else {
            Some(body.to_vec())
        }
    }
}

fn body_len(body: Option<&Bytes>) -> i64 {
    body.map(|b| b.len() as i64).unwrap_or(0)
}

fn headers_to_json(headers: &ccproxy_common::Headers) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}
