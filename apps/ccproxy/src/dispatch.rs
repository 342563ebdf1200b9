//! Upstream dispatch over wreq, with the MITM addon on the outbound path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ccproxy_common::Headers;
use ccproxy_core::{UpstreamDispatch, UpstreamError};
use ccproxy_mitm::{FlowRequest, FlowResponse, MitmAddon};
use ccproxy_pipeline::RequestData;
use serde_json::{Map, Value};
use wreq::{Client, Method};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const MESSAGES_PATH: &str = "/v1/messages";

/// Body fields forwarded upstream; everything else in the envelope is
/// proxy-internal.
const BODY_FIELDS: &[&str] = &[
    "model",
    "messages",
    "system",
    "max_tokens",
    "temperature",
    "top_p",
    "stop_sequences",
    "stream",
    "tools",
    "tool_choice",
    "thinking",
];

pub(crate) struct WreqDispatch {
    client: Client,
    addon: Option<Arc<MitmAddon>>,
}

impl WreqDispatch {
    pub(crate) fn new(addon: Option<Arc<MitmAddon>>) -> Result<Self, wreq::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { client, addon })
    }
}

#[async_trait]
impl UpstreamDispatch for WreqDispatch {
    async fn completion(&self, request: RequestData) -> Result<Value, UpstreamError> {
        let url = build_url(&request);
        let headers = collect_headers(&request);
        let body = collect_body(&request);
        let body_bytes = serde_json::to_vec(&Value::Object(body))
            .map_err(|err| UpstreamError::new(None, format!("body serialization: {err}")))?;

        let mut flow = FlowRequest::new("POST", url, headers, Some(Bytes::from(body_bytes)));
        if let Some(addon) = &self.addon {
            addon.on_request(&mut flow).await;
        }

        let mut builder = self.client.request(Method::POST, &flow.url);
        for (name, value) in &flow.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &flow.body {
            builder = builder.body(body.to_vec());
        }

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(err) => {
                if let Some(addon) = &self.addon {
                    addon.on_error(&flow, &err.to_string()).await;
                }
                return Err(UpstreamError::new(None, err.to_string()));
            }
        };

        let status = resp.status().as_u16();
        let resp_headers: Headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| UpstreamError::new(Some(status), err.to_string()))?;

        if let Some(addon) = &self.addon {
            let response = FlowResponse::new(status, resp_headers, Some(bytes.clone()));
            addon.on_response(&flow, &response).await;
        }

        if !(200..300).contains(&status) {
            return Err(UpstreamError::new(
                Some(status),
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| UpstreamError::new(Some(status), format!("invalid response json: {err}")))
    }
}

fn build_url(request: &RequestData) -> String {
    let api_base = request
        .get("metadata")
        .and_then(Value::as_object)
        .and_then(|meta| meta.get("ccproxy_model_config"))
        .and_then(Value::as_object)
        .and_then(|config| config.get("litellm_params"))
        .and_then(Value::as_object)
        .and_then(|params| params.get("api_base"))
        .and_then(Value::as_str)
        .filter(|base| !base.is_empty())
        .unwrap_or(DEFAULT_API_BASE);

    let base = api_base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}{}", MESSAGES_PATH.trim_start_matches("/v1"))
    } else {
        format!("{base}{MESSAGES_PATH}")
    }
}

fn collect_headers(request: &RequestData) -> Headers {
    let mut headers: Headers = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("accept".to_string(), "application/json".to_string()),
    ];

    let mut apply = |extra: Option<&Value>| {
        if let Some(extra) = extra.and_then(Value::as_object) {
            for (name, value) in extra {
                if let Some(value) = value.as_str() {
                    ccproxy_common::header_set(&mut headers, name.clone(), value.to_string());
                }
            }
        }
    };
    apply(request.get("extra_headers"));
    apply(
        request
            .get("provider_specific_header")
            .and_then(Value::as_object)
            .and_then(|psh| psh.get("extra_headers")),
    );

    headers
}

fn collect_body(request: &RequestData) -> Map<String, Value> {
    let mut body = Map::new();
    for field in BODY_FIELDS {
        if let Some(value) = request.get(*field) {
            body.insert((*field).to_string(), value.clone());
        }
    }
    body
}
