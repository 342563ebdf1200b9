//! Handler front-end: adapts the host framework's pre-call and
//! post-call-failure callbacks to the pipeline and credential store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ccproxy_common::{ANTHROPIC_VERSION, apply_identity_prefix, merge_beta_headers};
use ccproxy_credentials::CredentialStore;
use ccproxy_pipeline::hooks::ANTHROPIC_BETA_HEADERS;
use ccproxy_pipeline::{PipelineExecutor, PipelineResult, RequestData};
use serde::Serialize;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const HEALTH_CHECK_TAG: &str = "litellm-internal-health-check";
const RETRY_COUNT_KEY: &str = "_ccproxy_401_retry_count";
const MAX_401_RETRIES: u64 = 1;

/// An upstream failure as reported by the host framework.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_auth_error(&self) -> bool {
        if self.status == Some(401) {
            return true;
        }
        let message = self.message.to_ascii_lowercase();
        message.contains("401")
            || message.contains("unauthorized")
            || message.contains("authentication")
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "upstream error {status}: {}", self.message),
            None => write!(f, "upstream error: {}", self.message),
        }
    }
}

/// One upstream completion call, used by the 401 retry path. Implemented
/// by the binary over its HTTP client and by tests with stubs.
#[async_trait]
pub trait UpstreamDispatch: Send + Sync {
    async fn completion(&self, request: RequestData) -> Result<Value, UpstreamError>;
}

/// Best-effort single-slot routing status for status-query UIs.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingStatus {
    pub rule: Option<String>,
    pub model: Option<String>,
    pub original_model: Option<String>,
    pub is_passthrough: bool,
    pub timestamp: String,
}

pub struct ProxyHandler {
    pipeline: PipelineExecutor,
    credentials: Arc<CredentialStore>,
    last_status: Mutex<Option<RoutingStatus>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyHandler {
    pub fn new(pipeline: PipelineExecutor, credentials: Arc<CredentialStore>) -> Self {
        Self {
            pipeline,
            credentials,
            last_status: Mutex::new(None),
            refresh_task: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn last_status(&self) -> Option<RoutingStatus> {
        self.last_status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Pre-call: start the background refresh once, special-case health
    /// checks, then run the pipeline.
    pub fn pre_call(
        &self,
        mut data: RequestData,
        auth: Option<&Map<String, Value>>,
    ) -> PipelineResult<RequestData> {
        self.ensure_refresh_task();

        if has_health_check_tag(&data) {
            debug!("health check request, marking passthrough");
            mark_health_check(&mut data);
            self.inject_health_check_auth(&mut data);
        }

        let data = self.pipeline.execute(data, auth)?;

        let metadata = data.get("metadata").and_then(Value::as_object);
        let rule = meta_string(metadata, "ccproxy_model_name");
        let original = meta_string(metadata, "ccproxy_alias_model");
        let routed = meta_string(metadata, "ccproxy_litellm_model")
            .or_else(|| data.get("model").and_then(Value::as_str).map(str::to_string));
        let is_passthrough = metadata
            .and_then(|meta| meta.get("ccproxy_is_passthrough"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        info!(
            rule = rule.as_deref().unwrap_or("-"),
            original = original.as_deref().unwrap_or("-"),
            routed = routed.as_deref().unwrap_or("-"),
            passthrough = is_passthrough,
            "routing decision"
        );

        let status = RoutingStatus {
            rule,
            model: routed,
            original_model: original,
            is_passthrough,
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        *self.last_status.lock().unwrap_or_else(|e| e.into_inner()) = Some(status);

        Ok(data)
    }

    /// Post-call-failure: on a 401 with a configured credential source,
    /// refresh the token and retry once. A successful retry's response is
    /// returned through the normal success path; anything else lets the
    /// original error propagate.
    pub async fn post_call_failure(
        &self,
        request_data: &RequestData,
        error: &UpstreamError,
        dispatch: &dyn UpstreamDispatch,
    ) -> Option<Value> {
        if !error.is_auth_error() {
            return None;
        }

        let metadata = request_data.get("metadata").and_then(Value::as_object);
        let retry_count = metadata
            .and_then(|meta| meta.get(RETRY_COUNT_KEY))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if retry_count >= MAX_401_RETRIES {
            warn!(retry_count, "max 401 retries reached, not retrying");
            return None;
        }

        let provider = self.resolve_provider(request_data)?;
        if !self.credentials.has_source(&provider) {
            debug!(provider = %provider, "no oauth source configured, not retrying");
            return None;
        }

        let Some(new_token) = self.credentials.refresh(&provider).await else {
            warn!(provider = %provider, "401 retry: token refresh failed");
            return None;
        };
        info!(provider = %provider, retry = retry_count + 1, "401 retry with refreshed oauth token");

        let retry = build_retry_request(request_data, &new_token, retry_count + 1);
        match dispatch.completion(retry).await {
            Ok(response) => {
                info!(provider = %provider, "401 retry succeeded");
                Some(response)
            }
            Err(retry_error) => {
                warn!(provider = %provider, error = %retry_error, "401 retry failed");
                None
            }
        }
    }

    fn ensure_refresh_task(&self) {
        let mut slot = self.refresh_task.lock().unwrap_or_else(|e| e.into_inner());
        let running = slot.as_ref().is_some_and(|handle| !handle.is_finished());
        if !running {
            debug!("starting oauth background refresh task");
            *slot = Some(self.credentials.spawn_refresh_task());
        }
    }

    /// Stop the background refresh loop (clean shutdown).
    pub fn stop_refresh_task(&self) {
        if let Some(handle) = self
            .refresh_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// Health checks are authenticated by the host framework before any
    /// hook runs, so credentials go in here, not in the pipeline.
    fn inject_health_check_auth(&self, data: &mut RequestData) {
        let model = data
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let api_base = data
            .get("litellm_params")
            .and_then(Value::as_object)
            .and_then(|params| params.get("api_base"))
            .or_else(|| data.get("api_base"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let provider = self
            .credentials
            .get_provider_for_destination(api_base.as_deref())
            .or_else(|| heuristic_provider(&model));
        let Some(provider) = provider else {
            return;
        };
        let Some(token) = self.credentials.get_oauth_token(&provider) else {
            return;
        };

        data.insert("api_key".to_string(), Value::String(token.clone()));
        data.insert("max_tokens".to_string(), json!(1));

        let anthropic_family = provider == "anthropic"
            || api_base
                .as_deref()
                .map(str::to_ascii_lowercase)
                .is_some_and(|base| base.contains("anthropic.com") || base.contains("z.ai"));
        if !anthropic_family {
            return;
        }

        let betas = merge_beta_headers(ANTHROPIC_BETA_HEADERS, []);
        let extra = data
            .entry("extra_headers".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(extra) = extra.as_object_mut() {
            extra.insert(
                "authorization".to_string(),
                Value::String(format!("Bearer {token}")),
            );
            extra.insert("x-api-key".to_string(), Value::String(String::new()));
            extra.insert("anthropic-beta".to_string(), Value::String(betas));
            extra.insert(
                "anthropic-version".to_string(),
                Value::String(ANTHROPIC_VERSION.to_string()),
            );
        }

        let (system, _) = apply_identity_prefix(data.remove("system"));
        data.insert("system".to_string(), system);
    }

    /// Provider for the 401 path: model-config destination match first,
    /// then model-name heuristics.
    fn resolve_provider(&self, request_data: &RequestData) -> Option<String> {
        let metadata = request_data.get("metadata").and_then(Value::as_object);

        let api_base = metadata
            .and_then(|meta| meta.get("ccproxy_model_config"))
            .and_then(Value::as_object)
            .and_then(|config| config.get("litellm_params"))
            .and_then(Value::as_object)
            .and_then(|params| params.get("api_base"))
            .and_then(Value::as_str);
        if let Some(provider) = self.credentials.get_provider_for_destination(api_base) {
            return Some(provider);
        }

        let model = meta_string(metadata, "ccproxy_litellm_model")
            .or_else(|| request_data.get("model").and_then(Value::as_str).map(str::to_string))?;
        heuristic_provider(&model)
    }
}

fn meta_string(metadata: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    metadata
        .and_then(|meta| meta.get(key))
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn has_health_check_tag(data: &RequestData) -> bool {
    data.get("metadata")
        .and_then(Value::as_object)
        .and_then(|meta| meta.get("tags"))
        .and_then(Value::as_array)
        .is_some_and(|tags| tags.iter().any(|tag| tag.as_str() == Some(HEALTH_CHECK_TAG)))
}

fn mark_health_check(data: &mut RequestData) {
    let metadata = data
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(metadata) = metadata.as_object_mut() {
        metadata.insert("ccproxy_is_health_check".to_string(), Value::Bool(true));
    }
}

fn heuristic_provider(model: &str) -> Option<String> {
    let model = model.to_ascii_lowercase();
    if model.contains("claude") || model.contains("anthropic") {
        Some("anthropic".to_string())
    } else if model.contains("gemini") || model.contains("google") {
        Some("gemini".to_string())
    } else if model.contains("gpt") || model.contains("openai") {
        Some("openai".to_string())
    } else {
        None
    }
}

/// Retry request: the original envelope's completion fields plus the
/// refreshed bearer token and a bumped retry counter.
fn build_retry_request(request_data: &RequestData, token: &str, retry_count: u64) -> RequestData {
    let mut retry = Map::new();
    for key in [
        "model",
        "messages",
        "system",
        "temperature",
        "max_tokens",
        "stream",
        "tools",
        "tool_choice",
        "thinking",
    ] {
        if let Some(value) = request_data.get(key) {
            retry.insert(key.to_string(), value.clone());
        }
    }

    let mut metadata = request_data
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    metadata.insert(RETRY_COUNT_KEY.to_string(), json!(retry_count));
    retry.insert("metadata".to_string(), Value::Object(metadata));

    retry.insert(
        "extra_headers".to_string(),
        json!({
            "authorization": format!("Bearer {token}"),
            "x-api-key": "",
        }),
    );
    retry
}
