//! Typed view over the host framework's request envelope.
//!
//! The envelope is free-form JSON; `Context` lifts the fields hooks care
//! about into owned values and keeps everything else in `raw` so
//! `to_data` round-trips unmodeled fields untouched. A Context belongs to
//! exactly one request; hooks receive it by value and hand it back.

use ccproxy_common::{Headers, header_get};
use serde_json::{Map, Value};

pub type RequestData = Map<String, Value>;

pub const META_MODEL_NAME: &str = "ccproxy_model_name";
pub const META_ALIAS_MODEL: &str = "ccproxy_alias_model";
pub const META_LITELLM_MODEL: &str = "ccproxy_litellm_model";
pub const META_MODEL_CONFIG: &str = "ccproxy_model_config";
pub const META_IS_PASSTHROUGH: &str = "ccproxy_is_passthrough";
pub const META_IS_HEALTH_CHECK: &str = "ccproxy_is_health_check";

#[derive(Debug, Clone, Default)]
pub struct Context {
    pub model: String,
    pub messages: Vec<Value>,
    pub metadata: Map<String, Value>,
    /// System prompt: a string or an array of typed blocks.
    pub system: Option<Value>,
    /// Visible request headers, keys lowercased.
    pub headers: Headers,
    /// Sensitive headers from `secret_fields.raw_headers`, keys lowercased.
    pub raw_headers: Headers,
    /// Headers forwarded upstream via `provider_specific_header`.
    pub provider_headers: Map<String, Value>,
    pub litellm_call_id: String,
    pub api_key: Option<String>,
    raw: RequestData,
}

impl Context {
    pub fn from_data(data: RequestData) -> Self {
        let headers = data
            .get("proxy_server_request")
            .and_then(Value::as_object)
            .and_then(|psr| psr.get("headers"))
            .and_then(Value::as_object)
            .map(lowered_headers)
            .unwrap_or_default();

        let raw_headers = data
            .get("secret_fields")
            .and_then(Value::as_object)
            .and_then(|secret| secret.get("raw_headers"))
            .and_then(Value::as_object)
            .map(lowered_headers)
            .unwrap_or_default();

        let provider_headers = data
            .get("provider_specific_header")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Self {
            model: data
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            messages: data
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            metadata: data
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            system: data.get("system").cloned(),
            headers,
            raw_headers,
            provider_headers,
            litellm_call_id: data
                .get("litellm_call_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            api_key: data
                .get("api_key")
                .and_then(Value::as_str)
                .map(str::to_string),
            raw: data,
        }
    }

    pub fn to_data(self) -> RequestData {
        let mut data = self.raw;
        data.insert("model".to_string(), Value::String(self.model));
        data.insert("messages".to_string(), Value::Array(self.messages));
        data.insert("metadata".to_string(), Value::Object(self.metadata));
        match self.system {
            Some(system) => {
                data.insert("system".to_string(), system);
            }
            None => {
                data.remove("system");
            }
        }
        if !self.provider_headers.is_empty() || data.contains_key("provider_specific_header") {
            data.insert(
                "provider_specific_header".to_string(),
                Value::Object(self.provider_headers),
            );
        }
        if !self.litellm_call_id.is_empty() {
            data.insert(
                "litellm_call_id".to_string(),
                Value::String(self.litellm_call_id),
            );
        }
        if let Some(api_key) = self.api_key {
            data.insert("api_key".to_string(), Value::String(api_key));
        }
        data
    }

    /// Unmodeled envelope fields (read-only).
    pub fn raw(&self) -> &RequestData {
        &self.raw
    }

    /// Unmodeled envelope fields, for hooks that write top-level keys the
    /// Context does not lift (e.g. `extra_headers`).
    pub fn raw_mut(&mut self) -> &mut RequestData {
        &mut self.raw
    }

    pub fn proxy_request(&self) -> Option<&Map<String, Value>> {
        self.raw.get("proxy_server_request").and_then(Value::as_object)
    }

    pub fn has_proxy_request(&self) -> bool {
        self.proxy_request().is_some()
    }

    /// Header lookup, raw (sensitive) headers first.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        header_get(&self.raw_headers, name).or_else(|| header_get(&self.headers, name))
    }

    pub fn authorization(&self) -> &str {
        self.get_header("authorization").unwrap_or_default()
    }

    pub fn x_api_key(&self) -> &str {
        self.get_header("x-api-key").unwrap_or_default()
    }

    pub fn set_provider_header(&mut self, name: &str, value: impl Into<String>) {
        let extra = self
            .provider_headers
            .entry("extra_headers".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(extra) = extra.as_object_mut() {
            extra.insert(name.to_string(), Value::String(value.into()));
        }
    }

    pub fn get_provider_header(&self, name: &str) -> Option<&str> {
        self.provider_headers
            .get("extra_headers")
            .and_then(Value::as_object)
            .and_then(|extra| extra.get(name))
            .and_then(Value::as_str)
    }

    /// The framework requires `custom_llm_provider` whenever
    /// `provider_specific_header` is present; never overwrite one a prior
    /// hook already chose.
    pub fn ensure_custom_llm_provider(&mut self, provider: &str) {
        self.provider_headers
            .entry("custom_llm_provider".to_string())
            .or_insert_with(|| Value::String(provider.to_string()));
    }

    fn meta_str(&self, key: &str) -> &str {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn model_name(&self) -> &str {
        self.meta_str(META_MODEL_NAME)
    }

    pub fn set_model_name(&mut self, value: impl Into<String>) {
        self.metadata
            .insert(META_MODEL_NAME.to_string(), Value::String(value.into()));
    }

    pub fn alias_model(&self) -> &str {
        self.meta_str(META_ALIAS_MODEL)
    }

    pub fn set_alias_model(&mut self, value: impl Into<String>) {
        self.metadata
            .insert(META_ALIAS_MODEL.to_string(), Value::String(value.into()));
    }

    pub fn litellm_model(&self) -> &str {
        self.meta_str(META_LITELLM_MODEL)
    }

    pub fn set_litellm_model(&mut self, value: impl Into<String>) {
        self.metadata
            .insert(META_LITELLM_MODEL.to_string(), Value::String(value.into()));
    }

    pub fn model_config(&self) -> Option<&Map<String, Value>> {
        self.metadata.get(META_MODEL_CONFIG).and_then(Value::as_object)
    }

    pub fn set_model_config(&mut self, value: Value) {
        self.metadata.insert(META_MODEL_CONFIG.to_string(), value);
    }

    pub fn is_passthrough(&self) -> bool {
        self.metadata
            .get(META_IS_PASSTHROUGH)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_passthrough(&mut self, value: bool) {
        self.metadata
            .insert(META_IS_PASSTHROUGH.to_string(), Value::Bool(value));
    }

    pub fn is_health_check(&self) -> bool {
        if self
            .metadata
            .get(META_IS_HEALTH_CHECK)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return true;
        }
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .is_some_and(|tags| {
                tags.iter()
                    .any(|tag| tag.as_str() == Some("litellm-internal-health-check"))
            })
    }

    pub fn set_health_check(&mut self, value: bool) {
        self.metadata
            .insert(META_IS_HEALTH_CHECK.to_string(), Value::Bool(value));
    }

    pub fn trace_metadata_mut(&mut self) -> &mut Map<String, Value> {
        let entry = self
            .metadata
            .entry("trace_metadata".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut().unwrap_or_else(|| unreachable!())
    }
}

fn lowered_headers(map: &Map<String, Value>) -> Headers {
    map.iter()
        .filter_map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((k.to_ascii_lowercase(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_data() -> RequestData {
        json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "hi"}],
            "metadata": {"existing": true},
            "litellm_call_id": "call-1",
            "proxy_server_request": {
                "method": "POST",
                "url": "http://localhost:4000/v1/messages",
                "headers": {"User-Agent": "claude-cli/2.0", "X-CCProxy-Hooks": "-capture_headers"}
            },
            "secret_fields": {
                "raw_headers": {"Authorization": "Bearer sk-ant-oat01-abc"}
            },
            "unmodeled": {"keep": "me"}
        })
        .as_object()
        .cloned()
        .unwrap_or_default()
    }

    #[test]
    fn round_trips_unmodeled_fields() {
        let data = sample_data();
        let out = Context::from_data(data.clone()).to_data();
        assert_eq!(out.get("unmodeled"), data.get("unmodeled"));
        assert_eq!(out.get("model"), data.get("model"));
        assert_eq!(out.get("messages"), data.get("messages"));
        assert!(!out.contains_key("system"));
        assert!(!out.contains_key("provider_specific_header"));
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_prefers_raw() {
        let ctx = Context::from_data(sample_data());
        assert_eq!(ctx.get_header("user-agent"), Some("claude-cli/2.0"));
        assert_eq!(ctx.get_header("USER-AGENT"), Some("claude-cli/2.0"));
        assert_eq!(ctx.authorization(), "Bearer sk-ant-oat01-abc");
    }

    #[test]
    fn raw_headers_shadow_visible_headers() {
        let mut data = sample_data();
        let psr = data
            .get_mut("proxy_server_request")
            .and_then(Value::as_object_mut)
            .unwrap();
        psr.get_mut("headers")
            .and_then(Value::as_object_mut)
            .unwrap()
            .insert("authorization".to_string(), json!("Bearer scrubbed"));
        let ctx = Context::from_data(data);
        assert_eq!(ctx.authorization(), "Bearer sk-ant-oat01-abc");
    }

    #[test]
    fn provider_header_set_and_get() {
        let mut ctx = Context::from_data(sample_data());
        ctx.set_provider_header("authorization", "Bearer x");
        ctx.ensure_custom_llm_provider("anthropic");
        ctx.ensure_custom_llm_provider("openai");
        assert_eq!(ctx.get_provider_header("authorization"), Some("Bearer x"));
        assert_eq!(
            ctx.provider_headers.get("custom_llm_provider"),
            Some(&json!("anthropic"))
        );

        let data = ctx.to_data();
        let psh = data
            .get("provider_specific_header")
            .and_then(Value::as_object)
            .unwrap();
        assert!(psh.contains_key("extra_headers"));
    }

    #[test]
    fn metadata_accessors() {
        let mut ctx = Context::from_data(sample_data());
        assert_eq!(ctx.model_name(), "");
        ctx.set_model_name("background");
        ctx.set_alias_model("claude-sonnet-4-5");
        ctx.set_passthrough(true);
        assert_eq!(ctx.model_name(), "background");
        assert_eq!(ctx.alias_model(), "claude-sonnet-4-5");
        assert!(ctx.is_passthrough());
        assert!(!ctx.is_health_check());
    }

    #[test]
    fn health_check_detected_from_tag() {
        let mut data = sample_data();
        data.insert(
            "metadata".to_string(),
            json!({"tags": ["litellm-internal-health-check"]}),
        );
        let ctx = Context::from_data(data);
        assert!(ctx.is_health_check());
    }

    #[test]
    fn system_removed_when_cleared() {
        let mut data = sample_data();
        data.insert("system".to_string(), json!("be terse"));
        let mut ctx = Context::from_data(data);
        assert_eq!(ctx.system, Some(json!("be terse")));
        ctx.system = None;
        assert!(!ctx.to_data().contains_key("system"));
    }
}
