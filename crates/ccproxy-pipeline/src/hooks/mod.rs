//! The built-in hook set.
//!
//! Hooks are compiled in and selected by name from configuration; a
//! dotted path in the config resolves by its final segment. Unknown
//! names are startup errors.

use ccproxy_config::{CcproxyConfig, ConfigError};
use ccproxy_credentials::CredentialStore;
use serde_json::{Map, Value};

use crate::hook::HookSpec;

pub mod add_beta_headers;
pub mod capture_headers;
pub mod extract_session_id;
pub mod forward_apikey;
pub mod forward_oauth;
pub mod inject_claude_code_identity;
pub mod model_router;
pub mod rule_evaluator;

/// Sentinel bearer-token prefix that triggers OAuth substitution from the
/// credential store. The suffix names the provider.
pub const OAUTH_SENTINEL_PREFIX: &str = "sk-ant-oat-ccproxy-";

/// Betas Anthropic requires before it accepts Claude Max OAuth tokens.
pub const ANTHROPIC_BETA_HEADERS: &[&str] = &[
    "oauth-2025-04-20",
    "claude-code-20250219",
    "interleaved-thinking-2025-05-14",
    "fine-grained-tool-streaming-2025-05-14",
];

/// Default pipeline when the config lists no hooks.
pub const DEFAULT_HOOK_ORDER: &[&str] = &[
    "rule_evaluator",
    "model_router",
    "extract_session_id",
    "capture_headers",
    "forward_oauth",
    "add_beta_headers",
    "inject_claude_code_identity",
];

pub type HookSetupResult<T> = Result<T, HookSetupError>;

#[derive(Debug, thiserror::Error)]
pub enum HookSetupError {
    #[error("unknown hook '{0}'")]
    UnknownHook(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub fn builtin_spec(name: &str, params: Map<String, Value>) -> Option<HookSpec> {
    let spec = match name {
        "rule_evaluator" => rule_evaluator::spec(),
        "model_router" => model_router::spec(),
        "extract_session_id" => extract_session_id::spec(),
        "capture_headers" => capture_headers::spec(),
        "forward_oauth" => forward_oauth::spec(),
        "forward_apikey" => forward_apikey::spec(),
        "add_beta_headers" => add_beta_headers::spec(),
        "inject_claude_code_identity" => inject_claude_code_identity::spec(),
        _ => return None,
    };
    Some(spec.with_params(params))
}

/// Resolve the configured hook list (or the default set when the config
/// lists none) against the compiled-in registry.
pub fn specs_from_config(config: &CcproxyConfig) -> HookSetupResult<Vec<HookSpec>> {
    if config.hooks.is_empty() {
        return Ok(DEFAULT_HOOK_ORDER
            .iter()
            .filter_map(|name| builtin_spec(name, Map::new()))
            .collect());
    }

    config
        .hooks
        .iter()
        .map(|entry| {
            let name = entry.name()?;
            builtin_spec(name, entry.params())
                .ok_or_else(|| HookSetupError::UnknownHook(name.to_string()))
        })
        .collect()
}

/// Resolve the credential provider for a routed model: which configured
/// token source pays for this request.
///
/// Priority: explicit `custom_llm_provider`, then destination matching
/// against configured credential sources, then model-name heuristics.
/// A z.ai destination resolves to its own source name here; use
/// [`anthropic_wire_provider`] when the question is wire protocol, not
/// credentials.
pub(crate) fn detect_provider(
    routed_model: &str,
    custom_provider: Option<String>,
    api_base: Option<&str>,
    credentials: &CredentialStore,
) -> Option<String> {
    if let Some(provider) = custom_provider {
        return Some(provider);
    }
    if let Some(provider) = credentials.get_provider_for_destination(api_base) {
        return Some(provider);
    }
    heuristic_provider(routed_model)
}

/// Normalize any Anthropic-wire-protocol upstream to `anthropic`.
///
/// Hosts like z.ai speak Anthropic's protocol and need the same
/// impersonation headers even though their credentials resolve to their
/// own source. Hooks gating on the wire protocol go through here so new
/// family hosts only need the one list in `guards`.
pub(crate) fn anthropic_wire_provider(
    routed_model: &str,
    custom_provider: Option<&str>,
    api_base: Option<&str>,
) -> Option<&'static str> {
    if custom_provider == Some("anthropic") {
        return Some("anthropic");
    }
    if let Some(api_base) = api_base {
        let api_base = api_base.to_ascii_lowercase();
        if crate::guards::ANTHROPIC_FAMILY_HOSTS
            .iter()
            .any(|host| api_base.contains(host))
        {
            return Some("anthropic");
        }
    }
    if routed_model.to_ascii_lowercase().contains("claude") {
        return Some("anthropic");
    }
    None
}

pub(crate) fn heuristic_provider(model: &str) -> Option<String> {
    let model = model.to_ascii_lowercase();
    if model.contains("claude") {
        Some("anthropic".to_string())
    } else if model.contains("gemini") || model.contains("palm") {
        Some("gemini".to_string())
    } else if model.contains("gpt") {
        Some("openai".to_string())
    } else {
        None
    }
}
