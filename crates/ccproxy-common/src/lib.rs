//! Shared primitives for the ccproxy workspace.

pub mod anthropic;
pub mod headers;
pub mod redact;

pub use anthropic::{
    ANTHROPIC_VERSION, CLAUDE_CODE_SYSTEM_PREFIX, apply_identity_prefix, merge_beta_headers,
};
pub use headers::{Headers, header_get, header_remove, header_set, lower_keys};
pub use redact::redact_header_value;

/// Generate a request call id when the inbound envelope carries none.
pub fn new_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
