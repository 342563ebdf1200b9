//! Anthropic OAuth plumbing shared by the pipeline hooks and the MITM
//! addon: beta-header merging and the Claude Code identity prelude.

use serde_json::{Value, json};

/// System prelude Anthropic requires on OAuth-authenticated requests.
pub const CLAUDE_CODE_SYSTEM_PREFIX: &str =
    "You are Claude Code, Anthropic's official CLI for Claude.";

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Merge required betas with an existing comma-separated header value.
/// Required entries come first; duplicates collapse, order is preserved.
pub fn merge_beta_headers<'a>(
    required: &[&str],
    existing: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut merged: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let entry = raw.trim();
        if entry.is_empty() {
            return;
        }
        if !merged.iter().any(|seen| seen == entry) {
            merged.push(entry.to_string());
        }
    };
    for beta in required {
        push(beta);
    }
    for value in existing {
        for part in value.split(',') {
            push(part);
        }
    }
    merged.join(",")
}

/// Prepend the Claude Code identity prefix to a system prompt unless it
/// is already present. Handles the string form, the content-block array
/// form and a missing prompt. Returns the new value and whether anything
/// changed.
pub fn apply_identity_prefix(system: Option<Value>) -> (Value, bool) {
    match system {
        None => (Value::String(CLAUDE_CODE_SYSTEM_PREFIX.to_string()), true),
        Some(Value::String(text)) => {
            if text.contains(CLAUDE_CODE_SYSTEM_PREFIX) {
                (Value::String(text), false)
            } else {
                (
                    Value::String(format!("{CLAUDE_CODE_SYSTEM_PREFIX}\n\n{text}")),
                    true,
                )
            }
        }
        Some(Value::Array(mut blocks)) => {
            let has_prefix = blocks.iter().any(|block| {
                block.get("type").and_then(Value::as_str) == Some("text")
                    && block
                        .get("text")
                        .and_then(Value::as_str)
                        .is_some_and(|text| text.contains(CLAUDE_CODE_SYSTEM_PREFIX))
            });
            if has_prefix {
                (Value::Array(blocks), false)
            } else {
                blocks.insert(0, json!({"type": "text", "text": CLAUDE_CODE_SYSTEM_PREFIX}));
                (Value::Array(blocks), true)
            }
        }
        Some(other) => (other, false),
    }
}
