//! Rule-based request classification.
//!
//! Rules are compiled in and selected by name from configuration; the
//! classifier walks them in configured order and the first match wins.

use ccproxy_config::RuleEntry;
use serde_json::Value;
use tracing::debug;

use crate::context::RequestData;

pub const DEFAULT_LABEL: &str = "default";

pub type RuleResult<T> = Result<T, RuleError>;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("unknown rule kind '{0}'")]
    UnknownRule(String),
    #[error("rule '{rule}' has invalid params: {reason}")]
    InvalidParams { rule: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Request carries a `thinking` field, any value.
    Thinking,
    /// Requested model name contains the needle, case-insensitively.
    MatchModel { needle: String },
    /// Some tool in the request's tool list has this exact name.
    MatchTool { name: String },
    /// Approximate token count of all message text reaches the threshold.
    TokenCount { threshold: usize },
}

impl Rule {
    pub fn from_entry(entry: &RuleEntry) -> RuleResult<(String, Rule)> {
        let kind = entry
            .rule_name()
            .map_err(|_| RuleError::UnknownRule(entry.rule.clone()))?;
        let rule = match kind {
            "ThinkingRule" => Rule::Thinking,
            "MatchModelRule" => Rule::MatchModel {
                needle: string_param(&entry.params, &["substring", "needle", "substr"])
                    .ok_or_else(|| RuleError::InvalidParams {
                        rule: kind.to_string(),
                        reason: "expected a substring parameter".to_string(),
                    })?
                    .to_ascii_lowercase(),
            },
            "MatchToolRule" => Rule::MatchTool {
                name: string_param(&entry.params, &["name", "tool_name"]).ok_or_else(|| {
                    RuleError::InvalidParams {
                        rule: kind.to_string(),
                        reason: "expected a tool name parameter".to_string(),
                    }
                })?,
            },
            "TokenCountRule" => Rule::TokenCount {
                threshold: number_param(&entry.params, &["threshold", "token_count"]).ok_or_else(
                    || RuleError::InvalidParams {
                        rule: kind.to_string(),
                        reason: "expected a numeric threshold".to_string(),
                    },
                )?,
            },
            other => return Err(RuleError::UnknownRule(other.to_string())),
        };
        Ok((entry.name.clone(), rule))
    }

    pub fn evaluate(&self, data: &RequestData) -> bool {
        match self {
            Rule::Thinking => data.contains_key("thinking"),
            Rule::MatchModel { needle } => data
                .get("model")
                .and_then(Value::as_str)
                .is_some_and(|model| model.to_ascii_lowercase().contains(needle)),
            Rule::MatchTool { name } => data
                .get("tools")
                .and_then(Value::as_array)
                .is_some_and(|tools| {
                    !tools.is_empty()
                        && tools.iter().any(|tool| {
                            tool.get("name").and_then(Value::as_str) == Some(name.as_str())
                        })
                }),
            Rule::TokenCount { threshold } => approximate_token_count(data) >= *threshold,
        }
    }
}

/// Positional (`["haiku"]`), keyword (`[{"substring": "haiku"}]` or
/// `{"substring": "haiku"}`) and bare scalar parameter forms are accepted,
/// matching what the config file historically allowed.
fn string_param(params: &Value, keys: &[&str]) -> Option<String> {
    scalar_param(params, keys).and_then(|v| v.as_str().map(str::to_string))
}

fn number_param(params: &Value, keys: &[&str]) -> Option<usize> {
    scalar_param(params, keys).and_then(|v| v.as_u64().map(|n| n as usize))
}

fn scalar_param(params: &Value, keys: &[&str]) -> Option<Value> {
    match params {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(map) => {
                        for key in keys {
                            if let Some(value) = map.get(*key) {
                                return Some(value.clone());
                            }
                        }
                    }
                    other => return Some(other.clone()),
                }
            }
            None
        }
        Value::Object(map) => {
            for key in keys {
                if let Some(value) = map.get(*key) {
                    return Some(value.clone());
                }
            }
            None
        }
        Value::Null => None,
        other => Some(other.clone()),
    }
}

/// Rough token estimate: total characters of textual message content
/// divided by four. Monotonic in text length, which is all the routing
/// threshold needs.
pub fn approximate_token_count(data: &RequestData) -> usize {
    let Some(messages) = data.get("messages").and_then(Value::as_array) else {
        return 0;
    };
    let chars: usize = messages
        .iter()
        .map(|message| match message.get("content") {
            Some(Value::String(text)) => text.chars().count(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .map(|text| text.chars().count())
                .sum(),
            _ => 0,
        })
        .sum();
    chars / 4
}

pub struct RequestClassifier {
    rules: Vec<(String, Rule)>,
}

impl RequestClassifier {
    pub fn new(rules: Vec<(String, Rule)>) -> Self {
        Self { rules }
    }

    pub fn from_config(entries: &[RuleEntry]) -> RuleResult<Self> {
        let rules = entries.iter().map(Rule::from_entry).collect::<RuleResult<_>>()?;
        Ok(Self::new(rules))
    }

    /// First matching rule wins; no match is the `default` label.
    pub fn classify(&self, data: &RequestData) -> String {
        for (label, rule) in &self.rules {
            if rule.evaluate(data) {
                debug!(label = %label, "rule matched");
                return label.clone();
            }
        }
        DEFAULT_LABEL.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> RequestData {
        value.as_object().cloned().unwrap_or_default()
    }

    fn entry(name: &str, rule: &str, params: Value) -> RuleEntry {
        serde_json::from_value(json!({"name": name, "rule": rule, "params": params}))
            .unwrap()
    }

    #[test]
    fn thinking_rule_matches_on_key_presence() {
        let rule = Rule::Thinking;
        assert!(rule.evaluate(&data(json!({"thinking": null}))));
        assert!(rule.evaluate(&data(json!({"thinking": {"budget_tokens": 1}}))));
        assert!(!rule.evaluate(&data(json!({"model": "claude"}))));
    }

    #[test]
    fn match_model_is_case_insensitive_substring() {
        let rule = Rule::MatchModel {
            needle: "haiku".to_string(),
        };
        assert!(rule.evaluate(&data(json!({"model": "claude-HAIKU-4-5"}))));
        assert!(!rule.evaluate(&data(json!({"model": "claude-sonnet-4-5"}))));
        assert!(!rule.evaluate(&data(json!({}))));
    }

    #[test]
    fn match_tool_requires_exact_name() {
        let rule = Rule::MatchTool {
            name: "WebSearch".to_string(),
        };
        assert!(rule.evaluate(&data(json!({"tools": [{"name": "WebSearch"}]}))));
        assert!(!rule.evaluate(&data(json!({"tools": [{"name": "websearch"}]}))));
        assert!(!rule.evaluate(&data(json!({"tools": []}))));
        assert!(!rule.evaluate(&data(json!({}))));
    }

    #[test]
    fn token_count_zero_matches_any_nonempty_messages() {
        let rule = Rule::TokenCount { threshold: 0 };
        assert!(rule.evaluate(&data(json!({"messages": [{"role": "user", "content": "x"}]}))));
        assert!(rule.evaluate(&data(json!({"messages": []}))));
    }

    #[test]
    fn token_count_threshold_is_monotonic() {
        let short = data(json!({"messages": [{"role": "user", "content": "hi"}]}));
        let long = data(json!({"messages": [{"role": "user", "content": "a".repeat(400)}]}));
        let rule = Rule::TokenCount { threshold: 50 };
        assert!(!rule.evaluate(&short));
        assert!(rule.evaluate(&long));
        assert!(approximate_token_count(&long) > approximate_token_count(&short));
    }

    #[test]
    fn token_count_reads_content_blocks() {
        let blocks = data(json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "b".repeat(200)},
                {"type": "image", "source": {}}
            ]}]
        }));
        assert_eq!(approximate_token_count(&blocks), 50);
    }

    #[test]
    fn classifier_first_match_wins() {
        let classifier = RequestClassifier::new(vec![
            ("thinking".to_string(), Rule::Thinking),
            (
                "background".to_string(),
                Rule::MatchModel {
                    needle: "haiku".to_string(),
                },
            ),
        ]);
        let both = data(json!({"thinking": {}, "model": "claude-haiku-4-5"}));
        assert_eq!(classifier.classify(&both), "thinking");
        let haiku = data(json!({"model": "claude-haiku-4-5"}));
        assert_eq!(classifier.classify(&haiku), "background");
        let neither = data(json!({"model": "claude-sonnet-4-5"}));
        assert_eq!(classifier.classify(&neither), DEFAULT_LABEL);
    }

    #[test]
    fn rules_build_from_config_entries() {
        let entries = vec![
            entry("thinking", "ccproxy.rules.ThinkingRule", json!(null)),
            entry("background", "ccproxy.rules.MatchModelRule", json!(["haiku"])),
            entry("tool", "MatchToolRule", json!([{"name": "WebSearch"}])),
            entry("long", "TokenCountRule", json!([{"threshold": 1000}])),
        ];
        let classifier = RequestClassifier::from_config(&entries).unwrap();
        let haiku = data(json!({"model": "claude-haiku-4-5"}));
        assert_eq!(classifier.classify(&haiku), "background");
    }

    #[test]
    fn unknown_rule_kind_is_fatal() {
        let entries = vec![entry("x", "ccproxy.rules.NoSuchRule", json!(null))];
        assert!(matches!(
            RequestClassifier::from_config(&entries),
            Err(RuleError::UnknownRule(_))
        ));
    }

    #[test]
    fn match_model_missing_params_is_fatal() {
        let entries = vec![entry("x", "MatchModelRule", json!(null))];
        assert!(matches!(
            RequestClassifier::from_config(&entries),
            Err(RuleError::InvalidParams { .. })
        ));
    }
}
