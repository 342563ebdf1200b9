//! Redaction for sensitive header values captured into traces.
//!
//! Known credential headers keep an identifying prefix (`Bearer sk-ant-`)
//! and the last four characters with `...` in between, so a trace can tell
//! token kinds apart without storing the secret. Cookies are dropped
//! entirely; everything else is only truncated.

const MAX_PLAIN_LEN: usize = 200;

pub fn redact_header_value(name: &str, value: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "authorization" => redact_secret(value, authorization_prefix_len(value)),
        "x-api-key" => redact_secret(value, sk_prefix_len(value).unwrap_or(0)),
        "cookie" => "[REDACTED]".to_string(),
        _ => value.chars().take(MAX_PLAIN_LEN).collect(),
    }
}

fn redact_secret(value: &str, prefix_len: usize) -> String {
    let prefix: String = value.chars().take(prefix_len).collect();
    let suffix: String = if value.chars().count() > 8 {
        let skip = value.chars().count().saturating_sub(4);
        value.chars().skip(skip).collect()
    } else {
        String::new()
    };
    format!("{prefix}...{suffix}")
}

/// Longest prefix of `Bearer sk-<alpha>-`, `Bearer ` or `sk-<alpha>-`.
fn authorization_prefix_len(value: &str) -> usize {
    if let Some(rest) = value.strip_prefix("Bearer ") {
        return "Bearer ".len() + sk_prefix_len(rest).unwrap_or(0);
    }
    sk_prefix_len(value).unwrap_or(0)
}

/// Length of a leading `sk-<alpha>-` run, e.g. `sk-ant-`.
fn sk_prefix_len(value: &str) -> Option<usize> {
    let rest = value.strip_prefix("sk-")?;
    let alpha = rest.chars().take_while(|c| c.is_ascii_lowercase()).count();
    if alpha == 0 {
        return None;
    }
    if rest[alpha..].starts_with('-') {
        Some("sk-".len() + alpha + 1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_keeps_prefix_and_suffix() {
        let value = "Bearer sk-ant-REDACTED";
        assert_eq!(
            redact_header_value("Authorization", value),
            "Bearer sk-ant-...wxyz"
        );
    }

    #[test]
    fn bare_bearer_without_sk_prefix() {
        assert_eq!(
            redact_header_value("authorization", "Bearer sometoken123"),
            "Bearer ...n123"
        );
    }

    #[test]
    fn api_key_redaction() {
        assert_eq!(
            redact_header_value("x-api-key", "sk-ant-REDACTED"),
            "sk-ant-...abcd"
        );
    }

    #[test]
    fn short_values_keep_no_suffix() {
        assert_eq!(redact_header_value("authorization", "Bearer x"), "Bearer ...");
    }

    #[test]
    fn cookie_is_fully_redacted() {
        assert_eq!(redact_header_value("Cookie", "session=abc"), "[REDACTED]");
    }

    #[test]
    fn other_headers_truncate_to_200() {
        let long = "a".repeat(300);
        let out = redact_header_value("user-agent", &long);
        assert_eq!(out.len(), 200);
    }
}
