//! Parsing of the `x-ccproxy-hooks` request header.
//!
//! `+hook` forces a run (the guard is not consulted), `-hook` forces a
//! skip, a bare name is an explicit normal.

use std::collections::HashMap;

use ccproxy_common::{Headers, header_get};

pub const OVERRIDE_HEADER: &str = "x-ccproxy-hooks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookOverride {
    #[default]
    Normal,
    ForceRun,
    ForceSkip,
}

#[derive(Debug, Clone, Default)]
pub struct OverrideSet {
    overrides: HashMap<String, HookOverride>,
    pub raw_header: String,
}

impl OverrideSet {
    pub fn parse(header_value: Option<&str>) -> Self {
        let Some(header_value) = header_value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::default();
        };

        let mut overrides = HashMap::new();
        for part in header_value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(name) = part.strip_prefix('+') {
                if !name.is_empty() {
                    overrides.insert(name.to_string(), HookOverride::ForceRun);
                }
            } else if let Some(name) = part.strip_prefix('-') {
                if !name.is_empty() {
                    overrides.insert(name.to_string(), HookOverride::ForceSkip);
                }
            } else {
                overrides.insert(part.to_string(), HookOverride::Normal);
            }
        }

        Self {
            overrides,
            raw_header: header_value.to_string(),
        }
    }

    /// Header lookup is case-insensitive on the header name.
    pub fn from_headers(headers: &Headers) -> Self {
        Self::parse(header_get(headers, OVERRIDE_HEADER))
    }

    pub fn get(&self, hook_name: &str) -> HookOverride {
        self.overrides
            .get(hook_name)
            .copied()
            .unwrap_or(HookOverride::Normal)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn should_run(&self, hook_name: &str, guard_result: bool) -> bool {
        match self.get(hook_name) {
            HookOverride::ForceRun => true,
            HookOverride::ForceSkip => false,
            HookOverride::Normal => guard_result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header_parses_to_empty_set() {
        assert!(OverrideSet::parse(None).is_empty());
        assert!(OverrideSet::parse(Some("")).is_empty());
        assert!(OverrideSet::parse(Some("  ")).is_empty());
    }

    #[test]
    fn unmentioned_hooks_are_normal() {
        let set = OverrideSet::parse(Some("+forward_oauth"));
        assert_eq!(set.get("rule_evaluator"), HookOverride::Normal);
    }

    #[test]
    fn parses_all_three_forms() {
        let set = OverrideSet::parse(Some("+forward_oauth, -rule_evaluator, capture_headers"));
        assert_eq!(set.get("forward_oauth"), HookOverride::ForceRun);
        assert_eq!(set.get("rule_evaluator"), HookOverride::ForceSkip);
        assert_eq!(set.get("capture_headers"), HookOverride::Normal);
    }

    #[test]
    fn bare_signs_are_ignored() {
        let set = OverrideSet::parse(Some("+,-,,  ,"));
        assert!(set.is_empty());
    }

    #[test]
    fn header_name_is_case_insensitive() {
        let headers = vec![("X-CCProxy-Hooks".to_string(), "-capture_headers".to_string())];
        let set = OverrideSet::from_headers(&headers);
        assert_eq!(set.get("capture_headers"), HookOverride::ForceSkip);
    }

    #[test]
    fn should_run_respects_dominance() {
        let set = OverrideSet::parse(Some("+a,-b"));
        assert!(set.should_run("a", false));
        assert!(!set.should_run("b", true));
        assert!(set.should_run("c", true));
        assert!(!set.should_run("c", false));
    }
}
