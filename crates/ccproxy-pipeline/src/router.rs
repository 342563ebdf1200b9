//! Label → upstream model resolution.
//!
//! The table is populated from an external model-list provider and read
//! lock-free on the request path; `reload_models` rebuilds the whole map
//! and swaps it in one piece, so readers see the old map or the new one,
//! never a mix.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LitellmParams {
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_llm_provider: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    #[serde(default)]
    pub litellm_params: LitellmParams,
}

impl ModelConfig {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The host framework's model list; implemented by the binary (from the
/// host config file) and by test stubs.
pub trait ModelListProvider: Send + Sync {
    fn models(&self) -> Vec<ModelConfig>;
}

pub struct RoutingTable {
    provider: Arc<dyn ModelListProvider>,
    map: ArcSwap<HashMap<String, Arc<ModelConfig>>>,
    reload_lock: Mutex<()>,
}

impl RoutingTable {
    pub fn new(provider: Arc<dyn ModelListProvider>) -> Self {
        let table = Self {
            provider,
            map: ArcSwap::from_pointee(HashMap::new()),
            reload_lock: Mutex::new(()),
        };
        table.reload_models();
        table
    }

    pub fn get_model_for_label(&self, label: &str) -> Option<Arc<ModelConfig>> {
        self.map.load().get(label).cloned()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.map.load().contains_key(label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.map.load().keys().cloned().collect()
    }

    /// Refetch the full list and atomically replace the map.
    pub fn reload_models(&self) {
        let _guard = self.reload_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::new();
        for config in self.provider.models() {
            next.insert(config.model_name.clone(), Arc::new(config));
        }
        debug!(labels = next.len(), "routing table reloaded");
        self.map.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        calls: AtomicUsize,
        first: Vec<ModelConfig>,
        later: Vec<ModelConfig>,
    }

    impl ModelListProvider for StubProvider {
        fn models(&self) -> Vec<ModelConfig> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.first.clone()
            } else {
                self.later.clone()
            }
        }
    }

    fn config(label: &str, model: &str) -> ModelConfig {
        ModelConfig {
            model_name: label.to_string(),
            litellm_params: LitellmParams {
                model: model.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn lookup_after_initial_load() {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            first: vec![config("background", "claude-haiku-4-5")],
            later: vec![],
        });
        let table = RoutingTable::new(provider);
        let found = table.get_model_for_label("background").unwrap();
        assert_eq!(found.litellm_params.model, "claude-haiku-4-5");
        assert!(table.get_model_for_label("default").is_none());
    }

    #[test]
    fn reload_swaps_whole_map() {
        let provider = Arc::new(StubProvider {
            calls: AtomicUsize::new(0),
            first: vec![config("old", "m1")],
            later: vec![config("new", "m2")],
        });
        let table = RoutingTable::new(provider);
        assert!(table.has_label("old"));
        table.reload_models();
        assert!(!table.has_label("old"));
        assert!(table.has_label("new"));
    }

    #[test]
    fn model_config_serializes_for_metadata() {
        let value = config("background", "claude-haiku-4-5").to_value();
        assert_eq!(value["model_name"], "background");
        assert_eq!(value["litellm_params"]["model"], "claude-haiku-4-5");
    }
}
