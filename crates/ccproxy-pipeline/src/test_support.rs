//! Shared fixtures for the crate's unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use ccproxy_credentials::CredentialStore;

use crate::classify::RequestClassifier;
use crate::context::RequestData;
use crate::hook::HookServices;
use crate::router::{ModelConfig, ModelListProvider, RoutingTable};
use crate::store::RequestMetadataStore;

pub struct StaticModels(pub Vec<ModelConfig>);

impl ModelListProvider for StaticModels {
    fn models(&self) -> Vec<ModelConfig> {
        self.0.clone()
    }
}

pub fn request(value: Value) -> RequestData {
    value.as_object().cloned().unwrap_or_default()
}

pub fn empty_services() -> HookServices {
    services_with(vec![], vec![])
}

pub fn services_with(
    models: Vec<ModelConfig>,
    rules: Vec<(String, crate::classify::Rule)>,
) -> HookServices {
    HookServices {
        classifier: Arc::new(RequestClassifier::new(rules)),
        router: Arc::new(RoutingTable::new(Arc::new(StaticModels(models)))),
        credentials: Arc::new(CredentialStore::new(BTreeMap::new(), 28800, 0.1)),
        metadata_store: Arc::new(RequestMetadataStore::new()),
        default_model_passthrough: true,
    }
}
