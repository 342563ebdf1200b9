//! Hook specification: a named handler with a guard and declared
//! reads/writes the DAG orders by.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use ccproxy_credentials::CredentialStore;

use crate::classify::RequestClassifier;
use crate::context::Context;
use crate::router::RoutingTable;
use crate::store::RequestMetadataStore;

pub type HookResult = Result<Context, HookError>;
pub type HandlerFn = Arc<dyn Fn(Context, &HookArgs<'_>) -> HookResult + Send + Sync>;
pub type GuardFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Unrecoverable routing failure; the executor propagates this one
    /// instead of isolating it.
    #[error("routing error: {0}")]
    Routing(String),
    #[error("{0}")]
    Failed(String),
}

/// Shared services hooks draw on, passed alongside the per-hook params.
pub struct HookServices {
    pub classifier: Arc<RequestClassifier>,
    pub router: Arc<RoutingTable>,
    pub credentials: Arc<CredentialStore>,
    pub metadata_store: Arc<RequestMetadataStore>,
    pub default_model_passthrough: bool,
}

pub struct HookArgs<'a> {
    pub params: &'a Map<String, Value>,
    pub services: &'a HookServices,
    /// The host framework's per-request auth info, when it supplies one.
    pub auth: Option<&'a Map<String, Value>>,
}

#[derive(Clone)]
pub struct HookSpec {
    pub name: String,
    pub handler: HandlerFn,
    pub guard: GuardFn,
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
    pub params: Map<String, Value>,
}

impl HookSpec {
    pub fn new(name: impl Into<String>, handler: HandlerFn) -> Self {
        Self {
            name: name.into(),
            handler,
            guard: always_true(),
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            params: Map::new(),
        }
    }

    pub fn with_guard(mut self, guard: GuardFn) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_reads<I: IntoIterator<Item = &'static str>>(mut self, keys: I) -> Self {
        self.reads = keys.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_writes<I: IntoIterator<Item = &'static str>>(mut self, keys: I) -> Self {
        self.writes = keys.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn should_run(&self, ctx: &Context) -> bool {
        (self.guard)(ctx)
    }
}

impl PartialEq for HookSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for HookSpec {}

impl std::fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSpec")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish()
    }
}

pub fn always_true() -> GuardFn {
    Arc::new(|_| true)
}
