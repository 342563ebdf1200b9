//! Request transformation pipeline.
//!
//! Classification rules pick a routing label, the routing table resolves
//! it to an upstream model, and a DAG-ordered hook chain rewrites the
//! request (auth forwarding, beta headers, identity injection) before the
//! host framework dispatches it upstream.

pub mod classify;
pub mod context;
pub mod dag;
pub mod executor;
pub mod guards;
pub mod hook;
pub mod hooks;
pub mod overrides;
pub mod router;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use classify::{DEFAULT_LABEL, RequestClassifier, Rule, RuleError};
pub use context::{Context, RequestData};
pub use dag::{DagError, HookDag};
pub use executor::{PipelineError, PipelineExecutor, PipelineResult};
pub use hook::{GuardFn, HandlerFn, HookArgs, HookError, HookServices, HookSpec};
pub use hooks::{HookSetupError, OAUTH_SENTINEL_PREFIX, builtin_spec, specs_from_config};
pub use overrides::{HookOverride, OverrideSet};
pub use router::{LitellmParams, ModelConfig, ModelListProvider, RoutingTable};
pub use store::RequestMetadataStore;
