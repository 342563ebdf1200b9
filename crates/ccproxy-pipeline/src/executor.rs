//! DAG-ordered hook execution with per-hook error isolation.

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::context::{Context, RequestData};
use crate::dag::{DagResult, HookDag};
use crate::hook::{HookArgs, HookError, HookServices, HookSpec};
use crate::overrides::{HookOverride, OverrideSet};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Raised synchronously from a hook; surfaces to the client as a
    /// server error instead of being isolated.
    #[error("routing error: {0}")]
    Routing(String),
}

pub struct PipelineExecutor {
    dag: HookDag,
    services: HookServices,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor").finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    pub fn new(hooks: Vec<HookSpec>, services: HookServices) -> DagResult<Self> {
        let dag = HookDag::new(hooks)?;
        info!(order = ?dag.execution_order(), "pipeline execution order");
        let groups = dag.parallel_groups();
        if groups.iter().any(|group| group.len() > 1) {
            debug!(groups = ?groups, "parallel execution groups");
        }
        for warning in dag.validate() {
            warn!("dag validation: {warning}");
        }
        Ok(Self { dag, services })
    }

    pub fn dag(&self) -> &HookDag {
        &self.dag
    }

    pub fn execute(
        &self,
        data: RequestData,
        auth: Option<&Map<String, Value>>,
    ) -> PipelineResult<RequestData> {
        let mut ctx = Context::from_data(data);
        let overrides = OverrideSet::from_headers(&ctx.headers);
        if !overrides.is_empty() {
            debug!(header = %overrides.raw_header, "hook overrides");
        }

        for spec in self.dag.hooks_in_order() {
            ctx = run_hook(ctx, spec, &overrides, &self.services, auth)?;
        }
        Ok(ctx.to_data())
    }
}

fn run_hook(
    ctx: Context,
    spec: &HookSpec,
    overrides: &OverrideSet,
    services: &HookServices,
    auth: Option<&Map<String, Value>>,
) -> PipelineResult<Context> {
    match overrides.get(&spec.name) {
        HookOverride::ForceSkip => {
            debug!(hook = %spec.name, "skipped (override)");
            return Ok(ctx);
        }
        HookOverride::ForceRun => {}
        HookOverride::Normal => {
            if !spec.should_run(&ctx) {
                debug!(hook = %spec.name, "skipped (guard)");
                return Ok(ctx);
            }
        }
    }

    debug!(hook = %spec.name, "executing");
    let args = HookArgs {
        params: &spec.params,
        services,
        auth,
    };
    match (spec.handler)(ctx.clone(), &args) {
        Ok(next) => Ok(next),
        Err(HookError::Routing(message)) => Err(PipelineError::Routing(message)),
        Err(err) => {
            // Error isolation: the context flows on unchanged.
            error!(hook = %spec.name, error = %err, "hook failed");
            Ok(ctx)
        }
    }
}
