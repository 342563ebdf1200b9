//! Hook dependency graph.
//!
//! Hook B depends on hook A when A writes a key B reads. Kahn's algorithm
//! yields both the flat execution order and the ready-set groups; ties
//! resolve by registration order, so repeat builds over the same input
//! are stable. A cycle is a configuration error naming the hooks left in
//! the graph.

use std::collections::{BTreeSet, HashMap};

use crate::hook::HookSpec;

pub type DagResult<T> = Result<T, DagError>;

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    #[error("cycle in hook dependencies involving: {}", hooks.join(", "))]
    Cycle { hooks: Vec<String> },
}

pub struct HookDag {
    hooks: Vec<HookSpec>,
    order: Vec<usize>,
    groups: Vec<Vec<usize>>,
    deps: Vec<BTreeSet<usize>>,
}

impl std::fmt::Debug for HookDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDag")
            .field("order", &self.order)
            .field("groups", &self.groups)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

impl HookDag {
    pub fn new(hooks: Vec<HookSpec>) -> DagResult<Self> {
        // Same name means same hook; a re-registration replaces the
        // earlier spec but keeps its slot in the order.
        let mut deduped: Vec<HookSpec> = Vec::with_capacity(hooks.len());
        for spec in hooks {
            match deduped.iter_mut().find(|existing| existing.name == spec.name) {
                Some(existing) => *existing = spec,
                None => deduped.push(spec),
            }
        }

        let deps = build_dependencies(&deduped);
        let (order, groups) = kahn_order(&deduped, &deps)?;
        Ok(Self {
            hooks: deduped,
            order,
            groups,
            deps,
        })
    }

    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.hooks[i].name.as_str()).collect()
    }

    /// Successive ready-sets; informational for callers that want to
    /// parallelize independent hooks.
    pub fn parallel_groups(&self) -> Vec<Vec<&str>> {
        self.groups
            .iter()
            .map(|group| group.iter().map(|&i| self.hooks[i].name.as_str()).collect())
            .collect()
    }

    pub fn hooks_in_order(&self) -> impl Iterator<Item = &HookSpec> {
        self.order.iter().map(|&i| &self.hooks[i])
    }

    pub fn get_hook(&self, name: &str) -> Option<&HookSpec> {
        self.hooks.iter().find(|spec| spec.name == name)
    }

    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        let Some(idx) = self.hooks.iter().position(|spec| spec.name == name) else {
            return BTreeSet::new();
        };
        self.deps[idx]
            .iter()
            .map(|&i| self.hooks[i].name.clone())
            .collect()
    }

    /// Non-fatal configuration smells, logged at startup.
    pub fn validate(&self) -> Vec<String> {
        let mut writers: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut readers: HashMap<&str, Vec<&str>> = HashMap::new();
        for spec in &self.hooks {
            for key in &spec.writes {
                writers.entry(key.as_str()).or_default().push(spec.name.as_str());
            }
            for key in &spec.reads {
                readers.entry(key.as_str()).or_default().push(spec.name.as_str());
            }
        }

        let mut warnings = Vec::new();
        for spec in &self.hooks {
            for key in &spec.reads {
                if !writers.contains_key(key.as_str()) {
                    warnings.push(format!(
                        "hook '{}' reads '{key}' but no hook writes it",
                        spec.name
                    ));
                }
            }
        }
        for (key, key_writers) in &writers {
            if !readers.contains_key(key) {
                for writer in key_writers {
                    warnings.push(format!("hook '{writer}' writes '{key}' but no hook reads it"));
                }
            }
        }
        warnings.sort();
        warnings
    }
}

fn build_dependencies(hooks: &[HookSpec]) -> Vec<BTreeSet<usize>> {
    let mut key_writers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, spec) in hooks.iter().enumerate() {
        for key in &spec.writes {
            key_writers.entry(key.as_str()).or_default().push(idx);
        }
    }

    hooks
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            let mut deps = BTreeSet::new();
            for key in &spec.reads {
                if let Some(writers) = key_writers.get(key.as_str()) {
                    for &writer in writers {
                        if writer != idx {
                            deps.insert(writer);
                        }
                    }
                }
            }
            deps
        })
        .collect()
}

#[allow(clippy::type_complexity)]
fn kahn_order(
    hooks: &[HookSpec],
    deps: &[BTreeSet<usize>],
) -> DagResult<(Vec<usize>, Vec<Vec<usize>>)> {
    let n = hooks.len();
    let mut indegree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (idx, dep_set) in deps.iter().enumerate() {
        for &dep in dep_set {
            dependents[dep].push(idx);
        }
    }

    let mut done = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut groups = Vec::new();

    loop {
        let ready: Vec<usize> = (0..n)
            .filter(|&i| !done[i] && indegree[i] == 0)
            .collect();
        if ready.is_empty() {
            break;
        }
        for &idx in &ready {
            done[idx] = true;
            order.push(idx);
            for &dependent in &dependents[idx] {
                indegree[dependent] -= 1;
            }
        }
        groups.push(ready);
    }

    if order.len() != n {
        let hooks = (0..n)
            .filter(|&i| !done[i])
            .map(|i| hooks[i].name.clone())
            .collect();
        return Err(DagError::Cycle { hooks });
    }
    Ok((order, groups))
}
