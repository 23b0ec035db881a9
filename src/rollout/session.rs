//! Update session state
//!
//! One [`UpdateSession`] per invocation, owned by the caller and passed by
//! reference to each phase. Nothing here outlives the process.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::fleet::Capacity;

/// Default triple restored by worker-node replacement for fleets that were
/// already empty
pub const WORKER_NODE_DEFAULT: Capacity = Capacity {
    min: 1,
    desired: 1,
    max: 5,
};

/// The four phase sequences the orchestrator can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum RunMode {
    /// Double capacity, wait for health, shrink back
    RollingUpdate,
    /// Drain every fleet to `(0, 0, 0)`
    ScaleDownOnly,
    /// Pin every fleet to `(capacity, capacity, capacity)`
    ScaleUpOnly { capacity: u32 },
    /// Drain to zero, then restore
    WorkerNodeReplacement,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::RollingUpdate => f.write_str("rolling update"),
            RunMode::ScaleDownOnly => f.write_str("scale down"),
            RunMode::ScaleUpOnly { capacity } => write!(f, "scale up to {}", capacity),
            RunMode::WorkerNodeReplacement => f.write_str("worker node replacement"),
        }
    }
}

/// Per-fleet targets computed for the active phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FleetPlan {
    /// Capacity before the session touched the fleet
    pub original: Capacity,
    /// Capacity the phase drives toward; re-asserted on under-attachment
    pub target: Capacity,
    /// Healthy endpoints each balancer must report (0 means empty)
    pub threshold: u32,
}

impl FleetPlan {
    pub fn new(original: Capacity, target: Capacity, threshold: u32) -> Self {
        Self {
            original,
            target,
            threshold,
        }
    }
}

/// Fleets that finished the current phase; only ever grows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSet {
    names: BTreeSet<String>,
    /// Fleets completed because they were deleted cloud-side
    vanished: BTreeSet<String>,
}

impl CompletionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `name` was not already complete
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    /// Complete a fleet that no longer exists cloud-side
    pub fn mark_vanished(&mut self, name: &str) {
        self.names.insert(name.to_string());
        self.vanished.insert(name.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_vanished(&self, name: &str) -> bool {
        self.vanished.contains(name)
    }

    pub fn vanished(&self) -> impl Iterator<Item = &String> {
        self.vanished.iter()
    }

    /// True when every name in `targets` is complete
    pub fn covers(&self, targets: &[String]) -> bool {
        targets.iter().all(|name| self.names.contains(name))
    }

    /// Targets not yet complete, in target order
    pub fn remaining(&self, targets: &[String]) -> Vec<String> {
        targets
            .iter()
            .filter(|name| !self.names.contains(*name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.names.iter()
    }
}

/// Parameters fixed for the whole invocation
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub mode: RunMode,
    /// Pause between scale-up and the first health poll
    pub initial_wait: Duration,
    pub dry_run: bool,
    /// Derived from the account identity
    pub production: bool,
}

impl SessionOptions {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            initial_wait: Duration::from_secs(5 * 60),
            dry_run: false,
            production: false,
        }
    }

    pub fn with_initial_wait(mut self, wait: Duration) -> Self {
        self.initial_wait = wait;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}

/// State of one orchestrator invocation
#[derive(Debug, Clone)]
pub struct UpdateSession {
    pub options: SessionOptions,
    targets: Vec<String>,
    plans: BTreeMap<String, FleetPlan>,
    completed: CompletionSet,
    skipped: BTreeSet<String>,
    passes: u32,
}

impl UpdateSession {
    /// Targets are deduplicated and sorted
    pub fn new(targets: Vec<String>, options: SessionOptions) -> Self {
        let targets: BTreeSet<String> = targets.into_iter().collect();
        Self {
            options,
            targets: targets.into_iter().collect(),
            plans: BTreeMap::new(),
            completed: CompletionSet::new(),
            skipped: BTreeSet::new(),
            passes: 0,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.options.mode
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn plan(&self, name: &str) -> Option<&FleetPlan> {
        self.plans.get(name)
    }

    pub fn plans(&self) -> &BTreeMap<String, FleetPlan> {
        &self.plans
    }

    pub fn set_plan(&mut self, name: &str, plan: FleetPlan) {
        self.plans.insert(name.to_string(), plan);
    }

    pub fn completed(&self) -> &CompletionSet {
        &self.completed
    }

    pub fn completed_mut(&mut self) -> &mut CompletionSet {
        &mut self.completed
    }

    /// Borrow targets and plans alongside the mutable completion set
    pub fn poll_parts(&mut self) -> (&[String], &BTreeMap<String, FleetPlan>, &mut CompletionSet) {
        (&self.targets, &self.plans, &mut self.completed)
    }

    /// Record a target absent from the registry
    pub fn mark_skipped(&mut self, name: &str) {
        self.skipped.insert(name.to_string());
    }

    /// Record every fleet deleted mid-run as skipped
    pub fn absorb_vanished(&mut self) {
        self.skipped.extend(self.completed.vanished.iter().cloned());
    }

    pub fn skipped(&self) -> &BTreeSet<String> {
        &self.skipped
    }

    pub fn add_passes(&mut self, passes: u32) {
        self.passes += passes;
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn is_complete(&self) -> bool {
        self.completed.covers(&self.targets)
    }

    /// Drop the computed per-fleet targets at the end of a session
    pub fn discard_plans(&mut self) {
        self.plans.clear();
    }
}
