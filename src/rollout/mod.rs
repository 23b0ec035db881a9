//! Update state machine
//!
//! Sequences the scaling controller and completion gate into one of four
//! run modes. Every mode walks the session targets in sorted order, one
//! fleet at a time, and polls them together.

pub mod session;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cloud::CloudError;
use crate::fleet::{Capacity, FleetRegistry};
use crate::gate::{CompletionGate, GateError};
use crate::scaling::{ScalingController, ScalingError};
use crate::wait::Waiter;

pub use session::{
    CompletionSet, FleetPlan, RunMode, SessionOptions, UpdateSession, WORKER_NODE_DEFAULT,
};

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Scaling failed: {0}")]
    Scaling(#[from] ScalingError),

    #[error("Completion gate failed: {0}")]
    Gate(#[from] GateError),
}

impl RolloutError {
    /// True when the operator interrupted a wait
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RolloutError::Scaling(ScalingError::Cancelled(_))
                | RolloutError::Gate(GateError::Cancelled(_))
                | RolloutError::Gate(GateError::Scaling(ScalingError::Cancelled(_)))
        )
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub dry_run: bool,
    pub production: bool,
    pub completed: Vec<String>,
    /// Targets absent from the registry or deleted mid-run
    pub skipped: Vec<String>,
    pub passes: u32,
    pub mutations: usize,
}

/// Whether `account_id` belongs to a production account
pub fn production_flag(account_id: &str, production_accounts: &[String]) -> bool {
    production_accounts.iter().any(|a| a.trim() == account_id.trim())
}

/// Drives one session through its mode's phases
pub struct Orchestrator {
    scaling: Arc<ScalingController>,
    gate: CompletionGate,
    waiter: Waiter,
}

impl Orchestrator {
    pub fn new(scaling: Arc<ScalingController>, gate: CompletionGate, waiter: Waiter) -> Self {
        Self {
            scaling,
            gate,
            waiter,
        }
    }

    pub fn scaling(&self) -> &ScalingController {
        &self.scaling
    }

    /// Run the session's mode to completion
    ///
    /// The registry is updated with every capacity the run leaves behind,
    /// except in dry-run mode.
    pub async fn run(
        &self,
        registry: &mut FleetRegistry,
        session: &mut UpdateSession,
    ) -> Result<RunReport, RolloutError> {
        info!(
            mode = %session.mode(),
            fleets = session.targets().len(),
            dry_run = session.options.dry_run,
            production = session.options.production,
            "Starting run"
        );

        match session.mode() {
            RunMode::RollingUpdate => self.rolling_update(registry, session).await?,
            RunMode::ScaleDownOnly => {
                self.pin_all(registry, session, |_| Capacity::zero()).await?
            }
            RunMode::ScaleUpOnly { capacity } => {
                self.pin_all(registry, session, |_| Capacity::pinned(capacity))
                    .await?
            }
            RunMode::WorkerNodeReplacement => self.replace_workers(registry, session).await?,
        }

        session.absorb_vanished();
        session.discard_plans();
        let report = RunReport {
            mode: session.mode(),
            dry_run: session.options.dry_run,
            production: session.options.production,
            completed: session.completed().iter().cloned().collect(),
            skipped: session.skipped().iter().cloned().collect(),
            passes: session.passes(),
            mutations: self.scaling.mutations_issued(),
        };
        info!(
            completed = report.completed.len(),
            passes = report.passes,
            "Run finished"
        );
        Ok(report)
    }

    /// Skip and complete every target absent from the registry
    fn skip_missing(registry: &FleetRegistry, session: &mut UpdateSession) {
        let missing: Vec<String> = session
            .targets()
            .iter()
            .filter(|name| !registry.contains(name))
            .cloned()
            .collect();
        for name in missing {
            warn!(fleet = %name, "Fleet does not exist, skipping");
            session.mark_skipped(&name);
            session.completed_mut().insert(&name);
        }
    }

    fn record(&self, registry: &mut FleetRegistry, name: &str, capacity: Capacity) {
        if !self.scaling.is_dry_run() {
            registry.record_capacity(name, capacity);
        }
    }

    /// Classify the outcome of one fleet mutation
    ///
    /// A fleet deleted cloud-side is completed as vanished and the run moves
    /// on; any other failure aborts. Returns true when the mutation applied.
    fn applied(
        session: &mut UpdateSession,
        name: &str,
        result: Result<(), ScalingError>,
    ) -> Result<bool, RolloutError> {
        match result {
            Ok(()) => Ok(true),
            Err(ScalingError::Cloud(CloudError::FleetNotFound { .. })) => {
                warn!(fleet = %name, "Fleet disappeared mid-run, skipping");
                session.completed_mut().mark_vanished(name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn rolling_update(
        &self,
        registry: &mut FleetRegistry,
        session: &mut UpdateSession,
    ) -> Result<(), RolloutError> {
        Self::skip_missing(registry, session);

        for name in session.targets().to_vec() {
            let Some(fleet) = registry.get(&name).cloned() else {
                continue;
            };
            let target = self.scaling.targets_for(&fleet);
            session.set_plan(
                &name,
                FleetPlan::new(fleet.capacity, target, fleet.capacity.desired),
            );
            let result = self.scaling.scale_up(&fleet, target).await;
            if Self::applied(session, &name, result)? {
                self.record(registry, &name, target);
            }
        }

        if session.is_complete() {
            return Ok(());
        }

        if session.options.dry_run {
            info!("DRY RUN: skipping initial wait");
        } else {
            info!(
                minutes = session.options.initial_wait.as_secs() / 60,
                "Waiting for new instances to boot"
            );
            self.waiter
                .wait(session.options.initial_wait)
                .await
                .map_err(GateError::from)?;
        }

        let mut passes = 0;
        loop {
            let (targets, plans, completed) = session.poll_parts();
            let ready = self
                .gate
                .poll_pass(targets, registry, plans, completed, &self.scaling)
                .await?;
            passes += 1;

            for name in ready {
                let (Some(fleet), Some(plan)) =
                    (registry.get(&name).cloned(), session.plan(&name).copied())
                else {
                    continue;
                };
                let result = self
                    .scaling
                    .scale_down(&fleet, plan.target, plan.original)
                    .await;
                if Self::applied(session, &name, result)? {
                    self.record(registry, &name, plan.original);
                    session.completed_mut().insert(&name);
                    info!(fleet = %name, "Fleet rolled");
                }
            }

            if session.is_complete() {
                break;
            }
            self.gate
                .pause(session.targets(), session.completed(), passes)
                .await?;
        }

        session.add_passes(passes);
        Ok(())
    }

    /// Pin every target to `target_of(original)` and wait at its desired
    async fn pin_all(
        &self,
        registry: &mut FleetRegistry,
        session: &mut UpdateSession,
        target_of: impl Fn(Capacity) -> Capacity,
    ) -> Result<(), RolloutError> {
        Self::skip_missing(registry, session);

        for name in session.targets().to_vec() {
            let Some(fleet) = registry.get(&name).cloned() else {
                continue;
            };
            let target = target_of(fleet.capacity);
            session.set_plan(&name, FleetPlan::new(fleet.capacity, target, target.desired));
            let result = self.scaling.pin(&fleet, target).await;
            if Self::applied(session, &name, result)? {
                self.record(registry, &name, target);
            }
        }

        let (targets, plans, completed) = session.poll_parts();
        let passes = self
            .gate
            .await_completion(targets, registry, plans, completed, &self.scaling)
            .await?;
        session.add_passes(passes);
        Ok(())
    }

    async fn replace_workers(
        &self,
        registry: &mut FleetRegistry,
        session: &mut UpdateSession,
    ) -> Result<(), RolloutError> {
        Self::skip_missing(registry, session);

        let originals: Vec<(String, Capacity)> = session
            .targets()
            .iter()
            .filter_map(|name| registry.get(name).map(|f| (name.clone(), f.capacity)))
            .collect();

        info!(fleets = originals.len(), "Draining fleets to zero");
        for (name, original) in &originals {
            let Some(fleet) = registry.get(name).cloned() else {
                continue;
            };
            session.set_plan(name, FleetPlan::new(*original, Capacity::zero(), 0));
            let result = self.scaling.pin(&fleet, Capacity::zero()).await;
            if Self::applied(session, name, result)? {
                self.record(registry, name, Capacity::zero());
            }
        }

        let mut drained = session.completed().clone();
        let passes = self
            .gate
            .await_completion(
                session.targets(),
                registry,
                session.plans(),
                &mut drained,
                &self.scaling,
            )
            .await?;
        session.add_passes(passes);

        let vanished: Vec<String> = drained.vanished().cloned().collect();
        for name in &vanished {
            session.completed_mut().mark_vanished(name);
        }

        info!(fleets = originals.len(), "Restoring drained fleets");
        for (name, original) in &originals {
            if session.completed().is_vanished(name) {
                continue;
            }
            let Some(fleet) = registry.get(name).cloned() else {
                continue;
            };
            let restore = if original.desired == 0 {
                WORKER_NODE_DEFAULT
            } else {
                *original
            };
            session.set_plan(name, FleetPlan::new(*original, restore, restore.desired));
            let result = self.scaling.pin(&fleet, restore).await;
            if Self::applied(session, name, result)? {
                self.record(registry, name, restore);
            }
        }

        let (targets, plans, completed) = session.poll_parts();
        let passes = self
            .gate
            .await_completion(targets, registry, plans, completed, &self.scaling)
            .await?;
        session.add_passes(passes);
        Ok(())
    }
}
