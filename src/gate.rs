//! Completion gate
//!
//! Polls every balancer attached to each session fleet until it reports
//! enough healthy endpoints for the phase's threshold. Each pass:
//! 1. skips fleets already complete, completes fleets missing from the registry
//! 2. re-asserts the target capacity on under-attached balancers
//! 3. requires every balancer to meet the threshold
//!
//! Passes repeat on a fixed interval under a [`RetryPolicy`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cloud::CloudError;
use crate::fleet::{FleetDescriptor, FleetRegistry};
use crate::health::Balancer;
use crate::rollout::session::{CompletionSet, FleetPlan};
use crate::scaling::{ScalingController, ScalingError};
use crate::wait::{Cancelled, RetryPolicy, Waiter};

/// Errors that stop the gate from polling
#[derive(Error, Debug)]
pub enum GateError {
    #[error(transparent)]
    Scaling(#[from] ScalingError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("Fleets did not converge after {passes} polling passes: {}", .remaining.join(", "))]
    ConvergenceTimeout { passes: u32, remaining: Vec<String> },
}

/// Outcome of evaluating one fleet in one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Every attached balancer meets the threshold
    Ready,
    /// The fleet no longer exists cloud-side
    Missing,
    /// A balancer has fewer endpoints registered than the target capacity
    UnderAttached {
        balancer: String,
        attached: usize,
        expected: u32,
    },
    /// A balancer has too few healthy endpoints
    Unhealthy {
        balancer: String,
        healthy: usize,
        required: u32,
    },
    /// A draining balancer still has endpoints registered
    NotEmpty { balancer: String, attached: usize },
}

impl Verdict {
    pub fn is_ready(&self) -> bool {
        matches!(self, Verdict::Ready)
    }
}

/// Polls balancer health for a session
pub struct CompletionGate {
    balancer: Arc<dyn Balancer>,
    waiter: Waiter,
    policy: RetryPolicy,
}

impl CompletionGate {
    pub fn new(balancer: Arc<dyn Balancer>, waiter: Waiter, policy: RetryPolicy) -> Self {
        Self {
            balancer,
            waiter,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Evaluate one fleet against its plan
    pub async fn evaluate(
        &self,
        fleet: &FleetDescriptor,
        plan: &FleetPlan,
        scaling: &ScalingController,
    ) -> Result<Verdict, GateError> {
        let balancers = match self.balancer.list_attached(fleet).await {
            Ok(balancers) => balancers,
            Err(CloudError::FleetNotFound { .. }) => return Ok(Verdict::Missing),
            Err(e) => return Err(e.into()),
        };

        debug!(fleet = %fleet.name, kind = %self.balancer.kind(), balancers = ?balancers, "Attached balancers");

        for balancer_id in balancers {
            let snapshot = self.balancer.health(fleet, &balancer_id).await?;
            debug!(fleet = %fleet.name, balancer = %balancer_id, endpoints = ?snapshot.endpoints, "Endpoint states");

            if plan.threshold == 0 {
                if !snapshot.is_empty() {
                    return Ok(Verdict::NotEmpty {
                        balancer: balancer_id,
                        attached: snapshot.len(),
                    });
                }
                continue;
            }

            if snapshot.len() < plan.target.desired as usize {
                warn!(
                    fleet = %fleet.name,
                    balancer = %balancer_id,
                    attached = snapshot.len(),
                    desired = plan.target.desired,
                    "Balancer has fewer endpoints than desired capacity, re-asserting capacity"
                );
                match scaling.apply_capacity(fleet, plan.target).await {
                    Err(ScalingError::Cloud(CloudError::FleetNotFound { .. })) => {
                        return Ok(Verdict::Missing)
                    }
                    result => result?,
                }
                return Ok(Verdict::UnderAttached {
                    balancer: balancer_id,
                    attached: snapshot.len(),
                    expected: plan.target.desired,
                });
            }

            let summary = snapshot.summarize(self.balancer.as_ref());
            if summary.healthy < plan.threshold as usize {
                return Ok(Verdict::Unhealthy {
                    balancer: balancer_id,
                    healthy: summary.healthy,
                    required: plan.threshold,
                });
            }
        }

        Ok(Verdict::Ready)
    }

    /// Run one pass over `targets`, returning fleets ready for the next step
    ///
    /// Fleets missing from the registry or cloud are inserted into
    /// `completed` directly; ready fleets are returned for the caller to
    /// finish and mark.
    pub async fn poll_pass(
        &self,
        targets: &[String],
        registry: &FleetRegistry,
        plans: &BTreeMap<String, FleetPlan>,
        completed: &mut CompletionSet,
        scaling: &ScalingController,
    ) -> Result<Vec<String>, GateError> {
        let mut ready = Vec::new();

        for name in targets {
            if completed.contains(name) {
                continue;
            }
            info!(fleet = %name, "Checking fleet");

            let (fleet, plan) = match (registry.get(name), plans.get(name)) {
                (Some(fleet), Some(plan)) => (fleet, plan),
                _ => {
                    warn!(fleet = %name, "Fleet does not exist, skipping");
                    completed.insert(name);
                    continue;
                }
            };

            let verdict = self.evaluate(fleet, plan, scaling).await?;
            match verdict {
                Verdict::Ready => {
                    info!(fleet = %name, "All attached balancers are healthy");
                    ready.push(name.clone());
                }
                Verdict::Missing => {
                    warn!(fleet = %name, "Fleet disappeared, not fit for testing");
                    completed.mark_vanished(name);
                }
                pending => {
                    info!(fleet = %name, verdict = ?pending, "Fleet not ready yet");
                    if scaling.is_dry_run() {
                        info!(fleet = %name, "DRY RUN: not waiting for convergence");
                        ready.push(name.clone());
                    }
                }
            }
        }

        Ok(ready)
    }

    /// Log the fleets still in progress and pause before the next pass
    ///
    /// `passes` is the number of passes already run; fails with
    /// [`GateError::ConvergenceTimeout`] once the policy is exhausted.
    pub async fn pause(
        &self,
        targets: &[String],
        completed: &CompletionSet,
        passes: u32,
    ) -> Result<(), GateError> {
        let remaining = completed.remaining(targets);
        if !self.policy.allows(passes) {
            return Err(GateError::ConvergenceTimeout { passes, remaining });
        }

        let next = Local::now()
            + ChronoDuration::from_std(self.policy.interval).unwrap_or_else(|_| ChronoDuration::zero());
        info!(
            remaining = ?remaining,
            "Update still in progress, retrying in {}s at {}",
            self.policy.interval.as_secs(),
            next.format("%H:%M:%S")
        );
        self.waiter.wait(self.policy.interval).await?;
        Ok(())
    }

    /// Block until `completed` covers `targets`; returns passes run
    pub async fn await_completion(
        &self,
        targets: &[String],
        registry: &FleetRegistry,
        plans: &BTreeMap<String, FleetPlan>,
        completed: &mut CompletionSet,
        scaling: &ScalingController,
    ) -> Result<u32, GateError> {
        let mut passes = 0;
        loop {
            let ready = self
                .poll_pass(targets, registry, plans, completed, scaling)
                .await?;
            passes += 1;
            for name in &ready {
                completed.insert(name);
            }
            if completed.covers(targets) {
                return Ok(passes);
            }
            self.pause(targets, completed, passes).await?;
        }
    }
}
