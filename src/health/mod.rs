//! Health classifier
//!
//! The only place balancer-kind polymorphism lives. A [`Balancer`] is picked
//! once per session (classic or target group) and every other component
//! works with the normalized [`HealthSnapshot`] it returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::cloud::{AutoscalingApi, CloudError, LoadBalancingApi};
use crate::fleet::{BalancerKind, FleetDescriptor};

/// States that make an endpoint ineligible for a capacity decision
pub const NON_TERMINAL_STATES: &[&str] = &[
    "initial",
    "unhealthy",
    "unused",
    "draining",
    "unavailable",
    "OutOfService",
];

/// Healthy literal for classic balancers
pub const CLASSIC_HEALTHY: &str = "InService";

/// Healthy literal for target groups
pub const TARGET_GROUP_HEALTHY: &str = "healthy";

/// True when `state` is one of the non-terminal/unhealthy states
pub fn is_non_terminal(state: &str) -> bool {
    NON_TERMINAL_STATES.contains(&state)
}

/// Endpoint states of one balancer at one poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub balancer_id: String,
    /// Endpoint id to raw state
    pub endpoints: BTreeMap<String, String>,
}

/// Counts derived from a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    /// Every endpoint registered with the balancer
    pub attached: usize,
    /// Endpoints outside the non-terminal set
    pub eligible: usize,
    /// Eligible endpoints in the kind's healthy state
    pub healthy: usize,
}

impl HealthSnapshot {
    pub fn new(balancer_id: impl Into<String>) -> Self {
        Self {
            balancer_id: balancer_id.into(),
            endpoints: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, id: impl Into<String>, state: impl Into<String>) -> Self {
        self.endpoints.insert(id.into(), state.into());
        self
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Classify every endpoint with the balancer's healthy predicate
    pub fn summarize(&self, balancer: &dyn Balancer) -> HealthSummary {
        let eligible: Vec<&String> = self
            .endpoints
            .values()
            .filter(|state| !is_non_terminal(state))
            .collect();

        HealthSummary {
            attached: self.endpoints.len(),
            eligible: eligible.len(),
            healthy: eligible
                .into_iter()
                .filter(|state| balancer.is_healthy(state))
                .count(),
        }
    }
}

/// A load balancer generation, selected once at session start
#[async_trait]
pub trait Balancer: Send + Sync {
    fn kind(&self) -> BalancerKind;

    /// Balancers (or target groups) attached to a fleet
    async fn list_attached(&self, fleet: &FleetDescriptor) -> Result<Vec<String>, CloudError>;

    /// Current endpoint states behind one balancer
    async fn health(
        &self,
        fleet: &FleetDescriptor,
        balancer_id: &str,
    ) -> Result<HealthSnapshot, CloudError>;

    /// The kind's healthy predicate over a raw state literal
    fn is_healthy(&self, state: &str) -> bool;
}

/// Classic balancers: instance ids, `InService`/`OutOfService`
pub struct ClassicBalancer {
    autoscaling: Arc<dyn AutoscalingApi>,
    load_balancing: Arc<dyn LoadBalancingApi>,
}

impl ClassicBalancer {
    pub fn new(
        autoscaling: Arc<dyn AutoscalingApi>,
        load_balancing: Arc<dyn LoadBalancingApi>,
    ) -> Self {
        Self {
            autoscaling,
            load_balancing,
        }
    }
}

#[async_trait]
impl Balancer for ClassicBalancer {
    fn kind(&self) -> BalancerKind {
        BalancerKind::Classic
    }

    async fn list_attached(&self, fleet: &FleetDescriptor) -> Result<Vec<String>, CloudError> {
        self.autoscaling
            .attached_balancers(&fleet.name, &fleet.region, BalancerKind::Classic)
            .await
    }

    async fn health(
        &self,
        fleet: &FleetDescriptor,
        balancer_id: &str,
    ) -> Result<HealthSnapshot, CloudError> {
        let states = self
            .load_balancing
            .classic_instance_health(balancer_id, &fleet.region)
            .await?;
        Ok(HealthSnapshot {
            balancer_id: balancer_id.to_string(),
            endpoints: states.into_iter().map(|s| (s.id, s.state)).collect(),
        })
    }

    fn is_healthy(&self, state: &str) -> bool {
        state == CLASSIC_HEALTHY
    }
}

/// Target groups: target ids, `healthy`/`unhealthy`/`draining`/...
pub struct TargetGroupBalancer {
    autoscaling: Arc<dyn AutoscalingApi>,
    load_balancing: Arc<dyn LoadBalancingApi>,
}

impl TargetGroupBalancer {
    pub fn new(
        autoscaling: Arc<dyn AutoscalingApi>,
        load_balancing: Arc<dyn LoadBalancingApi>,
    ) -> Self {
        Self {
            autoscaling,
            load_balancing,
        }
    }
}

#[async_trait]
impl Balancer for TargetGroupBalancer {
    fn kind(&self) -> BalancerKind {
        BalancerKind::TargetGroup
    }

    async fn list_attached(&self, fleet: &FleetDescriptor) -> Result<Vec<String>, CloudError> {
        self.autoscaling
            .attached_balancers(&fleet.name, &fleet.region, BalancerKind::TargetGroup)
            .await
    }

    async fn health(
        &self,
        fleet: &FleetDescriptor,
        balancer_id: &str,
    ) -> Result<HealthSnapshot, CloudError> {
        let states = self
            .load_balancing
            .target_group_health(balancer_id, &fleet.region)
            .await?;
        Ok(HealthSnapshot {
            balancer_id: balancer_id.to_string(),
            endpoints: states.into_iter().map(|s| (s.id, s.state)).collect(),
        })
    }

    fn is_healthy(&self, state: &str) -> bool {
        state == TARGET_GROUP_HEALTHY
    }
}

/// Select the balancer implementation for a session
pub fn balancer_for(
    kind: BalancerKind,
    autoscaling: Arc<dyn AutoscalingApi>,
    load_balancing: Arc<dyn LoadBalancingApi>,
) -> Arc<dyn Balancer> {
    match kind {
        BalancerKind::Classic => Arc::new(ClassicBalancer::new(autoscaling, load_balancing)),
        BalancerKind::TargetGroup => {
            Arc::new(TargetGroupBalancer::new(autoscaling, load_balancing))
        }
    }
}
