//! Capability interfaces onto the cloud control plane
//!
//! The orchestrator never talks to a concrete SDK. It consumes three traits:
//! - [`AutoscalingApi`] - fleet listing, capacity mutation, process suspension
//! - [`LoadBalancingApi`] - per-balancer endpoint health
//! - [`IdentityApi`] - the account the credentials belong to
//!
//! [`gateway::GatewayClient`] implements them over HTTP, and
//! [`memory::InMemoryCloud`] simulates them for rehearsals and tests.

pub mod gateway;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fleet::{BalancerKind, Capacity, FleetDescriptor};

pub use gateway::GatewayClient;
pub use memory::InMemoryCloud;

/// Errors reported by a cloud backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("Fleet '{name}' not found in {region}")]
    FleetNotFound { name: String, region: String },

    #[error("Balancer '{0}' not found")]
    BalancerNotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Inventory error: {0}")]
    Inventory(String),
}

/// One page of a fleet listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetPage {
    pub fleets: Vec<FleetDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Raw health of one endpoint behind a balancer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointState {
    /// Instance id (classic) or target id (target group)
    pub id: String,
    /// Raw state literal as reported by the balancer
    pub state: String,
}

impl EndpointState {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
        }
    }
}

#[async_trait]
pub trait AutoscalingApi: Send + Sync {
    /// List one page of fleets in a region
    async fn list_fleets(
        &self,
        region: &str,
        page_token: Option<&str>,
    ) -> Result<FleetPage, CloudError>;

    /// Set a fleet's capacity triple
    async fn update_capacity(
        &self,
        name: &str,
        region: &str,
        capacity: Capacity,
    ) -> Result<(), CloudError>;

    async fn suspend_processes(
        &self,
        name: &str,
        region: &str,
        processes: &[String],
    ) -> Result<(), CloudError>;

    async fn resume_processes(
        &self,
        name: &str,
        region: &str,
        processes: &[String],
    ) -> Result<(), CloudError>;

    /// Balancer names (classic) or target group ids attached to a fleet
    async fn attached_balancers(
        &self,
        name: &str,
        region: &str,
        kind: BalancerKind,
    ) -> Result<Vec<String>, CloudError>;
}

#[async_trait]
pub trait LoadBalancingApi: Send + Sync {
    async fn classic_instance_health(
        &self,
        balancer: &str,
        region: &str,
    ) -> Result<Vec<EndpointState>, CloudError>;

    async fn target_group_health(
        &self,
        target_group: &str,
        region: &str,
    ) -> Result<Vec<EndpointState>, CloudError>;
}

#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn account_id(&self) -> Result<String, CloudError>;
}

/// A backend implementing every capability the orchestrator needs
pub trait CloudBackend: AutoscalingApi + LoadBalancingApi + IdentityApi {}

impl<T: AutoscalingApi + LoadBalancingApi + IdentityApi> CloudBackend for T {}

/// One backend viewed through each capability it provides
#[derive(Clone)]
pub struct CloudHandles {
    pub autoscaling: Arc<dyn AutoscalingApi>,
    pub load_balancing: Arc<dyn LoadBalancingApi>,
    pub identity: Arc<dyn IdentityApi>,
}

impl CloudHandles {
    pub fn from_backend<T: CloudBackend + 'static>(backend: Arc<T>) -> Self {
        Self {
            autoscaling: backend.clone(),
            load_balancing: backend.clone(),
            identity: backend,
        }
    }
}
