//! In-memory cloud simulation
//!
//! Backs the `inventory` profile (rehearsing a run against a YAML description
//! of fleets) and the test-suite. Every mutating call is recorded so callers
//! can assert on the exact sequence of capacity changes.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use super::{
    AutoscalingApi, CloudError, EndpointState, FleetPage, IdentityApi, LoadBalancingApi,
};
use crate::fleet::{BalancerKind, Capacity, FleetDescriptor};

const DEFAULT_PAGE_SIZE: usize = 100;

/// A mutating call observed by the simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Capacity { fleet: String, capacity: Capacity },
    Suspend { fleet: String, processes: Vec<String> },
    Resume { fleet: String, processes: Vec<String> },
}

// ============================================================================
// Inventory file format
// ============================================================================

/// A balancer attachment in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryBalancer {
    pub kind: BalancerKind,
    pub id: String,
}

/// A fleet in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFleet {
    #[serde(flatten)]
    pub descriptor: FleetDescriptor,
    #[serde(default)]
    pub balancers: Vec<InventoryBalancer>,
}

/// Top-level inventory document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Inventory {
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Register new instances as healthy as soon as capacity changes
    #[serde(default = "default_converge")]
    pub converge: bool,
    #[serde(default)]
    pub fleets: Vec<InventoryFleet>,
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

fn default_converge() -> bool {
    true
}

/// Parse an inventory document from YAML
pub fn parse_inventory(content: &str) -> Result<Inventory, CloudError> {
    serde_yaml::from_str(content).map_err(|e| CloudError::Inventory(e.to_string()))
}

// ============================================================================
// Simulation state
// ============================================================================

#[derive(Debug, Clone)]
struct SimFleet {
    descriptor: FleetDescriptor,
    balancers: Vec<InventoryBalancer>,
    suspended: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct SimBalancer {
    kind: BalancerKind,
    endpoints: Vec<EndpointState>,
}

/// Simulated autoscaling, load balancing and identity APIs
pub struct InMemoryCloud {
    fleets: DashMap<String, SimFleet>,
    balancers: DashMap<String, SimBalancer>,
    failing: DashSet<String>,
    mutations: Mutex<Vec<Mutation>>,
    instance_seq: AtomicU64,
    account_id: String,
    page_size: usize,
    converge: bool,
}

fn fleet_key(region: &str, name: &str) -> String {
    format!("{}/{}", region, name)
}

fn healthy_state(kind: BalancerKind) -> &'static str {
    match kind {
        BalancerKind::Classic => "InService",
        BalancerKind::TargetGroup => "healthy",
    }
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    /// An empty cloud that does not converge on its own
    pub fn new() -> Self {
        Self {
            fleets: DashMap::new(),
            balancers: DashMap::new(),
            failing: DashSet::new(),
            mutations: Mutex::new(Vec::new()),
            instance_seq: AtomicU64::new(0),
            account_id: default_account_id(),
            page_size: DEFAULT_PAGE_SIZE,
            converge: false,
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Register healthy endpoints to match desired capacity on every mutation
    pub fn with_convergence(mut self, converge: bool) -> Self {
        self.converge = converge;
        self
    }

    /// Build a simulation from an inventory document; balancers start with
    /// one healthy endpoint per desired instance
    pub fn from_inventory(inventory: Inventory) -> Self {
        let cloud = Self::new()
            .with_account_id(inventory.account_id)
            .with_convergence(inventory.converge);

        for fleet in inventory.fleets {
            let desired = fleet.descriptor.capacity.desired;
            let name = fleet.descriptor.name.clone();
            let region = fleet.descriptor.region.clone();
            cloud.add_fleet(fleet.descriptor);
            for balancer in fleet.balancers {
                cloud.attach_balancer(&name, &region, balancer.kind, &balancer.id);
                cloud.resize_endpoints(&balancer.id, desired as usize);
            }
        }
        cloud
    }

    /// Load an inventory YAML file
    pub fn from_inventory_file(path: &Path) -> Result<Self, CloudError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CloudError::Inventory(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_inventory(parse_inventory(&content)?))
    }

    pub fn add_fleet(&self, descriptor: FleetDescriptor) {
        let key = fleet_key(&descriptor.region, &descriptor.name);
        self.fleets.insert(
            key,
            SimFleet {
                descriptor,
                balancers: Vec::new(),
                suspended: BTreeSet::new(),
            },
        );
    }

    /// Remove a fleet, simulating one deleted mid-run
    pub fn remove_fleet(&self, name: &str, region: &str) {
        self.fleets.remove(&fleet_key(region, name));
    }

    pub fn attach_balancer(&self, fleet: &str, region: &str, kind: BalancerKind, id: &str) {
        if let Some(mut sim) = self.fleets.get_mut(&fleet_key(region, fleet)) {
            sim.balancers.push(InventoryBalancer {
                kind,
                id: id.to_string(),
            });
        }
        self.balancers.entry(id.to_string()).or_insert(SimBalancer {
            kind,
            endpoints: Vec::new(),
        });
    }

    /// Replace the endpoints a balancer reports
    pub fn set_endpoints(&self, balancer: &str, endpoints: Vec<EndpointState>) {
        if let Some(mut sim) = self.balancers.get_mut(balancer) {
            sim.endpoints = endpoints;
        }
    }

    /// Make every capacity update for `fleet` fail with an API error
    pub fn fail_updates_for(&self, fleet: &str) {
        self.failing.insert(fleet.to_string());
    }

    pub fn capacity_of(&self, fleet: &str, region: &str) -> Option<Capacity> {
        self.fleets
            .get(&fleet_key(region, fleet))
            .map(|sim| sim.descriptor.capacity)
    }

    pub fn suspended_processes(&self, fleet: &str, region: &str) -> BTreeSet<String> {
        self.fleets
            .get(&fleet_key(region, fleet))
            .map(|sim| sim.suspended.clone())
            .unwrap_or_default()
    }

    /// Every mutating call, in order
    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Desired capacities applied to `fleet`, in order
    pub fn desired_history(&self, fleet: &str) -> Vec<u32> {
        self.mutations()
            .into_iter()
            .filter_map(|m| match m {
                Mutation::Capacity {
                    fleet: f,
                    capacity,
                } if f == fleet => Some(capacity.desired),
                _ => None,
            })
            .collect()
    }

    fn record(&self, mutation: Mutation) {
        if let Ok(mut log) = self.mutations.lock() {
            log.push(mutation);
        }
    }

    fn resize_endpoints(&self, balancer: &str, count: usize) {
        if let Some(mut sim) = self.balancers.get_mut(balancer) {
            let state = healthy_state(sim.kind);
            sim.endpoints.truncate(count);
            for endpoint in sim.endpoints.iter_mut() {
                endpoint.state = state.to_string();
            }
            while sim.endpoints.len() < count {
                let seq = self.instance_seq.fetch_add(1, Ordering::SeqCst);
                sim.endpoints
                    .push(EndpointState::new(format!("i-{:08x}", seq), state));
            }
        }
    }

    fn with_fleet<T>(
        &self,
        name: &str,
        region: &str,
        f: impl FnOnce(&mut SimFleet) -> T,
    ) -> Result<T, CloudError> {
        let mut sim = self
            .fleets
            .get_mut(&fleet_key(region, name))
            .ok_or_else(|| CloudError::FleetNotFound {
                name: name.to_string(),
                region: region.to_string(),
            })?;
        Ok(f(&mut *sim))
    }

    fn endpoints(&self, balancer: &str) -> Result<Vec<EndpointState>, CloudError> {
        self.balancers
            .get(balancer)
            .map(|sim| sim.endpoints.clone())
            .ok_or_else(|| CloudError::BalancerNotFound(balancer.to_string()))
    }
}

#[async_trait]
impl AutoscalingApi for InMemoryCloud {
    async fn list_fleets(
        &self,
        region: &str,
        page_token: Option<&str>,
    ) -> Result<FleetPage, CloudError> {
        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| CloudError::Parse(format!("invalid page token '{}'", token)))?,
            None => 0,
        };

        let mut fleets: Vec<FleetDescriptor> = self
            .fleets
            .iter()
            .filter(|entry| entry.descriptor.region == region)
            .map(|entry| entry.descriptor.clone())
            .collect();
        fleets.sort_by(|a, b| a.name.cmp(&b.name));

        let end = (start + self.page_size).min(fleets.len());
        let next_token = (end < fleets.len()).then(|| end.to_string());
        let page = fleets.get(start..end).map(|p| p.to_vec()).unwrap_or_default();

        Ok(FleetPage {
            fleets: page,
            next_token,
        })
    }

    async fn update_capacity(
        &self,
        name: &str,
        region: &str,
        capacity: Capacity,
    ) -> Result<(), CloudError> {
        if self.failing.contains(name) {
            return Err(CloudError::Api {
                status: 400,
                message: format!("simulated failure updating {}", name),
            });
        }

        let balancers = self.with_fleet(name, region, |sim| {
            sim.descriptor.capacity = capacity;
            sim.balancers.clone()
        })?;
        self.record(Mutation::Capacity {
            fleet: name.to_string(),
            capacity,
        });

        if self.converge {
            for balancer in balancers {
                self.resize_endpoints(&balancer.id, capacity.desired as usize);
            }
        }
        Ok(())
    }

    async fn suspend_processes(
        &self,
        name: &str,
        region: &str,
        processes: &[String],
    ) -> Result<(), CloudError> {
        self.with_fleet(name, region, |sim| {
            sim.suspended.extend(processes.iter().cloned());
        })?;
        self.record(Mutation::Suspend {
            fleet: name.to_string(),
            processes: processes.to_vec(),
        });
        Ok(())
    }

    async fn resume_processes(
        &self,
        name: &str,
        region: &str,
        processes: &[String],
    ) -> Result<(), CloudError> {
        self.with_fleet(name, region, |sim| {
            for process in processes {
                sim.suspended.remove(process);
            }
        })?;
        self.record(Mutation::Resume {
            fleet: name.to_string(),
            processes: processes.to_vec(),
        });
        Ok(())
    }

    async fn attached_balancers(
        &self,
        name: &str,
        region: &str,
        kind: BalancerKind,
    ) -> Result<Vec<String>, CloudError> {
        self.with_fleet(name, region, |sim| {
            sim.balancers
                .iter()
                .filter(|b| b.kind == kind)
                .map(|b| b.id.clone())
                .collect()
        })
    }
}

#[async_trait]
impl LoadBalancingApi for InMemoryCloud {
    async fn classic_instance_health(
        &self,
        balancer: &str,
        _region: &str,
    ) -> Result<Vec<EndpointState>, CloudError> {
        self.endpoints(balancer)
    }

    async fn target_group_health(
        &self,
        target_group: &str,
        _region: &str,
    ) -> Result<Vec<EndpointState>, CloudError> {
        self.endpoints(target_group)
    }
}

#[async_trait]
impl IdentityApi for InMemoryCloud {
    async fn account_id(&self) -> Result<String, CloudError> {
        Ok(self.account_id.clone())
    }
}
