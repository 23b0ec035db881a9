//! Fleet registry
//!
//! One snapshot of every fleet across the configured regions, built once per
//! run. Capacities are refreshed in place as mutations succeed; entries are
//! never removed.

use std::collections::btree_map::{BTreeMap, Entry};

use tracing::{debug, info, warn};

use super::{Capacity, FleetDescriptor};
use crate::cloud::{AutoscalingApi, CloudError};

/// Snapshot of fleets keyed by name
#[derive(Debug, Clone, Default)]
pub struct FleetRegistry {
    fleets: BTreeMap<String, FleetDescriptor>,
    duplicates: Vec<FleetDescriptor>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors, first occurrence of a name wins
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = FleetDescriptor>) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.insert(descriptor);
        }
        registry
    }

    /// Insert a descriptor; returns false when the name was already taken
    pub fn insert(&mut self, descriptor: FleetDescriptor) -> bool {
        match self.fleets.entry(descriptor.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                true
            }
            Entry::Occupied(existing) => {
                warn!(
                    fleet = %descriptor.name,
                    kept_region = %existing.get().region,
                    dropped_region = %descriptor.region,
                    "Duplicate fleet name detected, keeping first entry"
                );
                self.duplicates.push(descriptor);
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&FleetDescriptor> {
        self.fleets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fleets.contains_key(name)
    }

    /// Record a capacity that was successfully applied cloud-side
    pub fn record_capacity(&mut self, name: &str, capacity: Capacity) {
        if let Some(fleet) = self.fleets.get_mut(name) {
            fleet.capacity = capacity;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FleetDescriptor> {
        self.fleets.values()
    }

    /// Fleet names sorted case-insensitively, for operator listings
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fleets.keys().cloned().collect();
        names.sort_by_key(|name| name.to_lowercase());
        names
    }

    /// Descriptors dropped because their name was already registered
    pub fn duplicates(&self) -> &[FleetDescriptor] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.fleets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fleets.is_empty()
    }
}

/// Enumerate every fleet in `regions`, following continuation tokens
///
/// Fleets reporting a capacity outside `min <= desired <= max` are left out
/// of the registry.
pub async fn discover(
    api: &dyn AutoscalingApi,
    regions: &[String],
) -> Result<FleetRegistry, CloudError> {
    let mut registry = FleetRegistry::new();

    info!("Getting list of fleets in {} region(s)", regions.len());
    for region in regions {
        let mut token: Option<String> = None;
        let mut pages = 0u32;
        loop {
            let page = api.list_fleets(region, token.as_deref()).await?;
            pages += 1;
            for mut fleet in page.fleets {
                fleet.region = region.clone();
                if let Err(e) = fleet.capacity.validate() {
                    warn!(
                        fleet = %fleet.name,
                        region = %region,
                        error = %e,
                        "Skipping fleet with invalid capacity"
                    );
                    continue;
                }
                registry.insert(fleet);
            }
            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        debug!(region = %region, pages, "Region listing complete");
    }

    info!("Discovered {} fleet(s)", registry.len());
    Ok(registry)
}
