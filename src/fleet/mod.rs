//! Fleet data model
//!
//! A fleet is an auto-scaled group of instances sharing one capacity policy.
//! Descriptors are captured once per run by the [`registry`] and selected by
//! the tag [`filter`] engine.

pub mod filter;
pub mod registry;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use filter::{compile_filters, select_fleets, FilterError, TagFilterGroup};
pub use registry::{discover, FleetRegistry};

/// A capacity triple that violates `min <= desired <= max`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid capacity (min={min}, desired={desired}, max={max}): expected min <= desired <= max")]
pub struct CapacityError {
    pub min: u32,
    pub desired: u32,
    pub max: u32,
}

/// The `(min, desired, max)` capacity of a fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub min: u32,
    pub desired: u32,
    pub max: u32,
}

impl Capacity {
    /// Build a validated capacity triple
    pub fn new(min: u32, desired: u32, max: u32) -> Result<Self, CapacityError> {
        let capacity = Self { min, desired, max };
        capacity.validate()?;
        Ok(capacity)
    }

    /// The empty fleet `(0, 0, 0)`
    pub const fn zero() -> Self {
        Self {
            min: 0,
            desired: 0,
            max: 0,
        }
    }

    /// A fleet pinned at exactly `n` instances
    pub const fn pinned(n: u32) -> Self {
        Self {
            min: n,
            desired: n,
            max: n,
        }
    }

    pub fn validate(&self) -> Result<(), CapacityError> {
        if self.min <= self.desired && self.desired <= self.max {
            Ok(())
        } else {
            Err(CapacityError {
                min: self.min,
                desired: self.desired,
                max: self.max,
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.min, self.desired, self.max)
    }
}

/// The two load balancer generations a fleet can sit behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancerKind {
    /// Classic balancers report instance-level `InService`/`OutOfService`
    Classic,
    /// Target groups report target-level `healthy`/`unhealthy`/...
    TargetGroup,
}

impl BalancerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancerKind::Classic => "classic",
            BalancerKind::TargetGroup => "target-group",
        }
    }
}

impl fmt::Display for BalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fleet as captured in the registry snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetDescriptor {
    /// Fleet name, unique within a run
    pub name: String,
    /// Region the fleet was discovered in
    #[serde(default)]
    pub region: String,
    /// Current capacity, refreshed as mutations succeed
    pub capacity: Capacity,
    /// Tags as reported by the cloud (original casing)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl FleetDescriptor {
    pub fn new(name: impl Into<String>, region: impl Into<String>, capacity: Capacity) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            capacity,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Tags with keys and values upper-cased for case-insensitive matching
    pub fn normalized_tags(&self) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .map(|(k, v)| (k.to_uppercase(), v.to_uppercase()))
            .collect()
    }
}
