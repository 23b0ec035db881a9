//! Tag filter engine
//!
//! A filter expression is a comma-separated list of `KEY==VALUE` pairs that
//! must all match (AND). Several expressions are combined with OR. Keys and
//! values are compared upper-cased.

use std::collections::BTreeMap;

use thiserror::Error;

use super::registry::FleetRegistry;

/// Errors in user-supplied filter expressions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Bad format for tag key-value pair '{0}': use KEY==VALUE")]
    MissingSeparator(String),

    #[error("Bad format for tag key-value pair '{0}': '==' may appear only once")]
    ExtraSeparator(String),

    #[error("Empty tag key in pair '{0}'")]
    EmptyKey(String),

    #[error("Duplicate tag key detected: {0}")]
    DuplicateKey(String),
}

/// A set of required tag pairs, all of which must be present on a fleet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilterGroup {
    pairs: BTreeMap<String, String>,
}

impl TagFilterGroup {
    /// Parse one `KEY==VALUE[,KEY==VALUE...]` expression
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let mut pairs = BTreeMap::new();

        for pair in expression.split(',') {
            let (key, value) = pair
                .split_once("==")
                .ok_or_else(|| FilterError::MissingSeparator(pair.to_string()))?;
            if value.contains("==") {
                return Err(FilterError::ExtraSeparator(pair.to_string()));
            }

            let key = key.trim().to_uppercase();
            if key.is_empty() {
                return Err(FilterError::EmptyKey(pair.to_string()));
            }
            let value = value.trim().to_uppercase();

            if pairs.insert(key.clone(), value).is_some() {
                return Err(FilterError::DuplicateKey(key));
            }
        }

        Ok(Self { pairs })
    }

    /// Build a group from already-normalized pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into().to_uppercase(), v.into().to_uppercase()))
                .collect(),
        }
    }

    pub fn pairs(&self) -> &BTreeMap<String, String> {
        &self.pairs
    }

    /// True when every pair of the group is present in `normalized_tags`
    pub fn matches(&self, normalized_tags: &BTreeMap<String, String>) -> bool {
        self.pairs
            .iter()
            .all(|(key, value)| normalized_tags.get(key) == Some(value))
    }
}

/// Compile filter expressions into OR-of-AND groups
pub fn compile_filters<S: AsRef<str>>(expressions: &[S]) -> Result<Vec<TagFilterGroup>, FilterError> {
    expressions
        .iter()
        .map(|expr| TagFilterGroup::parse(expr.as_ref()))
        .collect()
}

/// Select the names of fleets matching any group, in registry order
pub fn select_fleets(registry: &FleetRegistry, groups: &[TagFilterGroup]) -> Vec<String> {
    if groups.is_empty() {
        return Vec::new();
    }

    let mut selected = Vec::new();
    for fleet in registry.iter() {
        let tags = fleet.normalized_tags();
        if groups.iter().any(|group| group.matches(&tags)) && !selected.contains(&fleet.name) {
            selected.push(fleet.name.clone());
        }
    }
    selected
}
