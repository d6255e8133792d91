//! Structured resource requests

use crate::error::PlacementError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// One group of resources with its trait and aggregate constraints.
///
/// With `use_same_provider` every resource must come from a single
/// provider; otherwise the group may be spread across a provider tree and
/// the sharing providers associated with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestGroup {
    #[serde(default)]
    pub use_same_provider: bool,
    /// Resource class name to requested amount.
    #[serde(default)]
    pub resources: BTreeMap<String, i64>,
    /// AND of OR-sets of trait names.
    #[serde(default)]
    pub required_traits: Vec<BTreeSet<String>>,
    #[serde(default)]
    pub forbidden_traits: BTreeSet<String>,
    /// AND of OR-sets of aggregate uuids.
    #[serde(default)]
    pub member_of: Vec<BTreeSet<Uuid>>,
    #[serde(default)]
    pub forbidden_aggregates: BTreeSet<Uuid>,
    /// Restrict the group to the tree containing this provider.
    #[serde(default)]
    pub in_tree: Option<Uuid>,
}

impl RequestGroup {
    /// The unnumbered group: resources may be spread across a tree.
    pub fn unnumbered() -> Self {
        Self::default()
    }

    /// A numbered (granular) group: every resource from one provider.
    pub fn numbered() -> Self {
        Self {
            use_same_provider: true,
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource_class: impl Into<String>, amount: i64) -> Self {
        self.resources.insert(resource_class.into(), amount);
        self
    }

    pub fn require_trait(self, name: impl Into<String>) -> Self {
        self.require_any_trait([name.into()])
    }

    /// Require at least one trait out of `names`.
    pub fn require_any_trait<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_traits
            .push(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn forbid_trait(mut self, name: impl Into<String>) -> Self {
        self.forbidden_traits.insert(name.into());
        self
    }

    /// Require membership in at least one aggregate out of `aggregates`.
    pub fn member_of<I: IntoIterator<Item = Uuid>>(mut self, aggregates: I) -> Self {
        self.member_of.push(aggregates.into_iter().collect());
        self
    }

    pub fn forbid_aggregate(mut self, aggregate: Uuid) -> Self {
        self.forbidden_aggregates.insert(aggregate);
        self
    }

    pub fn in_tree(mut self, provider: Uuid) -> Self {
        self.in_tree = Some(provider);
        self
    }

    pub fn validate(&self, suffix: &str) -> Result<(), PlacementError> {
        let invalid = |reason: String| {
            PlacementError::InvalidRequest(format!("request group '{}': {}", suffix, reason))
        };
        if self.resources.is_empty() {
            return Err(invalid("at least one resource must be requested".to_string()));
        }
        for (class, amount) in &self.resources {
            if *amount < 1 {
                return Err(invalid(format!("amount for {} must be at least 1", class)));
            }
        }
        if self.required_traits.iter().any(BTreeSet::is_empty) {
            return Err(invalid("empty set of required traits".to_string()));
        }
        if self.member_of.iter().any(BTreeSet::is_empty) {
            return Err(invalid("empty set of aggregates".to_string()));
        }
        let conflicting: Vec<&String> = self
            .required_traits
            .iter()
            .filter(|any_of| any_of.len() == 1)
            .flatten()
            .filter(|name| self.forbidden_traits.contains(*name))
            .collect();
        if !conflicting.is_empty() {
            return Err(invalid(format!(
                "conflicting required and forbidden traits found: {:?}",
                conflicting
            )));
        }
        Ok(())
    }
}

/// How numbered groups relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Groups may be satisfied by the same provider.
    None,
    /// Each numbered group must be satisfied by a different provider.
    Isolate,
}

/// Full input to the candidate resolver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Keyed by suffix; the unnumbered group uses the empty suffix.
    pub groups: BTreeMap<String, RequestGroup>,
    #[serde(default)]
    pub group_policy: Option<GroupPolicy>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Traits the anchor root provider of every candidate must carry.
    #[serde(default)]
    pub root_required: BTreeSet<String>,
    /// Traits the anchor root provider of every candidate must not carry.
    #[serde(default)]
    pub root_forbidden: BTreeSet<String>,
}

impl CandidateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, suffix: impl Into<String>, group: RequestGroup) -> Self {
        self.groups.insert(suffix.into(), group);
        self
    }

    pub fn with_group_policy(mut self, policy: GroupPolicy) -> Self {
        self.group_policy = Some(policy);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_root_required(mut self, name: impl Into<String>) -> Self {
        self.root_required.insert(name.into());
        self
    }

    pub fn with_root_forbidden(mut self, name: impl Into<String>) -> Self {
        self.root_forbidden.insert(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), PlacementError> {
        if self.groups.is_empty() {
            return Err(PlacementError::InvalidRequest(
                "at least one request group is required".to_string(),
            ));
        }
        for (suffix, group) in &self.groups {
            group.validate(suffix)?;
        }
        let numbered = self.groups.keys().filter(|suffix| !suffix.is_empty()).count();
        if numbered > 1 && self.group_policy.is_none() {
            return Err(PlacementError::InvalidRequest(
                "group_policy is required when more than one numbered request group is given"
                    .to_string(),
            ));
        }
        if self.limit == Some(0) {
            return Err(PlacementError::InvalidRequest(
                "limit must be at least 1".to_string(),
            ));
        }
        if let Some(name) = self.root_required.intersection(&self.root_forbidden).next() {
            return Err(PlacementError::InvalidRequest(format!(
                "trait {} is both required and forbidden on the root provider",
                name
            )));
        }
        Ok(())
    }
}
