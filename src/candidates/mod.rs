//! Allocation Candidates
//!
//! Given a structured request of one or more groups, enumerate every
//! combination of providers able to satisfy it right now. The search reads
//! a single snapshot and never writes.
//!
//! Each group is resolved on its own, either from one provider or spread
//! across a provider tree and the sharing providers anchored into it. The
//! per-group results are then merged by anchor root, checked again against
//! capacity, limited, and returned with summaries of every tree involved.

mod group;
mod merge;
mod product;
pub mod request;
pub(crate) mod research;
mod rp_candidates;
pub mod summary;

pub use product::GenerationStrategy;
pub use request::{CandidateQuery, GroupPolicy, RequestGroup};
pub use summary::{ProviderSummary, ProviderSummaryResource};

use crate::error::PlacementError;
use crate::store::Tables;
use crate::types::{ProviderId, ResourceClassId};
use group::{candidates_for_group, GroupContext};
use merge::{merge_candidates, RootTraits};
use rand::seq::SliceRandom;
use research::Research;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Process-wide resolver behaviour, set from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CandidateSettings {
    /// Sample the limited result randomly instead of truncating it.
    pub randomize: bool,
    pub strategy: GenerationStrategy,
    /// Bound on candidates generated per group and after merging.
    pub max_candidates: Option<usize>,
}

/// Candidate as the resolver builds it, keyed by internal ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Candidate {
    pub(crate) anchor: ProviderId,
    pub(crate) use_same_provider: bool,
    /// Sorted by provider, then class.
    pub(crate) resources: Vec<(ProviderId, ResourceClassId, i64)>,
    pub(crate) mappings: BTreeMap<String, BTreeSet<ProviderId>>,
}

impl Candidate {
    pub(crate) fn new(
        anchor: ProviderId,
        use_same_provider: bool,
        mut resources: Vec<(ProviderId, ResourceClassId, i64)>,
        suffix: &str,
        providers: BTreeSet<ProviderId>,
    ) -> Self {
        resources.sort_unstable();
        let mut mappings = BTreeMap::new();
        mappings.insert(suffix.to_string(), providers);
        Self {
            anchor,
            use_same_provider,
            resources,
            mappings,
        }
    }

    pub(crate) fn providers(&self) -> BTreeSet<ProviderId> {
        self.resources.iter().map(|(rp, _, _)| *rp).collect()
    }
}

/// Amount of one class requested from one provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AllocationRequestResource {
    pub provider_uuid: Uuid,
    pub resource_class: String,
    pub amount: i64,
}

/// One feasible way to satisfy the whole request.
///
/// Equality and hashing ignore the order of `resource_requests`.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationRequest {
    pub anchor_root_provider_uuid: Uuid,
    pub use_same_provider: bool,
    pub resource_requests: Vec<AllocationRequestResource>,
    /// Group suffix to the providers satisfying that group.
    pub mappings: BTreeMap<String, BTreeSet<Uuid>>,
}

impl AllocationRequest {
    fn sorted_requests(&self) -> Vec<&AllocationRequestResource> {
        let mut requests: Vec<&AllocationRequestResource> = self.resource_requests.iter().collect();
        requests.sort();
        requests
    }

    /// Total requested from `provider_uuid` for `resource_class`.
    pub fn amount(&self, provider_uuid: &Uuid, resource_class: &str) -> i64 {
        self.resource_requests
            .iter()
            .filter(|r| &r.provider_uuid == provider_uuid && r.resource_class == resource_class)
            .map(|r| r.amount)
            .sum()
    }
}

impl PartialEq for AllocationRequest {
    fn eq(&self, other: &Self) -> bool {
        self.anchor_root_provider_uuid == other.anchor_root_provider_uuid
            && self.use_same_provider == other.use_same_provider
            && self.mappings == other.mappings
            && self.sorted_requests() == other.sorted_requests()
    }
}

impl Eq for AllocationRequest {}

impl Hash for AllocationRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.anchor_root_provider_uuid.hash(state);
        self.use_same_provider.hash(state);
        self.mappings.hash(state);
        self.sorted_requests().hash(state);
    }
}

/// Result of a candidate search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationCandidates {
    pub allocation_requests: Vec<AllocationRequest>,
    /// Every provider of every tree the requests touch, keyed by uuid.
    pub provider_summaries: BTreeMap<Uuid, ProviderSummary>,
}

impl AllocationCandidates {
    pub fn is_empty(&self) -> bool {
        self.allocation_requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.allocation_requests.len()
    }
}

fn to_allocation_request(tables: &Tables, candidate: &Candidate) -> Option<AllocationRequest> {
    let uuid_of = |id: ProviderId| tables.provider(id).map(|row| row.uuid);
    let resource_requests = candidate
        .resources
        .iter()
        .map(|(rp, rc, amount)| {
            Some(AllocationRequestResource {
                provider_uuid: uuid_of(*rp)?,
                resource_class: tables.resource_class(*rc)?.name.clone(),
                amount: *amount,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    let mappings = candidate
        .mappings
        .iter()
        .map(|(suffix, providers)| {
            let uuids = providers
                .iter()
                .map(|id| uuid_of(*id))
                .collect::<Option<BTreeSet<Uuid>>>()?;
            Some((suffix.clone(), uuids))
        })
        .collect::<Option<BTreeMap<_, _>>>()?;
    Some(AllocationRequest {
        anchor_root_provider_uuid: uuid_of(candidate.anchor)?,
        use_same_provider: candidate.use_same_provider,
        resource_requests,
        mappings,
    })
}

/// Enumerate every allocation request able to satisfy `query` against the
/// snapshot `tables`.
pub fn get_by_requests(
    tables: &Tables,
    query: &CandidateQuery,
    settings: &CandidateSettings,
) -> Result<AllocationCandidates, PlacementError> {
    query.validate()?;
    let started = Instant::now();
    let research = Research::new(tables);

    let contexts = query
        .groups
        .iter()
        .map(|(suffix, group)| GroupContext::resolve(&research, suffix, group))
        .collect::<Result<Vec<_>, PlacementError>>()?;
    let root_traits = RootTraits {
        required: research.trait_ids(&query.root_required)?,
        forbidden: research.trait_ids(&query.root_forbidden)?,
    };

    let mut per_group: BTreeMap<&str, Vec<Candidate>> = BTreeMap::new();
    for ctx in &contexts {
        let candidates = candidates_for_group(&research, ctx, settings);
        if candidates.is_empty() {
            debug!(suffix = ctx.suffix, "Request group has no candidates");
            return Ok(AllocationCandidates::default());
        }
        per_group.insert(ctx.suffix, candidates);
    }

    let mut candidates = merge_candidates(
        &research,
        &per_group,
        query.group_policy,
        &root_traits,
        settings,
    );
    let found = candidates.len();
    if let Some(limit) = query.limit {
        if candidates.len() > limit {
            if settings.randomize {
                candidates = candidates
                    .choose_multiple(&mut rand::thread_rng(), limit)
                    .cloned()
                    .collect();
            } else {
                candidates.truncate(limit);
            }
        }
    }

    let provider_summaries = summary::summarize(&research, &candidates);
    let allocation_requests = candidates
        .iter()
        .filter_map(|candidate| to_allocation_request(tables, candidate))
        .collect();
    debug!(
        groups = query.groups.len(),
        found,
        returned = candidates.len(),
        summaries = provider_summaries.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Resolved allocation candidates"
    );
    Ok(AllocationCandidates {
        allocation_requests,
        provider_summaries,
    })
}
