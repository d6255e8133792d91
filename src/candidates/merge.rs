//! Combining per-group candidates into whole-request candidates.

use crate::candidates::product::{Interleave, Product};
use crate::candidates::request::GroupPolicy;
use crate::candidates::research::Research;
use crate::candidates::{Candidate, CandidateSettings};
use crate::types::{ProviderId, ResourceClassId, TraitId};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Trait constraints on the anchor root of every candidate.
#[derive(Debug, Default)]
pub(crate) struct RootTraits {
    pub(crate) required: BTreeSet<TraitId>,
    pub(crate) forbidden: BTreeSet<TraitId>,
}

/// Merge per-group candidates by anchor.
///
/// Only anchors with candidates for every group survive; each survivor
/// contributes the product of its groups' candidates, consolidated and
/// checked against current capacity.
pub(crate) fn merge_candidates(
    research: &Research<'_>,
    groups: &BTreeMap<&str, Vec<Candidate>>,
    policy: Option<GroupPolicy>,
    root_traits: &RootTraits,
    settings: &CandidateSettings,
) -> Vec<Candidate> {
    let mut by_anchor: BTreeMap<ProviderId, Vec<Vec<&Candidate>>> = BTreeMap::new();
    for (position, candidates) in groups.values().enumerate() {
        for candidate in candidates {
            let lists = by_anchor
                .entry(candidate.anchor)
                .or_insert_with(|| vec![Vec::new(); groups.len()]);
            lists[position].push(candidate);
        }
    }
    by_anchor.retain(|anchor, lists| {
        lists.iter().all(|list| !list.is_empty()) && root_matches(research, *anchor, root_traits)
    });
    debug!(anchors = by_anchor.len(), "Anchors with candidates for every group");

    let isolate = policy == Some(GroupPolicy::Isolate);
    let sources = by_anchor
        .values()
        .map(move |lists| {
            Product::new(lists.iter().map(Vec::as_slice).collect())
                .filter(move |pick| !isolate || is_isolated(pick))
                .filter_map(|pick| consolidate(&pick))
                .filter(move |candidate| fits(research, candidate))
        })
        .collect();

    let mut seen = HashSet::new();
    let merged = Interleave::new(sources, settings.strategy)
        .filter(move |candidate| seen.insert(candidate.clone()));
    match settings.max_candidates {
        Some(max) => merged.take(max).collect(),
        None => merged.collect(),
    }
}

fn root_matches(research: &Research<'_>, anchor: ProviderId, root_traits: &RootTraits) -> bool {
    if root_traits.required.is_empty() && root_traits.forbidden.is_empty() {
        return true;
    }
    let traits = research.provider_traits(anchor);
    root_traits.required.is_subset(&traits) && root_traits.forbidden.is_disjoint(&traits)
}

/// No provider serves two groups that each require a single provider.
fn is_isolated(pick: &[&&Candidate]) -> bool {
    let mut used = BTreeSet::new();
    pick.iter()
        .filter(|candidate| candidate.use_same_provider)
        .flat_map(|candidate| candidate.providers())
        .all(|provider| used.insert(provider))
}

/// Sum amounts requested from the same provider and class and union the
/// group mappings. `None` when a summed amount overflows.
fn consolidate(pick: &[&&Candidate]) -> Option<Candidate> {
    if let [only] = pick {
        return Some((**only).clone());
    }
    let mut amounts: BTreeMap<(ProviderId, ResourceClassId), i64> = BTreeMap::new();
    let mut mappings: BTreeMap<String, BTreeSet<ProviderId>> = BTreeMap::new();
    let mut anchor = 0;
    for candidate in pick {
        anchor = candidate.anchor;
        for (rp, rc, amount) in &candidate.resources {
            let total = amounts.entry((*rp, *rc)).or_default();
            *total = total.checked_add(*amount)?;
        }
        for (suffix, providers) in &candidate.mappings {
            mappings
                .entry(suffix.clone())
                .or_default()
                .extend(providers.iter().copied());
        }
    }
    Some(Candidate {
        anchor,
        use_same_provider: false,
        resources: amounts
            .into_iter()
            .map(|((rp, rc), amount)| (rp, rc, amount))
            .collect(),
        mappings,
    })
}

/// Whether every consolidated amount still fits the provider's capacity and
/// max_unit.
fn fits(research: &Research<'_>, candidate: &Candidate) -> bool {
    let tables = research.tables();
    candidate.resources.iter().all(|(rp, rc, amount)| {
        tables.inventory(*rp, *rc).map_or(false, |inv| {
            *amount <= inv.max_unit
                && tables
                    .usage(*rp, *rc)
                    .checked_add(*amount)
                    .map_or(false, |after| after <= inv.capacity())
        })
    })
}
