//! Candidate search for a single request group.

use crate::candidates::product::{Interleave, Product};
use crate::candidates::request::RequestGroup;
use crate::candidates::research::Research;
use crate::candidates::rp_candidates::{RpCandidate, RpCandidates};
use crate::candidates::{Candidate, CandidateSettings};
use crate::error::PlacementError;
use crate::types::{AggregateId, ProviderId, ResourceClassId, TraitId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A request group with every name resolved to an id.
pub(crate) struct GroupContext<'g> {
    pub(crate) suffix: &'g str,
    pub(crate) use_same_provider: bool,
    pub(crate) resources: Vec<(ResourceClassId, i64)>,
    pub(crate) required_traits: Vec<BTreeSet<TraitId>>,
    pub(crate) forbidden_traits: BTreeSet<TraitId>,
    pub(crate) member_of: Vec<BTreeSet<AggregateId>>,
    pub(crate) forbidden_aggregates: BTreeSet<AggregateId>,
    /// Root of the tree named by `in_tree`.
    pub(crate) tree_root: Option<ProviderId>,
    /// Sharing providers with room for each requested class.
    pub(crate) sharing: BTreeMap<ResourceClassId, BTreeSet<ProviderId>>,
}

impl<'g> GroupContext<'g> {
    pub(crate) fn resolve(
        research: &Research<'_>,
        suffix: &'g str,
        group: &RequestGroup,
    ) -> Result<Self, PlacementError> {
        let resources = group
            .resources
            .iter()
            .map(|(name, amount)| Ok((research.resource_class_id(name)?, *amount)))
            .collect::<Result<Vec<_>, PlacementError>>()?;

        let tree_root = match group.in_tree {
            Some(uuid) => Some(
                research
                    .tables()
                    .provider_by_uuid(&uuid)
                    .map(|row| row.root_id)
                    .ok_or(PlacementError::ProviderNotFound(uuid))?,
            ),
            None => None,
        };

        let sharing_providers = research.sharing_providers();
        let mut sharing = BTreeMap::new();
        if !sharing_providers.is_empty() {
            for (rc, amount) in &resources {
                let with_room: BTreeSet<ProviderId> = research
                    .providers_with_capacity(*rc, *amount)
                    .intersection(&sharing_providers)
                    .copied()
                    .collect();
                if !with_room.is_empty() {
                    sharing.insert(*rc, with_room);
                }
            }
        }

        Ok(Self {
            suffix,
            use_same_provider: group.use_same_provider,
            resources,
            required_traits: research.trait_id_sets(&group.required_traits)?,
            forbidden_traits: research.trait_ids(&group.forbidden_traits)?,
            member_of: research.aggregate_id_sets(&group.member_of),
            forbidden_aggregates: research.aggregate_ids(&group.forbidden_aggregates),
            tree_root,
            sharing,
        })
    }

    fn is_sharing(&self, id: ProviderId) -> bool {
        self.sharing.values().any(|ids| ids.contains(&id))
    }

    fn in_scope(&self, root: ProviderId) -> bool {
        self.tree_root.map_or(true, |tree_root| tree_root == root)
    }

    fn candidate(&self, anchor: ProviderId, resources: Vec<(ProviderId, ResourceClassId, i64)>) -> Candidate {
        let providers: BTreeSet<ProviderId> = resources.iter().map(|(rp, _, _)| *rp).collect();
        Candidate::new(anchor, self.use_same_provider, resources, self.suffix, providers)
    }
}

/// Every candidate for one group, in generation order.
pub(crate) fn candidates_for_group(
    research: &Research<'_>,
    ctx: &GroupContext<'_>,
    settings: &CandidateSettings,
) -> Vec<Candidate> {
    let single = ctx.use_same_provider || (!research.tables().has_trees() && ctx.sharing.is_empty());
    let candidates = if single {
        single_provider_candidates(research, ctx)
    } else {
        multi_provider_candidates(research, ctx, settings)
    };
    debug!(
        suffix = ctx.suffix,
        single_provider = single,
        candidates = candidates.len(),
        "Resolved request group"
    );
    candidates
}

/// Every class from one provider. A sharing provider also yields one
/// candidate per other tree it is anchored into.
fn single_provider_candidates(research: &Research<'_>, ctx: &GroupContext<'_>) -> Vec<Candidate> {
    let mut providers: Option<BTreeSet<ProviderId>> = None;
    for (rc, amount) in &ctx.resources {
        let matched = research.providers_with_capacity(*rc, *amount);
        debug!(
            suffix = ctx.suffix,
            resource_class = *rc,
            matched = matched.len(),
            "Providers with capacity"
        );
        providers = Some(match providers {
            None => matched,
            Some(previous) => previous.intersection(&matched).copied().collect(),
        });
    }
    let mut providers = providers.unwrap_or_default();
    providers.retain(|id| !anchors_in_scope(research, ctx, *id).is_empty());
    providers.retain(|id| {
        research.matches_aggregates(*id, &ctx.member_of, &ctx.forbidden_aggregates, true)
    });
    let providers = research.filter_by_traits(&providers, &ctx.required_traits, &ctx.forbidden_traits);

    let mut candidates = Vec::new();
    for id in providers {
        let resources: Vec<(ProviderId, ResourceClassId, i64)> =
            ctx.resources.iter().map(|(rc, amount)| (id, *rc, *amount)).collect();
        for anchor in anchors_in_scope(research, ctx, id) {
            candidates.push(ctx.candidate(anchor, resources.clone()));
        }
    }
    candidates
}

/// The provider's own root plus, for a sharing provider, every root it is
/// anchored into; only roots inside the `in_tree` scope are kept.
fn anchors_in_scope(research: &Research<'_>, ctx: &GroupContext<'_>, id: ProviderId) -> BTreeSet<ProviderId> {
    let mut anchors = BTreeSet::new();
    anchors.insert(research.root_of(id));
    if ctx.is_sharing(id) {
        anchors.extend(research.anchors_for_sharing_provider(id));
    }
    anchors.retain(|anchor| ctx.in_scope(*anchor));
    anchors
}

fn multi_provider_candidates(
    research: &Research<'_>,
    ctx: &GroupContext<'_>,
    settings: &CandidateSettings,
) -> Vec<Candidate> {
    let mut merged = RpCandidates::default();
    for (rc, amount) in &ctx.resources {
        let mut per_class = RpCandidates::default();
        for rp in research.providers_with_capacity(*rc, *amount) {
            let root = research.root_of(rp);
            if ctx.in_scope(root) {
                per_class.add(rp, root, *rc);
            }
            if ctx.sharing.get(rc).map_or(false, |ids| ids.contains(&rp)) {
                for anchor in research.anchors_for_sharing_provider(rp) {
                    if ctx.in_scope(anchor) {
                        per_class.add(rp, anchor, *rc);
                    }
                }
            }
        }
        debug!(
            suffix = ctx.suffix,
            resource_class = *rc,
            matched = per_class.len(),
            "Provider and tree pairs with capacity"
        );
        if per_class.is_empty() {
            return Vec::new();
        }
        merged.merge_common_trees(per_class);
        if merged.is_empty() {
            debug!(suffix = ctx.suffix, "No tree can supply every class");
            return Vec::new();
        }
    }

    let tables = research.tables();
    let aggregates_of = |id: ProviderId| tables.aggregate_ids_of(id).collect::<BTreeSet<AggregateId>>();
    merged.retain(|c| {
        let mut aggregates = aggregates_of(c.rp);
        aggregates.extend(aggregates_of(c.root));
        ctx.member_of.iter().all(|any_of| !any_of.is_disjoint(&aggregates))
            && ctx.forbidden_aggregates.is_disjoint(&aggregates)
    });
    merged.retain(|c| research.provider_traits(c.rp).is_disjoint(&ctx.forbidden_traits));
    retain_trees_with_required_traits(research, ctx, &mut merged);
    debug!(
        suffix = ctx.suffix,
        trees = merged.trees().len(),
        entries = merged.len(),
        "Trees left after filtering"
    );

    let trees: Vec<(ProviderId, Vec<Vec<ProviderId>>)> = merged
        .by_tree()
        .into_iter()
        .filter_map(|(root, mut classes)| {
            let lists = ctx
                .resources
                .iter()
                .map(|(rc, _)| classes.remove(rc))
                .collect::<Option<Vec<_>>>()?;
            Some((root, lists))
        })
        .collect();

    let sources = trees
        .iter()
        .map(move |(root, lists)| {
            Product::new(lists.iter().map(Vec::as_slice).collect())
                .filter_map(move |pick| combination(research, ctx, *root, &pick))
        })
        .collect();
    let combined = Interleave::new(sources, settings.strategy);
    match settings.max_candidates {
        Some(max) => combined.take(max).collect(),
        None => combined.collect(),
    }
}

/// Drop trees whose providers, together with the sharing providers anchored
/// into them, cannot cover every required trait set.
fn retain_trees_with_required_traits(
    research: &Research<'_>,
    ctx: &GroupContext<'_>,
    merged: &mut RpCandidates,
) {
    if ctx.required_traits.is_empty() {
        return;
    }
    let mut tree_traits: BTreeMap<ProviderId, BTreeSet<TraitId>> = BTreeMap::new();
    for root in merged.trees() {
        let traits = tree_traits.entry(root).or_default();
        for member in research.tables().tree_members(root) {
            traits.extend(research.provider_traits(member));
        }
    }
    for RpCandidate { rp, root, .. } in merged.iter() {
        if research.root_of(*rp) != *root {
            if let Some(traits) = tree_traits.get_mut(root) {
                traits.extend(research.provider_traits(*rp));
            }
        }
    }
    let keep: BTreeSet<ProviderId> = tree_traits
        .into_iter()
        .filter(|(_, traits)| Research::satisfies_traits(traits, &ctx.required_traits, &BTreeSet::new()))
        .map(|(root, _)| root)
        .collect();
    merged.filter_by_tree(&keep);
}

/// One pick of a provider per class, if the providers used together
/// satisfy the trait constraints.
fn combination(
    research: &Research<'_>,
    ctx: &GroupContext<'_>,
    root: ProviderId,
    pick: &[&ProviderId],
) -> Option<Candidate> {
    let used: BTreeSet<ProviderId> = pick.iter().map(|rp| **rp).collect();
    let mut traits = BTreeSet::new();
    for rp in &used {
        traits.extend(research.provider_traits(*rp));
    }
    if !Research::satisfies_traits(&traits, &ctx.required_traits, &ctx.forbidden_traits) {
        return None;
    }
    let resources = pick
        .iter()
        .zip(&ctx.resources)
        .map(|(rp, (rc, amount))| (**rp, *rc, *amount))
        .collect();
    Some(ctx.candidate(root, resources))
}
