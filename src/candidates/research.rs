//! Query helpers the resolver runs against one snapshot.

use crate::error::PlacementError;
use crate::store::Tables;
use crate::types::{AggregateId, ProviderId, ResourceClassId, TraitId, MISC_SHARES_VIA_AGGREGATE};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Read-only queries over a snapshot, shared by the candidate resolver and
/// the provider list filters.
pub(crate) struct Research<'a> {
    tables: &'a Tables,
}

impl<'a> Research<'a> {
    pub(crate) fn new(tables: &'a Tables) -> Self {
        Self { tables }
    }

    pub(crate) fn tables(&self) -> &'a Tables {
        self.tables
    }

    pub(crate) fn resource_class_id(&self, name: &str) -> Result<ResourceClassId, PlacementError> {
        self.tables
            .resource_class_by_name(name)
            .map(|rc| rc.id)
            .ok_or_else(|| PlacementError::ResourceClassNotFound(name.to_string()))
    }

    /// Resolve trait names; every unknown name is reported at once.
    pub(crate) fn trait_ids(&self, names: &BTreeSet<String>) -> Result<BTreeSet<TraitId>, PlacementError> {
        let mut ids = BTreeSet::new();
        let mut missing = Vec::new();
        for name in names {
            match self.tables.trait_by_name(name) {
                Some(row) => {
                    ids.insert(row.id);
                }
                None => missing.push(name.as_str()),
            }
        }
        if missing.is_empty() {
            Ok(ids)
        } else {
            Err(PlacementError::TraitNotFound(missing.join(", ")))
        }
    }

    pub(crate) fn trait_id_sets(
        &self,
        sets: &[BTreeSet<String>],
    ) -> Result<Vec<BTreeSet<TraitId>>, PlacementError> {
        sets.iter().map(|names| self.trait_ids(names)).collect()
    }

    /// Resolve aggregate uuids, silently dropping unknown ones.
    pub(crate) fn aggregate_ids(&self, uuids: &BTreeSet<Uuid>) -> BTreeSet<AggregateId> {
        uuids
            .iter()
            .filter_map(|uuid| self.tables.aggregate_by_uuid(uuid))
            .map(|row| row.id)
            .collect()
    }

    /// Each OR-set resolved; a set of only unknown aggregates becomes empty
    /// and so matches nothing.
    pub(crate) fn aggregate_id_sets(&self, sets: &[BTreeSet<Uuid>]) -> Vec<BTreeSet<AggregateId>> {
        sets.iter().map(|uuids| self.aggregate_ids(uuids)).collect()
    }

    pub(crate) fn provider_traits(&self, id: ProviderId) -> BTreeSet<TraitId> {
        self.tables.trait_ids_of(id).collect()
    }

    pub(crate) fn trait_names(&self, id: ProviderId) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .trait_ids_of(id)
            .filter_map(|trait_id| self.tables.trait_row(trait_id))
            .map(|row| row.name.clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn root_of(&self, id: ProviderId) -> ProviderId {
        self.tables.provider(id).map_or(id, |row| row.root_id)
    }

    /// Aggregates the provider belongs to, itself or through its root.
    fn effective_aggregates(&self, id: ProviderId) -> BTreeSet<AggregateId> {
        let mut aggregates: BTreeSet<AggregateId> = self.tables.aggregate_ids_of(id).collect();
        let root = self.root_of(id);
        if root != id {
            aggregates.extend(self.tables.aggregate_ids_of(root));
        }
        aggregates
    }

    /// Every OR-set must intersect the provider's memberships and no
    /// forbidden aggregate may. With `include_root` the root's memberships
    /// count as the provider's own.
    pub(crate) fn matches_aggregates(
        &self,
        id: ProviderId,
        member_of: &[BTreeSet<AggregateId>],
        forbidden: &BTreeSet<AggregateId>,
        include_root: bool,
    ) -> bool {
        let aggregates: BTreeSet<AggregateId> = if include_root {
            self.effective_aggregates(id)
        } else {
            self.tables.aggregate_ids_of(id).collect()
        };
        member_of
            .iter()
            .all(|any_of| !any_of.is_disjoint(&aggregates))
            && forbidden.is_disjoint(&aggregates)
    }

    /// AND of OR-sets over `traits`, with none of `forbidden` present.
    pub(crate) fn satisfies_traits(
        traits: &BTreeSet<TraitId>,
        required: &[BTreeSet<TraitId>],
        forbidden: &BTreeSet<TraitId>,
    ) -> bool {
        required.iter().all(|any_of| !any_of.is_disjoint(traits)) && forbidden.is_disjoint(traits)
    }

    /// Providers out of `ids` whose own traits satisfy the constraints.
    pub(crate) fn filter_by_traits(
        &self,
        ids: &BTreeSet<ProviderId>,
        required: &[BTreeSet<TraitId>],
        forbidden: &BTreeSet<TraitId>,
    ) -> BTreeSet<ProviderId> {
        ids.iter()
            .copied()
            .filter(|id| Self::satisfies_traits(&self.provider_traits(*id), required, forbidden))
            .collect()
    }

    /// Whether one more request of `amount` fits the provider's inventory.
    pub(crate) fn has_capacity(&self, id: ProviderId, rc: ResourceClassId, amount: i64) -> bool {
        self.tables.inventory(id, rc).map_or(false, |inv| {
            inv.accepts_amount(amount)
                && self
                    .tables
                    .usage(id, rc)
                    .checked_add(amount)
                    .map_or(false, |after| after <= inv.capacity())
        })
    }

    pub(crate) fn providers_with_capacity(&self, rc: ResourceClassId, amount: i64) -> BTreeSet<ProviderId> {
        self.tables
            .providers_with_class(rc)
            .filter(|id| self.has_capacity(*id, rc, amount))
            .collect()
    }

    /// Providers marked as sharing their inventory through aggregates.
    pub(crate) fn sharing_providers(&self) -> BTreeSet<ProviderId> {
        match self.tables.trait_by_name(MISC_SHARES_VIA_AGGREGATE) {
            Some(row) => self.tables.providers_with_trait(row.id).collect(),
            None => BTreeSet::new(),
        }
    }

    /// Roots of every tree a sharing provider can serve: its own, plus the
    /// tree of every provider it shares an aggregate with.
    pub(crate) fn anchors_for_sharing_provider(&self, id: ProviderId) -> BTreeSet<ProviderId> {
        let mut anchors = BTreeSet::new();
        anchors.insert(self.root_of(id));
        for aggregate in self.tables.aggregate_ids_of(id) {
            for member in self.tables.providers_in_aggregate(aggregate) {
                anchors.insert(self.root_of(member));
            }
        }
        anchors
    }
}
