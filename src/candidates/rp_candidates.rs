//! (provider, anchor root, resource class) candidate sets for the
//! multi-provider search.

use crate::types::{ProviderId, ResourceClassId};
use std::collections::{BTreeMap, BTreeSet};

/// One provider able to supply one class within the tree anchored at `root`.
///
/// For a sharing provider `root` is the tree it is anchored into, which may
/// differ from the provider's own root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct RpCandidate {
    pub(crate) rp: ProviderId,
    pub(crate) root: ProviderId,
    pub(crate) rc: ResourceClassId,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RpCandidates {
    entries: BTreeSet<RpCandidate>,
}

impl RpCandidates {
    pub(crate) fn add(&mut self, rp: ProviderId, root: ProviderId, rc: ResourceClassId) {
        self.entries.insert(RpCandidate { rp, root, rc });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RpCandidate> + '_ {
        self.entries.iter()
    }

    pub(crate) fn trees(&self) -> BTreeSet<ProviderId> {
        self.entries.iter().map(|c| c.root).collect()
    }

    /// Union with `other`, keeping only trees present in both.
    pub(crate) fn merge_common_trees(&mut self, other: RpCandidates) {
        if self.entries.is_empty() {
            self.entries = other.entries;
            return;
        }
        let common: BTreeSet<ProviderId> = self.trees().intersection(&other.trees()).copied().collect();
        self.entries.extend(other.entries);
        self.filter_by_tree(&common);
    }

    pub(crate) fn filter_by_tree(&mut self, roots: &BTreeSet<ProviderId>) {
        self.entries.retain(|c| roots.contains(&c.root));
    }

    pub(crate) fn retain<F: FnMut(&RpCandidate) -> bool>(&mut self, keep: F) {
        self.entries.retain(keep);
    }

    /// Entries per tree, then per class, in id order.
    pub(crate) fn by_tree(&self) -> BTreeMap<ProviderId, BTreeMap<ResourceClassId, Vec<ProviderId>>> {
        let mut trees: BTreeMap<ProviderId, BTreeMap<ResourceClassId, Vec<ProviderId>>> = BTreeMap::new();
        for c in &self.entries {
            trees
                .entry(c.root)
                .or_default()
                .entry(c.rc)
                .or_default()
                .push(c.rp);
        }
        trees
    }
}
