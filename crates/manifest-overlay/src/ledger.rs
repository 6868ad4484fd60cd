//! Bookkeeping of which entries a merge has already accepted.

use std::collections::{BTreeMap, BTreeSet};

/// The mergeable fields of a [`Kustomization`](crate::kustomization::Kustomization).
///
/// Each category has exactly one merge policy, see [`crate::merge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "camelCase")]
pub enum FieldCategory {
    Bases,
    NamePrefix,
    NameSuffix,
    Namespace,
    CommonLabels,
    CommonAnnotations,
    GeneratorOptions,
    Resources,
    Images,
    Crds,
    ConfigMapGenerator,
    SecretGenerator,
    Vars,
    PatchesStrategicMerge,
    PatchesJson6902,
    Configurations,
}

/// The set of seen dedup keys per [`FieldCategory`].
///
/// A ledger belongs to exactly one top-level merge (the base and all overlays of one component)
/// and is dropped together with it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DedupLedger {
    seen: BTreeMap<FieldCategory, BTreeSet<String>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, category: FieldCategory, key: &str) -> bool {
        self.seen
            .get(&category)
            .is_some_and(|keys| keys.contains(key))
    }

    /// Marks `key` as seen. Returns `true` if it was not seen before.
    pub fn mark(&mut self, category: FieldCategory, key: impl Into<String>) -> bool {
        self.seen.entry(category).or_default().insert(key.into())
    }

    /// Number of keys seen in `category`.
    pub fn count(&self, category: FieldCategory) -> usize {
        self.seen.get(&category).map_or(0, BTreeSet::len)
    }
}
