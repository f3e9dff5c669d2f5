//! Version vectors: per-author highest-contiguous-sequence maps.
//!
//! Grounded on `aura_core::time::VectorClock`'s `BTreeMap`-backed
//! map-with-merge shape; simplified to a single `BTreeMap<NodeId, u64>`
//! since the spec's per-author counts, not per-device counts, are what
//! dominate this structure's size, so the teacher's single/multiple
//! optimization has no payoff here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use drift_core::NodeId;

/// Maps each author to the highest contiguous sequence number observed for
/// them. An absent author is equivalent to sequence `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector(BTreeMap<NodeId, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest contiguous sequence recorded for `author`, or `0` if
    /// unknown.
    pub fn get(&self, author: &NodeId) -> u64 {
        self.0.get(author).copied().unwrap_or(0)
    }

    /// Record `sequence` for `author` if it is greater than what is already
    /// recorded. Returns `true` if the vector changed.
    pub fn update_if_greater(&mut self, author: NodeId, sequence: u64) -> bool {
        match self.0.get(&author) {
            Some(&existing) if existing >= sequence => false,
            _ => {
                self.0.insert(author, sequence);
                true
            }
        }
    }

    /// Per-author maximum of `self` and `other`.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (author, &seq) in other.0.iter() {
            merged
                .entry(author.clone())
                .and_modify(|existing| *existing = (*existing).max(seq))
                .or_insert(seq);
        }
        Self(merged)
    }

    /// The set of authors where `self` is strictly ahead of `other`, i.e.
    /// what `self` owes `other` in an anti-entropy round (spec §4.4).
    pub fn authors_ahead_of(&self, other: &Self) -> Vec<NodeId> {
        self.0
            .iter()
            .filter(|(author, &seq)| seq > other.get(author))
            .map(|(author, _)| author.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(NodeId, u64)> for VersionVector {
    fn from_iter<T: IntoIterator<Item = (NodeId, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<VersionVector> for Vec<(NodeId, u64)> {
    fn from(vv: VersionVector) -> Self {
        vv.0.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    #[test]
    fn absent_author_reads_as_zero() {
        let vv = VersionVector::new();
        assert_eq!(vv.get(&node("alice")), 0);
    }

    #[test]
    fn update_if_greater_is_monotonic() {
        let mut vv = VersionVector::new();
        assert!(vv.update_if_greater(node("alice"), 3));
        assert!(!vv.update_if_greater(node("alice"), 2));
        assert!(vv.update_if_greater(node("alice"), 5));
        assert_eq!(vv.get(&node("alice")), 5);
    }

    #[test]
    fn merge_takes_per_author_max() {
        let a: VersionVector = [(node("alice"), 3), (node("bob"), 1)].into_iter().collect();
        let b: VersionVector = [(node("alice"), 2), (node("bob"), 7)].into_iter().collect();
        let merged = a.merge(&b);
        assert_eq!(merged.get(&node("alice")), 3);
        assert_eq!(merged.get(&node("bob")), 7);
    }

    #[test]
    fn authors_ahead_of_is_asymmetric() {
        let local: VersionVector = [(node("alice"), 5), (node("bob"), 1)].into_iter().collect();
        let remote: VersionVector = [(node("alice"), 2), (node("bob"), 1)].into_iter().collect();
        assert_eq!(local.authors_ahead_of(&remote), vec![node("alice")]);
        assert!(remote.authors_ahead_of(&local).is_empty());
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let a: VersionVector = [(node("alice"), 3)].into_iter().collect();
        let b: VersionVector = [(node("alice"), 9), (node("carol"), 2)].into_iter().collect();
        assert_eq!(a.merge(&b), b.merge(&a));
        assert_eq!(a.merge(&a), a);
    }
}
