//! Sync Failure Blocklist.
//!
//! Remembers, per node, the `join_id` of the round during which a CIB sync
//! from that node failed. A later `JoinRequest` from a blocklisted node is
//! nacked by the join coordinator rather than attempted again, until the
//! entry is cleared. Deliberately a plain, unsynchronized map: the join
//! coordinator only ever touches it from within its own already-locked round
//! state, the same way its sibling components hold their state in bare
//! `HashMap`s rather than wrapping every field in a lock.

use dc_join_core::types::NodeName;
use std::collections::HashMap;

#[derive(Default)]
pub struct SyncFailureBlocklist {
    entries: HashMap<NodeName, u32>,
}

impl SyncFailureBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a CIB sync from `node` failed during round `join_id`.
    /// Overwrites any prior entry for the same node.
    pub fn record(&mut self, node: NodeName, join_id: u32) {
        self.entries.insert(node, join_id);
    }

    /// Returns the `join_id` recorded for `node`, if it is currently
    /// blocklisted.
    pub fn lookup(&self, node: &NodeName) -> Option<u32> {
        self.entries.get(node).copied()
    }

    pub fn is_blocked(&self, node: &NodeName) -> bool {
        self.entries.contains_key(node)
    }

    /// Clears the blocklist entry for a single node, e.g. once it has
    /// rejoined successfully.
    pub fn remove(&mut self, node: &NodeName) {
        self.entries.remove(node);
    }

    /// Clears every entry, e.g. at the start of a fresh membership epoch.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_lookup_round_trips() {
        let mut sfb = SyncFailureBlocklist::new();
        let b = NodeName::new("B");
        assert!(sfb.lookup(&b).is_none());
        sfb.record(b.clone(), 7);
        assert_eq!(sfb.lookup(&b), Some(7));
        assert!(sfb.is_blocked(&b));
    }

    #[test]
    fn recording_again_overwrites_the_join_id() {
        let mut sfb = SyncFailureBlocklist::new();
        let b = NodeName::new("B");
        sfb.record(b.clone(), 7);
        sfb.record(b.clone(), 9);
        assert_eq!(sfb.lookup(&b), Some(9));
    }

    #[test]
    fn remove_clears_a_single_entry() {
        let mut sfb = SyncFailureBlocklist::new();
        let (b, c) = (NodeName::new("B"), NodeName::new("C"));
        sfb.record(b.clone(), 1);
        sfb.record(c.clone(), 2);
        sfb.remove(&b);
        assert!(sfb.lookup(&b).is_none());
        assert_eq!(sfb.lookup(&c), Some(2));
    }

    #[test]
    fn clear_all_empties_the_blocklist() {
        let mut sfb = SyncFailureBlocklist::new();
        sfb.record(NodeName::new("B"), 1);
        sfb.record(NodeName::new("C"), 2);
        sfb.clear_all();
        assert!(sfb.is_empty());
        assert_eq!(sfb.len(), 0);
    }
}
