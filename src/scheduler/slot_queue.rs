//! Weight-bucketed round-robin queue belonging to one parent (the root or a
//! single node). Every child of that parent sits in exactly one bucket,
//! grouped by weight; buckets are walked heaviest-first under a descending
//! credit counter so that, over a long enough run, each bucket is served
//! roughly `weight` times out of every 256 ticks.
//!
//! The queue is intentionally blind to whether a child is "active" — that is
//! a property of the node, not of its place in the queue (see `tree.rs`).
//! Closing or deactivating a child are different operations: deactivating
//! leaves the child right where it is, closing removes it from here.

use std::collections::{BTreeMap, VecDeque};

use super::tree::NodeId;

#[derive(Debug, Clone)]
pub struct SlotQueue {
    buckets: BTreeMap<u16, VecDeque<NodeId>>,
    credit: u16,
}

impl SlotQueue {
    pub fn new() -> SlotQueue {
        SlotQueue {
            buckets: BTreeMap::new(),
            credit: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total_count(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    /// Places `id` at the tail of its weight bucket. Used both by `open` and
    /// by `rotate` (the just-served child goes back in at the tail).
    pub fn push_back(&mut self, weight: u16, id: NodeId) {
        self.buckets.entry(weight).or_insert_with(VecDeque::new).push_back(id);
    }

    /// Re-inserts `id` at the head of its weight bucket. Only used to restore
    /// a child that was popped for a trial and turned out unproductive, so
    /// that from the outside the queue looks untouched.
    pub fn push_front(&mut self, weight: u16, id: NodeId) {
        self.buckets.entry(weight).or_insert_with(VecDeque::new).push_front(id);
    }

    /// Detaches `id`, wherever it sits within its bucket. Used by `close` and
    /// by reprioritization to pull a child out ahead of a structural move.
    /// O(bucket size); an intrusive linked-list implementation would do this
    /// in O(1), but a plain `VecDeque` keeps the arena free of link fields.
    pub fn remove(&mut self, weight: u16, id: NodeId) {
        if let Some(bucket) = self.buckets.get_mut(&weight) {
            if let Some(pos) = bucket.iter().position(|&x| x == id) {
                bucket.remove(pos);
            }
            if bucket.is_empty() {
                self.buckets.remove(&weight);
            }
        }
    }

    /// Selects the next candidate per the credit algorithm and removes it
    /// from its bucket, returning its weight alongside it. The caller decides
    /// whether to `push_back` (served) or hold it aside to `push_front` later
    /// (unproductive trial) — this type has no notion of "served" itself.
    pub fn pop_front_for_trial(&mut self) -> Option<(u16, NodeId)> {
        if self.buckets.is_empty() {
            return None;
        }
        if self.credit == 0 {
            self.credit = *self.buckets.keys().next_back().unwrap();
        }
        loop {
            let mut matched_weight = None;
            for (&weight, bucket) in self.buckets.iter().rev() {
                if weight >= self.credit && !bucket.is_empty() {
                    matched_weight = Some(weight);
                    break;
                }
            }
            match matched_weight {
                Some(weight) => {
                    let bucket = self.buckets.get_mut(&weight).unwrap();
                    let id = bucket.pop_front().unwrap();
                    if bucket.is_empty() {
                        self.buckets.remove(&weight);
                    }
                    return Some((weight, id));
                }
                None => {
                    if self.credit <= 1 {
                        self.credit = *self.buckets.keys().next_back().unwrap();
                    } else {
                        self.credit -= 1;
                    }
                }
            }
        }
    }

    /// Drains every child in original-open-order (ascending `open_seq`),
    /// clearing the queue. Used by `close` (promoting orphans to the
    /// grandparent) and by exclusive `open` (re-parenting former siblings
    /// under the newly inserted node) — both want a deterministic, stable
    /// order rather than whatever the current rotation happens to be.
    pub fn drain_by_open_seq<F: Fn(NodeId) -> u64>(&mut self, open_seq: F) -> Vec<(u16, NodeId)> {
        let mut all: Vec<(u16, NodeId)> = self
            .buckets
            .iter()
            .flat_map(|(&w, bucket)| bucket.iter().map(move |&id| (w, id)))
            .collect();
        all.sort_by_key(|&(_, id)| open_seq(id));
        self.buckets.clear();
        all
    }
}
