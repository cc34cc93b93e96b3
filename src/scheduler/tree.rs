//! The node arena, the root, and the depth-first iteration driver.
//!
//! A node is both a leaf candidate in its parent's `SlotQueue` and the host
//! of its own `SlotQueue` for its children — there is no separate "inner
//! node" type (see the module doc on this dual role). Nodes live in a flat
//! arena (`Vec<Slot>`) addressed by a generation-checked `NodeId`, which is
//! this crate's answer to the "caller supplies node storage, scheduler
//! allocates nothing" property of the reference implementation's intrusive
//! linked lists: here the arena is the storage, and a stale `NodeId` (one
//! from a closed slot) is rejected the same way an unopened one would be,
//! which is what makes `open`-twice structurally unrepresentable through
//! this API rather than something checked at runtime.

use log::{debug, error, trace};

use super::error::SchedulerError;
use super::slot_queue::SlotQueue;

/// Logs `err` at `error!` and panics with its `Display` text, so the log
/// record and the panic message carry identical wording (see the crate's
/// error-handling design: contract violations are fatal, not recoverable).
fn fail(err: SchedulerError) -> ! {
    error!("{}", err);
    panic!("{}", err);
}

/// A handle to an open node. Stable for the node's lifetime; a `NodeId` from
/// a node that has since been closed will not resolve to anything (its slot
/// has moved on to a new generation), so using it is a contract violation
/// caught at the point of use rather than silently acting on the wrong node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[cfg(test)]
impl NodeId {
    pub(crate) fn for_test(index: u32) -> NodeId {
        NodeId { index, generation: 0 }
    }
}

/// The queue a node (or the root) exposes to whichever `open` call is
/// attaching a new child to it — the "common capability" the design notes
/// call for instead of modeling `parent` as a tagged union reaching into
/// two unrelated types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Root,
    Node(NodeId),
}

/// Feedback from a visitor invocation, replacing the reference
/// implementation's out-parameter-plus-return-code pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    KeepActive,
    BecameInactive,
    Bail,
}

/// Tick ceiling for a single `run` call. A harness convenience, not part of
/// the scheduler's own contract (`run` on its own stops only when the
/// visitor bails or nothing eligible remains).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget(pub usize);

struct Node {
    weight: u16,
    active: bool,
    parent: Parent,
    children: SlotQueue,
    open_seq: u64,
}

enum Slot {
    Vacant { next_generation: u32 },
    Occupied { generation: u32, node: Node },
}

/// The connection-level scheduler: an arena of nodes plus the root's own
/// `SlotQueue`. Single-threaded cooperative — every method here assumes the
/// caller serializes access; there is no internal locking (see the crate's
/// concurrency model).
pub struct Scheduler {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    root: SlotQueue,
    next_open_seq: u64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            slots: Vec::new(),
            free_list: Vec::new(),
            root: SlotQueue::new(),
            next_open_seq: 0,
        }
    }

    /// Resolves a handle without judging whether its absence is a caller
    /// error worth a contextual message; only used where the id is known
    /// trusted (arena-internal bookkeeping), never on a caller-supplied
    /// handle straight off the public API — those validate with `fail`
    /// and a variant naming the operation that was attempted instead.
    fn lookup(&self, id: NodeId) -> Option<&Node> {
        match self.slots.get(id.index as usize) {
            Some(Slot::Occupied { generation, node }) if *generation == id.generation => Some(node),
            _ => None,
        }
    }

    fn lookup_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        match self.slots.get_mut(id.index as usize) {
            Some(Slot::Occupied { generation, node }) if *generation == id.generation => Some(node),
            _ => None,
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.lookup(id).unwrap_or_else(|| fail(SchedulerError::CloseUnopened(id)))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.lookup_mut(id).unwrap_or_else(|| fail(SchedulerError::CloseUnopened(id)))
    }

    fn open_seq_of(&self, id: NodeId) -> u64 {
        self.node(id).open_seq
    }

    fn queue_mut(&mut self, parent: Parent) -> &mut SlotQueue {
        match parent {
            Parent::Root => &mut self.root,
            Parent::Node(id) => &mut self.node_mut(id).children,
        }
    }

    fn queue_total(&self, parent: Parent) -> usize {
        match parent {
            Parent::Root => self.root.total_count(),
            Parent::Node(id) => self.node(id).children.total_count(),
        }
    }

    /// Attaches a new node under `parent` with the given weight, returning
    /// its handle. `exclusive` re-parents every one of `parent`'s current
    /// children underneath the new node, preserving their original
    /// open-order (see `slot_queue::drain_by_open_seq`) rather than their
    /// current rotation state — carrying over the live rotation instead
    /// reproduces a different (and wrong) interleaving once the new node
    /// later goes inactive, so open-order is the one stable choice.
    pub fn open(&mut self, parent: Parent, weight: u16, exclusive: bool) -> NodeId {
        if weight < 1 || weight > 256 {
            fail(SchedulerError::WeightOutOfRange { parent, weight: weight as u32 });
        }
        if let Parent::Node(id) = parent {
            // validates the parent handle eagerly so a foreign/stale id
            // fails here with a message naming `open`, not a generic lookup.
            if self.lookup(id).is_none() {
                fail(SchedulerError::OpenUnknownParent(id));
            }
        }

        let open_seq = self.next_open_seq;
        self.next_open_seq += 1;

        let node = Node {
            weight,
            active: false,
            parent,
            children: SlotQueue::new(),
            open_seq,
        };

        let index = match self.free_list.pop() {
            Some(index) => {
                let generation = match self.slots[index as usize] {
                    Slot::Vacant { next_generation } => next_generation,
                    Slot::Occupied { .. } => unreachable!("free list pointed at an occupied slot"),
                };
                self.slots[index as usize] = Slot::Occupied { generation, node };
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { generation: 0, node });
                index
            }
        };
        let generation = match &self.slots[index as usize] {
            Slot::Occupied { generation, .. } => *generation,
            Slot::Vacant { .. } => unreachable!(),
        };
        let id = NodeId { index, generation };

        if exclusive {
            // `drain_by_open_seq`'s closure needs `&self` (for `open_seq_of`)
            // while its receiver would otherwise hold a live `&mut self` from
            // `queue_mut` — swap the queue out to a local first, exactly as
            // `close` does, so the two borrows never overlap.
            let mut q = std::mem::replace(self.queue_mut(parent), SlotQueue::new());
            let orphans = q.drain_by_open_seq(|child| self.open_seq_of(child));
            for (child_weight, child_id) in orphans {
                self.node_mut(child_id).parent = Parent::Node(id);
                self.node_mut(id).children.push_back(child_weight, child_id);
            }
        }
        self.queue_mut(parent).push_back(weight, id);

        debug!("open node {:?} weight={} exclusive={} under {:?}", id, weight, exclusive, parent);
        id
    }

    /// Detaches `node`, promoting each of its children into its own parent
    /// in original open-order. The closed node's storage is released back to
    /// the arena; its `NodeId` will not resolve again.
    pub fn close(&mut self, id: NodeId) {
        if self.lookup(id).is_none() {
            fail(SchedulerError::CloseUnopened(id));
        }
        let (parent, mut children) = {
            let node = self.node_mut(id);
            (node.parent, std::mem::replace(&mut node.children, SlotQueue::new()))
        };

        let weight = self.node(id).weight;
        self.queue_mut(parent).remove(weight, id);

        let orphans = children.drain_by_open_seq(|child| self.open_seq_of(child));
        for (child_weight, child_id) in orphans {
            self.node_mut(child_id).parent = parent;
            self.queue_mut(parent).push_back(child_weight, child_id);
        }

        let index = id.index as usize;
        self.slots[index] = Slot::Vacant { next_generation: id.generation.wrapping_add(1) };
        self.free_list.push(id.index);

        debug!("close node {:?}, promoted under {:?}", id, parent);
    }

    /// Equivalent to close-then-open preserving identity: `node` is detached
    /// from its current parent and re-attached under `new_parent` with
    /// `new_weight`, without disturbing `node`'s own children.
    pub fn reprioritize(&mut self, id: NodeId, new_parent: Parent, new_weight: u16, exclusive: bool) {
        if self.lookup(id).is_none() {
            fail(SchedulerError::ReprioritizeUnopened(id));
        }
        if new_weight < 1 || new_weight > 256 {
            fail(SchedulerError::WeightOutOfRange { parent: Parent::Node(id), weight: new_weight as u32 });
        }
        if let Parent::Node(new_parent_id) = new_parent {
            if self.lookup(new_parent_id).is_none() {
                fail(SchedulerError::OpenUnknownParent(new_parent_id));
            }
        }
        let old_parent = self.node(id).parent;
        let old_weight = self.node(id).weight;
        self.queue_mut(old_parent).remove(old_weight, id);
        self.node_mut(id).weight = new_weight;
        self.node_mut(id).parent = new_parent;

        if exclusive {
            let mut q = std::mem::replace(self.queue_mut(new_parent), SlotQueue::new());
            let orphans = q.drain_by_open_seq(|child| self.open_seq_of(child));
            for (child_weight, child_id) in orphans {
                self.node_mut(child_id).parent = Parent::Node(id);
                self.node_mut(id).children.push_back(child_weight, child_id);
            }
        }
        self.queue_mut(new_parent).push_back(new_weight, id);

        debug!("reprioritize node {:?} weight={} under {:?}", id, new_weight, new_parent);
    }

    /// Marks `node` as having data ready to send. No structural change is
    /// needed — an open node is always already present in its parent's
    /// queue, so the next `run` simply discovers it.
    pub fn set_active(&mut self, id: NodeId) {
        match self.lookup_mut(id) {
            Some(node) => node.active = true,
            None => fail(SchedulerError::SetActiveUnopened(id)),
        }
        trace!("set_active {:?}", id);
    }

    /// Requires the root to have no open children; otherwise this is a
    /// contract violation. Consumes the scheduler so nothing further can be
    /// done with it regardless.
    pub fn dispose(self) {
        if !self.root.is_empty() {
            fail(SchedulerError::DisposeNonEmpty(self.root.total_count()));
        }
    }

    /// Runs the depth-first driver until the visitor bails or no eligible
    /// node remains, up to `budget` visitor invocations. Returns the number
    /// of invocations made.
    pub fn run<F>(&mut self, budget: RunBudget, mut visitor: F) -> usize
    where
        F: FnMut(NodeId) -> Feedback,
    {
        let mut serviced = 0;
        while serviced < budget.0 {
            let (produced, bail) = self.try_serve_one(Parent::Root, &mut visitor);
            if !produced {
                break;
            }
            serviced += 1;
            if bail {
                break;
            }
        }
        serviced
    }

    /// One pass over `parent`'s queue: finds a single candidate that either
    /// is itself an active leaf, or is an inactive inner node whose subtree
    /// produces a visit, serves it, and rotates it. Candidates tried along
    /// the way that turn out to produce nothing are held aside and put back
    /// at the front of their bucket — in their original relative order — so
    /// the queue looks untouched from the outside, per the rule that an
    /// unproductive subtree must not be rotated.
    ///
    /// Returns `(produced, bail)`: `produced` is false only when the whole
    /// subtree rooted at `parent` has nothing eligible left.
    fn try_serve_one<F>(&mut self, parent: Parent, visitor: &mut F) -> (bool, bool)
    where
        F: FnMut(NodeId) -> Feedback,
    {
        let total = self.queue_total(parent);
        if total == 0 {
            return (false, false);
        }

        let mut skipped: Vec<(u16, NodeId)> = Vec::new();
        loop {
            if skipped.len() >= total {
                self.restore_skipped(parent, skipped);
                return (false, false);
            }

            let (weight, id) = match self.queue_mut(parent).pop_front_for_trial() {
                Some(x) => x,
                None => {
                    self.restore_skipped(parent, skipped);
                    return (false, false);
                }
            };

            if self.node(id).active {
                let feedback = visitor(id);
                if feedback == Feedback::BecameInactive {
                    self.node_mut(id).active = false;
                }
                self.queue_mut(parent).push_back(weight, id);
                self.restore_skipped(parent, skipped);
                return (true, feedback == Feedback::Bail);
            } else {
                let (produced, bail) = self.try_serve_one(Parent::Node(id), visitor);
                if produced {
                    self.queue_mut(parent).push_back(weight, id);
                    self.restore_skipped(parent, skipped);
                    return (true, bail);
                }
                // subtree was entirely inactive; do not rotate this node —
                // hold it aside and keep looking at the rest of the level.
                trace!("skip rotate of {:?}: subtree produced nothing", id);
                skipped.push((weight, id));
            }
        }
    }

    fn restore_skipped(&mut self, parent: Parent, skipped: Vec<(u16, NodeId)>) {
        for (weight, id) in skipped.into_iter().rev() {
            self.queue_mut(parent).push_front(weight, id);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Scheduler {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// Drives `budget` ticks and records each visited node's label as a
    /// comma-joined trace, matching the literal strings in the end-to-end
    /// scenarios. A label in `deactivate_on_first_visit` reports
    /// `BecameInactive` the first time it's visited during *this* call only
    /// (and `KeepActive` on every later visit, in this or a later call).
    fn trace(
        sched: &mut Scheduler,
        labels: &HashMap<NodeId, &'static str>,
        budget: usize,
        deactivate_on_first_visit: &[&'static str],
    ) -> String {
        let mut seen = HashSet::new();
        let mut visited = Vec::new();
        sched.run(RunBudget(budget), |id| {
            let label = labels[&id];
            visited.push(label);
            if deactivate_on_first_visit.contains(&label) && seen.insert(label) {
                Feedback::BecameInactive
            } else {
                Feedback::KeepActive
            }
        });
        visited.join(",")
    }

    fn open_labeled(
        sched: &mut Scheduler,
        labels: &mut HashMap<NodeId, &'static str>,
        parent: Parent,
        weight: u16,
        exclusive: bool,
        label: &'static str,
    ) -> NodeId {
        let id = sched.open(parent, weight, exclusive);
        labels.insert(id, label);
        id
    }

    #[test]
    fn scenario_1_equal_weight_siblings_cycle_open_order() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        for name in ["A", "B", "C"] {
            let id = open_labeled(&mut sched, &mut labels, Parent::Root, 12, false, name);
            sched.set_active(id);
        }
        assert_eq!(trace(&mut sched, &labels, 7, &[]), "A,B,C,A,B,C,A");
    }

    #[test]
    fn scenario_2_single_active_leaf_monopolizes_then_exhausts() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        let a = open_labeled(&mut sched, &mut labels, Parent::Root, 12, false, "A");
        open_labeled(&mut sched, &mut labels, Parent::Root, 12, false, "B");
        open_labeled(&mut sched, &mut labels, Parent::Root, 12, false, "C");
        sched.set_active(a);

        assert_eq!(trace(&mut sched, &labels, 4, &[]), "A,A,A,A");
        // A deactivates the first time it's visited this run; B and C are
        // still inactive, so the tree has nothing eligible left and `run`
        // stops well short of the budget.
        assert_eq!(trace(&mut sched, &labels, 4, &["A"]), "A");
    }

    #[test]
    fn scenario_3_weight_classes_then_progressive_deactivation() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        let a = open_labeled(&mut sched, &mut labels, Parent::Root, 32, false, "A");
        let b = open_labeled(&mut sched, &mut labels, Parent::Root, 32, false, "B");
        let c = open_labeled(&mut sched, &mut labels, Parent::Root, 12, false, "C");
        for id in [a, b, c] {
            sched.set_active(id);
        }

        assert_eq!(trace(&mut sched, &labels, 5, &[]), "A,B,A,B,A");
        assert_eq!(trace(&mut sched, &labels, 5, &["A"]), "B,A,B,B,B");
        assert_eq!(trace(&mut sched, &labels, 5, &["B"]), "B,C,C,C,C");
    }

    #[test]
    fn scenario_4_inner_node_that_is_also_an_active_leaf() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        let a = open_labeled(&mut sched, &mut labels, Parent::Root, 32, false, "A");
        let b = open_labeled(&mut sched, &mut labels, Parent::Root, 32, false, "B");
        let c = open_labeled(&mut sched, &mut labels, Parent::Root, 12, false, "C");
        let d = open_labeled(&mut sched, &mut labels, Parent::Node(a), 24, false, "D");
        for id in [a, b, c, d] {
            sched.set_active(id);
        }

        assert_eq!(trace(&mut sched, &labels, 5, &[]), "A,B,A,B,A");
        assert_eq!(trace(&mut sched, &labels, 7, &["A"]), "B,A,B,D,B,D,B");
        assert_eq!(trace(&mut sched, &labels, 5, &["B"]), "D,B,D,D,D");

        // D promotes from being A's child to being a direct child of the
        // root; A is released and its NodeId must not be used again.
        sched.close(a);
        sched.set_active(b);
        assert_eq!(
            trace(&mut sched, &labels, 5, &["B", "C", "D"]),
            "B,D,C"
        );
    }

    #[test]
    fn scenario_5_exclusive_insertion_reorders_by_least_recently_served() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        let a = open_labeled(&mut sched, &mut labels, Parent::Root, 32, false, "A");
        let b = open_labeled(&mut sched, &mut labels, Parent::Root, 32, false, "B");
        sched.set_active(a);
        sched.set_active(b);

        assert_eq!(trace(&mut sched, &labels, 5, &[]), "A,B,A,B,A");

        // C is inserted exclusive over A and B: A and B become C's children,
        // reparented in their original open order, not their current
        // rotation. C itself starts inactive.
        let c = open_labeled(&mut sched, &mut labels, Parent::Root, 12, true, "C");
        assert_eq!(trace(&mut sched, &labels, 5, &[]), "A,B,A,B,A");

        sched.set_active(c);
        assert_eq!(trace(&mut sched, &labels, 5, &[]), "C,C,C,C,C");

        // C deactivates on its first visit here; service resumes among its
        // children starting from whichever of A/B was LEAST recently served
        // under the old parent — B, not A, per the open-question resolution.
        assert_eq!(trace(&mut sched, &labels, 5, &["C"]), "C,B,A,B,A");
    }

    #[test]
    fn scenario_6_firefox_style_tree_of_groups_and_leaves() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        let g1 = open_labeled(&mut sched, &mut labels, Parent::Root, 201, false, "g1");
        let _g2 = open_labeled(&mut sched, &mut labels, Parent::Root, 101, false, "g2");
        let g3 = open_labeled(&mut sched, &mut labels, Parent::Root, 1, false, "g3");
        let _g4 = open_labeled(&mut sched, &mut labels, Parent::Node(g3), 1, false, "g4");
        let g5 = open_labeled(&mut sched, &mut labels, Parent::Node(g1), 1, false, "g5");
        let r1 = open_labeled(&mut sched, &mut labels, Parent::Node(g5), 22, false, "r1");
        let r2 = open_labeled(&mut sched, &mut labels, Parent::Node(g1), 22, false, "r2");
        let r3 = open_labeled(&mut sched, &mut labels, Parent::Node(g1), 22, false, "r3");

        sched.set_active(r1);
        assert_eq!(trace(&mut sched, &labels, 5, &[]), "r1,r1,r1,r1,r1");

        sched.set_active(r2);
        sched.set_active(r3);
        assert_eq!(trace(&mut sched, &labels, 5, &[]), "r2,r3,r2,r3,r2");

        assert_eq!(trace(&mut sched, &labels, 5, &["r2", "r3"]), "r3,r2,r1,r1,r1");

        sched.close(r2);
        sched.close(r3);
        assert_eq!(trace(&mut sched, &labels, 5, &[]), "r1,r1,r1,r1,r1");
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn open_rejects_weight_out_of_range() {
        let mut sched = Scheduler::new();
        sched.open(Parent::Root, 0, false);
    }

    #[test]
    #[should_panic(expected = "not open in this scheduler")]
    fn close_unopened_node_panics() {
        let mut sched = Scheduler::new();
        let a = sched.open(Parent::Root, 16, false);
        sched.close(a);
        sched.close(a);
    }

    #[test]
    #[should_panic(expected = "not open in this scheduler")]
    fn set_active_on_closed_node_panics() {
        let mut sched = Scheduler::new();
        let a = sched.open(Parent::Root, 16, false);
        sched.close(a);
        sched.set_active(a);
    }

    #[test]
    #[should_panic(expected = "reprioritize() called")]
    fn reprioritize_unopened_node_panics() {
        let mut sched = Scheduler::new();
        let a = sched.open(Parent::Root, 16, false);
        sched.close(a);
        sched.reprioritize(a, Parent::Root, 8, false);
    }

    #[test]
    #[should_panic(expected = "dispose")]
    fn dispose_nonempty_root_panics() {
        let mut sched = Scheduler::new();
        let _a = sched.open(Parent::Root, 16, false);
        sched.dispose();
    }

    #[test]
    fn dispose_empty_root_succeeds() {
        let sched = Scheduler::new();
        sched.dispose();
    }

    #[test]
    fn close_promotes_open_children_preserving_their_weights() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        let parent = open_labeled(&mut sched, &mut labels, Parent::Root, 32, false, "P");
        let child_a = open_labeled(&mut sched, &mut labels, Parent::Node(parent), 16, false, "A");
        let child_b = open_labeled(&mut sched, &mut labels, Parent::Node(parent), 16, false, "B");
        sched.set_active(child_a);
        sched.set_active(child_b);

        sched.close(parent);

        // Both children now sit directly under the root with their
        // original weight and open order preserved, still active and
        // visible to the very next `run`.
        assert_eq!(trace(&mut sched, &labels, 4, &[]), "A,B,A,B");
    }

    #[test]
    fn closing_an_active_leaf_is_silent_and_it_never_appears_again() {
        let mut sched = Scheduler::new();
        let mut labels = HashMap::new();
        let a = open_labeled(&mut sched, &mut labels, Parent::Root, 16, false, "A");
        let b = open_labeled(&mut sched, &mut labels, Parent::Root, 16, false, "B");
        sched.set_active(a);
        sched.set_active(b);

        sched.close(a);

        assert_eq!(trace(&mut sched, &labels, 4, &[]), "B,B,B,B");
    }
}
