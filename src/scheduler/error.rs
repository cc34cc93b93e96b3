//! Contract violations for the scheduler core.
//!
//! None of these are ever returned from a fallible function — per the
//! failure model this crate follows, a violated contract is a caller bug,
//! not a runtime condition, so every variant here is only ever formatted
//! into a panic (see `tree.rs`). The enum exists so that message text is
//! defined in one place and so tests can match on `std::panic::catch_unwind`
//! results instead of string-matching a bare `panic!`.
//!
//! The one contract named in the design that has no variant here is "a
//! visitor must not open, close, or set-active any node during its
//! callback": the visitor closure only ever receives a `NodeId`, never a
//! handle back to the `Scheduler`, so that violation has no call site to
//! raise it from — it's ruled out by the visitor's signature rather than
//! checked at runtime.

use super::tree::{NodeId, Parent};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("weight {weight} out of range [1, 256] opening node under {parent:?}")]
    WeightOutOfRange { parent: Parent, weight: u32 },

    #[error("close() called on node {0:?} that is not open in this scheduler")]
    CloseUnopened(NodeId),

    #[error("set_active() called on node {0:?} that is not open in this scheduler")]
    SetActiveUnopened(NodeId),

    #[error("open() called with a parent {0:?} that is not open in this scheduler")]
    OpenUnknownParent(NodeId),

    #[error("reprioritize() called on node {0:?} that is not open in this scheduler")]
    ReprioritizeUnopened(NodeId),

    #[error("dispose() called on a scheduler whose root still has {0} open child/children")]
    DisposeNonEmpty(usize),
}
