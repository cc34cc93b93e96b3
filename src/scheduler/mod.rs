//! The stream priority scheduler core: a weighted dependency tree of open
//! references and the depth-first driver that decides which active leaf is
//! serviced next.
//!
//! This module has no I/O, no framing, and no flow-control accounting — it
//! only answers "which stream next," the same question an HTTP/2 send loop
//! asks on every write opportunity. Callers own opening/closing nodes in
//! response to protocol events (HEADERS, PRIORITY, RST_STREAM, ...) and own
//! driving `run` whenever there's a write opportunity on the connection.

mod error;
mod slot_queue;
mod tree;

pub use error::SchedulerError;
pub use tree::{Feedback, NodeId, Parent, RunBudget, Scheduler};
