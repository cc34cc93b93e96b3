//! `priosched` — the scheduling core of an HTTP/2 stream priority tree.
//!
//! Streams declare a parent (another stream, or the connection root) and a
//! weight in `[1, 256]`. Only streams with no unsatisfied dependency that
//! are also active (have data ready) are eligible to be serviced, and
//! eligible siblings are serviced in proportion to weight. This crate is
//! the data structure and algorithm that answers "which stream next" —
//! framing, the stream state machine, flow control, and the socket-side
//! send loop all live outside it and only call in to open/close nodes and
//! to drive iteration.
//!
//! See [`scheduler`] for the public surface: [`scheduler::Scheduler`],
//! [`scheduler::Parent`], [`scheduler::Feedback`], and [`scheduler::RunBudget`].

pub mod scheduler;
