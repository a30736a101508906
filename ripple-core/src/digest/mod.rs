//! Digest Machinery
//!
//! Everything a digest root owns and the algorithm that drives it:
//!
//! - `phase`: the single-slot state machine rejecting re-entrant
//!   digest/apply calls on one tree
//! - `queue`: the eval-async and apply-async task queues
//! - `defer`: the host-driven deferred-turn scheduler standing in for
//!   platform timers
//! - `engine`: the stabilization algorithm itself
//!
//! # The Digest Root
//!
//! Scopes in one inheritance family observe a single logical phase, a
//! single pair of async queues, and a single short-circuit marker. All of
//! that state lives in one [`RootCtx`] owned by the family's designated
//! digest root; every scope in the family holds an `Rc` to it rather than
//! duplicating any of it. An isolated scope starts a new family: it gets
//! a fresh `RootCtx` of its own while remaining a node of its parent's
//! traversal tree.

mod defer;
mod engine;
mod phase;
mod queue;

pub use phase::Phase;

pub(crate) use defer::{DeferId, DeferQueue};
pub(crate) use engine::{execute_apply_queue, run_digest};
pub(crate) use phase::PhaseCell;
pub(crate) use queue::{QueuedTask, TaskQueue};

use std::cell::Cell;

use crate::scope::watcher::WatchId;

/// Shared state owned by one digest root.
pub(crate) struct RootCtx {
    /// Phase mutual exclusion for the whole family.
    pub(crate) phase: PhaseCell,
    /// The most recent watcher observed dirty during the current digest.
    /// When a full revolution returns to it without finding any change,
    /// the rest of the tree is already stable and the pass stops early.
    pub(crate) last_dirty: Cell<Option<WatchId>>,
    pub(crate) eval_queue: TaskQueue,
    pub(crate) apply_queue: TaskQueue,
    /// Deferred-turn id of the pending coalesced apply, if one is
    /// scheduled.
    pub(crate) apply_timer: Cell<Option<DeferId>>,
    pub(crate) defer: DeferQueue,
}

impl RootCtx {
    pub(crate) fn new() -> Self {
        Self {
            phase: PhaseCell::new(),
            last_dirty: Cell::new(None),
            eval_queue: TaskQueue::new(),
            apply_queue: TaskQueue::new(),
            apply_timer: Cell::new(None),
            defer: DeferQueue::new(),
        }
    }
}
