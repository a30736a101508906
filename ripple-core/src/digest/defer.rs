//! Deferred-Turn Scheduler
//!
//! The engine runs on a single cooperative timeline. "Asynchronous" work
//! is work deferred to a later turn of that timeline, never concurrent
//! execution. This module is the turn boundary: a per-root queue of
//! one-shot tasks standing in for the platform's zero-delay timer.
//!
//! The host drives turns explicitly through `Scope::run_deferred`. One
//! drain executes only the tasks that were pending when it started; a
//! task scheduling further work pushes that work into the next turn.
//! Tasks can be cancelled up until their turn fires; the digest engine
//! uses this to absorb a scheduled apply-async flush into an explicit
//! digest that preempts it.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

pub(crate) type DeferredTask = Box<dyn FnOnce()>;

/// Identifier of a scheduled task, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeferId(u64);

/// FIFO queue of one-shot deferred tasks.
pub(crate) struct DeferQueue {
    next_id: Cell<u64>,
    tasks: RefCell<VecDeque<(DeferId, DeferredTask)>>,
}

impl DeferQueue {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            tasks: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn schedule(&self, task: DeferredTask) -> DeferId {
        let id = DeferId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.tasks.borrow_mut().push_back((id, task));
        id
    }

    /// Drop a scheduled task. Returns whether it was still pending.
    pub(crate) fn cancel(&self, id: DeferId) -> bool {
        let mut tasks = self.tasks.borrow_mut();
        let before = tasks.len();
        tasks.retain(|(task_id, _)| *task_id != id);
        tasks.len() != before
    }

    /// Execute the tasks pending at entry, in schedule order. Tasks
    /// scheduled (or cancelled) while draining are respected: new tasks
    /// wait for the next turn. Returns how many tasks ran.
    pub(crate) fn run_pending(&self) -> usize {
        // Ids are monotonic, so everything scheduled from here on sits
        // past this cutoff.
        let cutoff = self.next_id.get();
        let mut executed = 0;
        loop {
            let next = {
                let mut tasks = self.tasks.borrow_mut();
                match tasks.front() {
                    Some((id, _)) if id.0 < cutoff => tasks.pop_front(),
                    _ => None,
                }
            };
            let Some((_, task)) = next else {
                break;
            };
            task();
            executed += 1;
        }
        executed
    }
}
