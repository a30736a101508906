//! Async Task Queues
//!
//! Two FIFO queues hang off every digest root, sharing one task shape but
//! different flush policies (the policies live in the engine):
//!
//! - the **eval-async** queue: tasks to run inside the current or a
//!   freshly triggered digest, as soon as possible;
//! - the **apply-async** queue: tasks batched behind a single pending
//!   deferred apply, coalescing many schedules into one eventual digest.
//!
//! A queued task is bound to the scope it was scheduled against and runs
//! via that scope's `eval`.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::error::EvalResult;
use crate::scope::node::Scope;

/// A deferred evaluation bound to its scope. Call arguments are closure
/// captures.
pub(crate) struct QueuedTask {
    scope: Scope,
    task: Box<dyn FnOnce(&Scope) -> EvalResult<()>>,
}

impl QueuedTask {
    pub(crate) fn new(scope: Scope, task: Box<dyn FnOnce(&Scope) -> EvalResult<()>>) -> Self {
        Self { scope, task }
    }

    /// Evaluate the task against its scope.
    pub(crate) fn run(self) -> EvalResult<()> {
        let QueuedTask { scope, task } = self;
        scope.eval(task)
    }
}

/// FIFO queue of [`QueuedTask`]s.
pub(crate) struct TaskQueue {
    tasks: RefCell<VecDeque<QueuedTask>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            tasks: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, task: QueuedTask) {
        self.tasks.borrow_mut().push_back(task);
    }

    pub(crate) fn pop(&self) -> Option<QueuedTask> {
        self.tasks.borrow_mut().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn tasks_run_against_their_scope_in_fifo_order() {
        let queue = TaskQueue::new();
        let scope = Scope::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for label in ["first", "second"] {
            let order = Rc::clone(&order);
            queue.push(QueuedTask::new(
                scope.clone(),
                Box::new(move |s: &Scope| {
                    s.set(label, label);
                    order.borrow_mut().push(label);
                    Ok(())
                }),
            ));
        }

        assert_eq!(queue.len(), 2);
        while let Some(task) = queue.pop() {
            task.run().unwrap();
        }

        assert_eq!(*order.borrow(), vec!["first", "second"]);
        assert!(queue.is_empty());
        assert_eq!(scope.get("first").as_str(), Some("first"));
    }
}
