//! Grouped Watches
//!
//! `watch_group` observes several expressions with a single listener that
//! fires at most once per digest round, however many members changed.
//! Member watches collect their values; the first change in a round
//! schedules one eval-async notification, which runs after the round's
//! watcher pass and before the next.
//!
//! On the very first notification both slices handed to the listener are
//! the same allocation; `std::ptr::eq(new, old)` is the first-run test.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::EvalResult;
use crate::scope::node::Scope;
use crate::scope::value::Value;
use crate::scope::watcher::{WatchExpr, WatchHandle};

struct GroupState {
    new_values: RefCell<Vec<Value>>,
    old_values: RefCell<Vec<Value>>,
    listener: RefCell<Box<dyn FnMut(&[Value], &[Value], &Scope) -> EvalResult<()>>>,
    first_run: Cell<bool>,
    scheduled: Cell<bool>,
}

/// Disposer for a watch group. Idempotent, like [`WatchHandle`].
pub struct GroupHandle {
    watches: Vec<WatchHandle>,
    /// Set for the empty-group case: flipping it suppresses the pending
    /// one-shot notification.
    destroyed: Option<Rc<Cell<bool>>>,
}

impl GroupHandle {
    /// Dispose every member watch, or suppress the pending empty-group
    /// notification.
    pub fn dispose(&self) {
        for watch in &self.watches {
            watch.dispose();
        }
        if let Some(flag) = &self.destroyed {
            flag.set(true);
        }
    }
}

impl Scope {
    /// Watch several expressions with one listener, called at most once
    /// per digest round with all current and all previous values.
    ///
    /// An empty group still notifies exactly once (with empty slices) on
    /// the next digest, unless disposed first.
    pub fn watch_group<L>(&self, watch_fns: Vec<WatchExpr>, listener_fn: L) -> GroupHandle
    where
        L: FnMut(&[Value], &[Value], &Scope) -> EvalResult<()> + 'static,
    {
        if watch_fns.is_empty() {
            let destroyed = Rc::new(Cell::new(false));
            let flag = Rc::clone(&destroyed);
            let mut listener_fn = listener_fn;
            self.eval_async(move |scope| {
                if flag.get() {
                    return Ok(());
                }
                listener_fn(&[], &[], scope)
            });
            return GroupHandle {
                watches: Vec::new(),
                destroyed: Some(destroyed),
            };
        }

        let len = watch_fns.len();
        let state = Rc::new(GroupState {
            new_values: RefCell::new(vec![Value::Undefined; len]),
            old_values: RefCell::new(vec![Value::Undefined; len]),
            listener: RefCell::new(Box::new(listener_fn)),
            first_run: Cell::new(true),
            scheduled: Cell::new(false),
        });

        let watches = watch_fns
            .into_iter()
            .enumerate()
            .map(|(index, mut watch_fn)| {
                let state = Rc::clone(&state);
                self.watch(
                    move |scope: &Scope| watch_fn(scope),
                    move |new_value: &Value, old_value: &Value, scope: &Scope| {
                        state.new_values.borrow_mut()[index] = new_value.clone();
                        state.old_values.borrow_mut()[index] = old_value.clone();
                        if !state.scheduled.get() {
                            state.scheduled.set(true);
                            let state = Rc::clone(&state);
                            scope.eval_async(move |scope| notify(&state, scope));
                        }
                        Ok(())
                    },
                )
            })
            .collect();

        GroupHandle {
            watches,
            destroyed: None,
        }
    }
}

fn notify(state: &GroupState, scope: &Scope) -> EvalResult<()> {
    let first_run = state.first_run.replace(false);
    state.scheduled.set(false);

    let new_values = state.new_values.borrow();
    let mut listener = state.listener.borrow_mut();
    if first_run {
        listener(new_values.as_slice(), new_values.as_slice(), scope)
    } else {
        let old_values = state.old_values.borrow();
        listener(new_values.as_slice(), old_values.as_slice(), scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(key: &'static str) -> WatchExpr {
        Box::new(move |scope: &Scope| Ok(scope.get(key)))
    }

    #[test]
    fn fires_once_with_all_values() {
        let scope = Scope::new();
        scope.set("a", 1);
        scope.set("b", 2);

        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&calls);
        scope.watch_group(vec![expr("a"), expr("b")], move |new, _old, _s| {
            seen.borrow_mut().push(new.to_vec());
            Ok(())
        });

        scope.digest().unwrap();
        assert_eq!(*calls.borrow(), vec![vec![Value::from(1), Value::from(2)]]);
    }

    #[test]
    fn first_run_passes_the_same_slice_twice() {
        let scope = Scope::new();
        scope.set("a", 1);

        let runs = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&runs);
        scope.watch_group(vec![expr("a")], move |new, old, _s| {
            seen.borrow_mut().push(std::ptr::eq(new, old));
            Ok(())
        });

        scope.digest().unwrap();
        scope.set("a", 2);
        scope.digest().unwrap();

        assert_eq!(*runs.borrow(), vec![true, false]);
    }

    #[test]
    fn simultaneous_member_changes_coalesce_into_one_call() {
        let scope = Scope::new();
        scope.set("a", 1);
        scope.set("b", 2);

        let calls = Rc::new(Cell::new(0));
        let count = Rc::clone(&calls);
        scope.watch_group(vec![expr("a"), expr("b")], move |_new, _old, _s| {
            count.set(count.get() + 1);
            Ok(())
        });

        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);

        scope.set("a", 10);
        scope.set("b", 20);
        scope.digest().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn reports_old_values_after_the_first_run() {
        let scope = Scope::new();
        scope.set("a", 1);
        scope.set("b", 2);

        let captured = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&captured);
        scope.watch_group(vec![expr("a"), expr("b")], move |new, old, _s| {
            seen.borrow_mut().push((new.to_vec(), old.to_vec()));
            Ok(())
        });

        scope.digest().unwrap();
        scope.set("b", 3);
        scope.digest().unwrap();

        let calls = captured.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, vec![Value::from(1), Value::from(3)]);
        assert_eq!(calls[1].1, vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn empty_group_fires_exactly_once_with_empty_slices() {
        let scope = Scope::new();

        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&calls);
        scope.watch_group(Vec::new(), move |new, old, _s| {
            seen.borrow_mut().push((new.len(), old.len()));
            Ok(())
        });

        scope.digest().unwrap();
        scope.digest().unwrap();
        assert_eq!(*calls.borrow(), vec![(0, 0)]);
    }

    #[test]
    fn disposed_empty_group_never_fires() {
        let scope = Scope::new();

        let calls = Rc::new(Cell::new(0));
        let count = Rc::clone(&calls);
        let handle = scope.watch_group(Vec::new(), move |_new, _old, _s| {
            count.set(count.get() + 1);
            Ok(())
        });

        handle.dispose();
        scope.digest().unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn dispose_stops_member_watches() {
        let scope = Scope::new();
        scope.set("a", 1);

        let calls = Rc::new(Cell::new(0));
        let count = Rc::clone(&calls);
        let handle = scope.watch_group(vec![expr("a")], move |_new, _old, _s| {
            count.set(count.get() + 1);
            Ok(())
        });

        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);

        handle.dispose();
        handle.dispose();
        scope.set("a", 2);
        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);
    }
}
