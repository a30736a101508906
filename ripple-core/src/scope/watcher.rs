//! Watch Bindings and the Per-Scope Registry
//!
//! A `Watcher` is one observation binding: a watch function that reads
//! scope state, a listener fired on change, a comparison mode, and the
//! previously observed value. Watchers live in their owning scope's
//! `WatcherList`.
//!
//! # Mutation During Traversal
//!
//! Listeners run arbitrary user code, and that code may add or remove
//! watchers on any scope, including the list currently being traversed.
//! The list therefore never splices while a traversal is in flight:
//! removal flips a tombstone flag, traversal skips tombstones, and the
//! physical sweep happens once the traversal unwinds. Additions push to
//! the back, where the in-flight traversal will still reach them.
//!
//! The resulting guarantees:
//!
//! - a watcher added during a pass is evaluated later in the same pass;
//! - removing a not-yet-visited watcher prevents its evaluation;
//! - removing an already-visited watcher is a no-op for the pass;
//! - unrelated watchers are neither skipped nor double-visited.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::error::EvalResult;
use crate::scope::node::{self, Scope, ScopeInner};
use crate::scope::value::Value;

static WATCH_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a watch binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WatchId(u64);

impl WatchId {
    pub(crate) fn next() -> Self {
        Self(WATCH_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Boxed watch function: reads scope state and returns the observed value.
pub type WatchExpr = Box<dyn FnMut(&Scope) -> EvalResult<Value>>;

/// Boxed listener: receives `(new, old, scope)` on every observed change.
pub type ListenerExpr = Box<dyn FnMut(&Value, &Value, &Scope) -> EvalResult<()>>;

/// The previously observed value of a watcher. `Uninit` is the reserved
/// never-observed sentinel, distinct from every user value including
/// `Undefined`; it drives the first-fire old-value convention.
pub(crate) enum Last {
    Uninit,
    Seen(Value),
}

/// One observation binding.
pub(crate) struct Watcher {
    pub(crate) id: WatchId,
    /// Structural comparison and detached snapshots when set; identity
    /// comparison and reference aliasing otherwise.
    pub(crate) deep: bool,
    watch: RefCell<WatchExpr>,
    listener: RefCell<ListenerExpr>,
    pub(crate) last: RefCell<Last>,
    active: Cell<bool>,
}

impl Watcher {
    pub(crate) fn new(deep: bool, watch: WatchExpr, listener: ListenerExpr) -> Self {
        Self {
            id: WatchId::next(),
            deep,
            watch: RefCell::new(watch),
            listener: RefCell::new(listener),
            last: RefCell::new(Last::Uninit),
            active: Cell::new(true),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    fn deactivate(&self) {
        self.active.set(false);
    }

    pub(crate) fn run_watch(&self, scope: &Scope) -> EvalResult<Value> {
        let mut watch = self.watch.borrow_mut();
        watch.as_mut()(scope)
    }

    pub(crate) fn run_listener(
        &self,
        new_value: &Value,
        old_value: &Value,
        scope: &Scope,
    ) -> EvalResult<()> {
        let mut listener = self.listener.borrow_mut();
        listener.as_mut()(new_value, old_value, scope)
    }
}

/// Insertion-ordered watcher list, safe under mutation during traversal.
pub(crate) struct WatcherList {
    entries: RefCell<SmallVec<[Rc<Watcher>; 4]>>,
    /// Depth of in-flight traversals; while non-zero, removal tombstones
    /// instead of splicing.
    traversals: Cell<u32>,
    tombstones: Cell<bool>,
}

impl WatcherList {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(SmallVec::new()),
            traversals: Cell::new(0),
            tombstones: Cell::new(false),
        }
    }

    pub(crate) fn add(&self, watcher: Rc<Watcher>) {
        self.entries.borrow_mut().push(watcher);
    }

    /// Remove the watcher with this id. Returns whether it was present and
    /// still active; removing twice, or after `clear`, is a no-op.
    pub(crate) fn remove(&self, id: WatchId) -> bool {
        let found = self
            .entries
            .borrow()
            .iter()
            .find(|watcher| watcher.id == id && watcher.is_active())
            .cloned();
        let Some(watcher) = found else {
            return false;
        };
        watcher.deactivate();
        if self.traversals.get() == 0 {
            self.entries.borrow_mut().retain(|w| w.is_active());
        } else {
            self.tombstones.set(true);
        }
        true
    }

    /// Deactivate and drop every watcher. Used on scope destruction.
    pub(crate) fn clear(&self) {
        for watcher in self.entries.borrow().iter() {
            watcher.deactivate();
        }
        if self.traversals.get() == 0 {
            self.entries.borrow_mut().clear();
        } else {
            self.tombstones.set(true);
        }
    }

    /// Number of active watchers.
    pub(crate) fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|w| w.is_active())
            .count()
    }

    /// Visit every active watcher in registration order. `visit` may add
    /// or remove watchers on this list while running; no borrow is held
    /// across the callback. Returns false if `visit` broke off early.
    pub(crate) fn for_each_active(&self, mut visit: impl FnMut(&Rc<Watcher>) -> bool) -> bool {
        self.traversals.set(self.traversals.get() + 1);
        let mut completed = true;
        let mut index = 0;
        loop {
            let next = self.entries.borrow().get(index).cloned();
            let Some(watcher) = next else {
                break;
            };
            index += 1;
            if !watcher.is_active() {
                continue;
            }
            if !visit(&watcher) {
                completed = false;
                break;
            }
        }
        self.traversals.set(self.traversals.get() - 1);
        if self.traversals.get() == 0 && self.tombstones.replace(false) {
            self.entries.borrow_mut().retain(|w| w.is_active());
        }
        completed
    }
}

/// Disposer for a registered watcher, returned by the `watch` family.
///
/// Dropping the handle does not remove the watcher; only [`dispose`]
/// does. Disposal is idempotent: calling it twice, or after the owning
/// scope was destroyed, is a no-op, never an error.
///
/// [`dispose`]: WatchHandle::dispose
#[derive(Clone)]
pub struct WatchHandle {
    pub(crate) scope: Weak<ScopeInner>,
    pub(crate) id: WatchId,
}

impl WatchHandle {
    /// Remove the watcher from its scope.
    pub fn dispose(&self) {
        let Some(inner) = self.scope.upgrade() else {
            return;
        };
        if inner.watchers.remove(self.id) {
            // A removal invalidates the short-circuit marker of every
            // enclosing digest root, same as a registration.
            node::reset_dirty_markers(&inner);
        }
    }
}
