//! Scope Node & Tree
//!
//! A `Scope` is one addressable unit of observable state: a key/value bag
//! the consumer freely populates, a registry of watchers over that state,
//! and links into a traversal tree that the digest engine walks.
//!
//! # Handles
//!
//! `Scope` is a cheap-to-clone handle; clones share the same node. Child
//! links are strong and upward links are weak, so dropping every handle
//! to a root releases its whole tree.
//!
//! # Inheritance Without Prototypes
//!
//! A non-isolated child transparently sees ancestor-owned properties not
//! shadowed locally, while writes never touch the ancestor. There is no
//! language-level prototype chain to lean on, so the mechanism is
//! explicit: each scope has an own-property store plus a delegation
//! pointer, reads fall through the pointer chain, writes always land in
//! the own store.
//!
//! # Roots and Families
//!
//! Every scope belongs to exactly one digest root. Inheriting children
//! join their parent's root and share its phase slot, async queues and
//! deferred-turn queue through one `RootCtx`. An isolated child becomes
//! its own root with fresh context, yet stays linked into the parent's
//! children so an ancestor digest still traverses it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::digest::{self, Phase, QueuedTask, RootCtx};
use crate::error::{EvalResult, ScopeError};
use crate::scope::value::Value;
use crate::scope::watcher::{ListenerExpr, WatchExpr, WatchHandle, Watcher, WatcherList};

static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        Self(SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct ScopeInner {
    id: ScopeId,
    props: RefCell<IndexMap<String, Value>>,
    pub(crate) watchers: WatcherList,
    children: RefCell<SmallVec<[Scope; 4]>>,
    /// Hierarchy parent; empty for digest roots created via `new`.
    parent: Weak<ScopeInner>,
    /// Property-delegation source. `None` for roots and isolated scopes.
    /// Usually the hierarchy parent, but `child_in` splits the two.
    inherits: Option<Weak<ScopeInner>>,
    /// The scope's digest root (itself for roots).
    root: Weak<ScopeInner>,
    ctx: Rc<RootCtx>,
}

/// Clear the short-circuit marker of every digest root enclosing `inner`.
/// Walking the full parent chain covers the root of whichever digest may
/// currently be traversing this scope.
pub(crate) fn reset_dirty_markers(inner: &Rc<ScopeInner>) {
    let mut current = Rc::clone(inner);
    loop {
        current.ctx.last_dirty.set(None);
        match current.parent.upgrade() {
            Some(parent) => current = parent,
            None => break,
        }
    }
}

/// A node in the observable-state tree. Cloning shares the node.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create a fresh digest root.
    pub fn new() -> Self {
        Scope {
            inner: Rc::new_cyclic(|weak| ScopeInner {
                id: ScopeId::next(),
                props: RefCell::new(IndexMap::new()),
                watchers: WatcherList::new(),
                children: RefCell::new(SmallVec::new()),
                parent: Weak::new(),
                inherits: None,
                root: weak.clone(),
                ctx: Rc::new(RootCtx::new()),
            }),
        }
    }

    /// Create an inheriting child: property reads fall through to this
    /// scope, and the child joins this scope's digest root and queues.
    pub fn child(&self) -> Scope {
        self.child_in(self)
    }

    /// Create an inheriting child attached under `parent`: properties are
    /// inherited from `self`, but the child joins `parent`'s traversal
    /// tree, digest root and queues.
    pub fn child_in(&self, parent: &Scope) -> Scope {
        let child = Scope {
            inner: Rc::new(ScopeInner {
                id: ScopeId::next(),
                props: RefCell::new(IndexMap::new()),
                watchers: WatcherList::new(),
                children: RefCell::new(SmallVec::new()),
                parent: Rc::downgrade(&parent.inner),
                inherits: Some(Rc::downgrade(&self.inner)),
                root: parent.inner.root.clone(),
                ctx: Rc::clone(&parent.inner.ctx),
            }),
        };
        parent.inner.children.borrow_mut().push(child.clone());
        child
    }

    /// Create an isolated child: no property inheritance, its own digest
    /// root and queues, but still a node of this scope's traversal tree
    /// so an ancestor digest digests it too.
    pub fn isolated_child(&self) -> Scope {
        let child = Scope {
            inner: Rc::new_cyclic(|weak| ScopeInner {
                id: ScopeId::next(),
                props: RefCell::new(IndexMap::new()),
                watchers: WatcherList::new(),
                children: RefCell::new(SmallVec::new()),
                parent: Rc::downgrade(&self.inner),
                inherits: None,
                root: weak.clone(),
                ctx: Rc::new(RootCtx::new()),
            }),
        };
        self.inner.children.borrow_mut().push(child.clone());
        child
    }

    /// Unlink this scope from its parent and drop its watchers.
    /// Idempotent. Descendants become unreachable from ancestor digests
    /// but remain independently destroyable.
    pub fn destroy(&self) {
        if let Some(parent) = self.inner.parent.upgrade() {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(&child.inner, &self.inner));
        }
        self.inner.watchers.clear();
    }

    /// This scope's digest root (itself for roots).
    pub fn root(&self) -> Scope {
        match self.inner.root.upgrade() {
            Some(inner) => Scope { inner },
            None => self.clone(),
        }
    }

    /// The hierarchy parent, if any.
    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.upgrade().map(|inner| Scope { inner })
    }

    /// Whether two handles refer to the same scope node.
    pub fn ptr_eq(a: &Scope, b: &Scope) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// The currently active phase of this scope's digest root.
    pub fn phase(&self) -> Option<Phase> {
        self.inner.ctx.phase.current()
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Read a property, falling through the inheritance chain. Reading a
    /// key nobody owns yields `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        if let Some(value) = self.inner.props.borrow().get(key) {
            return value.clone();
        }
        let mut ancestor = self.inner.inherits.clone();
        while let Some(weak) = ancestor {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if let Some(value) = inner.props.borrow().get(key) {
                return value.clone();
            }
            ancestor = inner.inherits.clone();
        }
        Value::Undefined
    }

    /// Write a property into this scope's own store. Never touches an
    /// ancestor; a write shadows an inherited value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.props.borrow_mut().insert(key.into(), value.into());
    }

    /// Remove a property from this scope's own store.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.props.borrow_mut().shift_remove(key)
    }

    /// Whether the key resolves anywhere along the inheritance chain.
    pub fn contains(&self, key: &str) -> bool {
        if self.inner.props.borrow().contains_key(key) {
            return true;
        }
        let mut ancestor = self.inner.inherits.clone();
        while let Some(weak) = ancestor {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.props.borrow().contains_key(key) {
                return true;
            }
            ancestor = inner.inherits.clone();
        }
        false
    }

    // ------------------------------------------------------------------
    // Watch registration
    // ------------------------------------------------------------------

    /// Register a watcher with identity comparison: composites re-fire
    /// only when replaced, not when mutated in place.
    pub fn watch<W, L>(&self, watch_fn: W, listener_fn: L) -> WatchHandle
    where
        W: FnMut(&Scope) -> EvalResult<Value> + 'static,
        L: FnMut(&Value, &Value, &Scope) -> EvalResult<()> + 'static,
    {
        self.register_watch(false, Box::new(watch_fn), Box::new(listener_fn))
    }

    /// Register a watcher with structural comparison: the engine keeps a
    /// detached snapshot, so in-place mutation re-fires.
    pub fn watch_deep<W, L>(&self, watch_fn: W, listener_fn: L) -> WatchHandle
    where
        W: FnMut(&Scope) -> EvalResult<Value> + 'static,
        L: FnMut(&Value, &Value, &Scope) -> EvalResult<()> + 'static,
    {
        self.register_watch(true, Box::new(watch_fn), Box::new(listener_fn))
    }

    pub(crate) fn register_watch(
        &self,
        deep: bool,
        watch_fn: WatchExpr,
        listener_fn: ListenerExpr,
    ) -> WatchHandle {
        let watcher = Rc::new(Watcher::new(deep, watch_fn, listener_fn));
        let id = watcher.id;
        self.inner.watchers.add(watcher);
        // A fresh watcher must not be skipped by a stale short-circuit
        // marker in any digest that is (or will be) running over it.
        reset_dirty_markers(&self.inner);
        WatchHandle {
            scope: Rc::downgrade(&self.inner),
            id,
        }
    }

    // ------------------------------------------------------------------
    // Evaluation and digestion
    // ------------------------------------------------------------------

    /// Call `f` with this scope, synchronously, and return its result.
    /// No phase or digest involvement.
    pub fn eval<R>(&self, f: impl FnOnce(&Scope) -> R) -> R {
        f(self)
    }

    /// Queue `task` to run inside the current digest if one is running,
    /// or inside a digest deferred to the next turn otherwise.
    pub fn eval_async(&self, task: impl FnOnce(&Scope) -> EvalResult<()> + 'static) {
        let ctx = self.ctx();
        if ctx.phase.current().is_none() && ctx.eval_queue.is_empty() {
            // Nothing else is guaranteed to trigger a digest; arrange one
            // on a later turn in case the queue is still untouched then.
            let root = self.root();
            ctx.defer.schedule(Box::new(move || {
                if !root.ctx().eval_queue.is_empty() {
                    if let Err(error) = root.digest() {
                        tracing::error!(%error, "deferred digest failed");
                    }
                }
            }));
        }
        ctx.eval_queue.push(QueuedTask::new(self.clone(), Box::new(task)));
    }

    /// Run `f` under the apply phase, then digest from the root no matter
    /// how `f` fared. A digest failure wins over `f`'s failure.
    pub fn apply<R>(&self, f: impl FnOnce(&Scope) -> EvalResult<R>) -> Result<R, ScopeError> {
        let ctx = self.ctx();
        let result = {
            let _phase = ctx.phase.begin(Phase::Apply)?;
            self.eval(f)
        };
        self.digest()?;
        Ok(result?)
    }

    /// Queue `task` onto the apply-async batch. The first pending task
    /// schedules one deferred apply for the whole batch; everything
    /// queued before that turn fires is coalesced into a single digest.
    pub fn apply_async(&self, task: impl FnOnce(&Scope) -> EvalResult<()> + 'static) {
        let ctx = self.ctx();
        ctx.apply_queue.push(QueuedTask::new(self.clone(), Box::new(task)));
        if ctx.apply_timer.get().is_none() {
            let scope = self.clone();
            let timer = ctx.defer.schedule(Box::new(move || {
                let flushed = scope.apply(|s| {
                    digest::execute_apply_queue(&s.ctx());
                    Ok(())
                });
                if let Err(error) = flushed {
                    tracing::error!(%error, "apply-async flush failed");
                }
            }));
            ctx.apply_timer.set(Some(timer));
        }
    }

    /// Stabilize the tree from this scope's digest root.
    pub fn digest(&self) -> Result<(), ScopeError> {
        digest::run_digest(&self.root())
    }

    /// Run the deferred-turn tasks currently pending on this scope's
    /// digest root. This is the host's stand-in for the platform timer;
    /// returns how many tasks ran.
    pub fn run_deferred(&self) -> usize {
        self.ctx().defer.run_pending()
    }

    // ------------------------------------------------------------------
    // Engine access
    // ------------------------------------------------------------------

    pub(crate) fn ctx(&self) -> Rc<RootCtx> {
        Rc::clone(&self.inner.ctx)
    }

    pub(crate) fn watchers(&self) -> &WatcherList {
        &self.inner.watchers
    }

    pub(crate) fn children_snapshot(&self) -> SmallVec<[Scope; 4]> {
        self.inner.children.borrow().clone()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id.0)
            .field("props", &self.inner.props.borrow().len())
            .field("watchers", &self.inner.watchers.len())
            .field("children", &self.inner.children.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_read_through_to_the_parent() {
        let parent = Scope::new();
        parent.set("v", 1);

        let child = parent.child();
        assert_eq!(child.get("v"), Value::from(1));

        // Writes shadow, never mutate the ancestor.
        child.set("v", 2);
        assert_eq!(child.get("v"), Value::from(2));
        assert_eq!(parent.get("v"), Value::from(1));

        // A parent write shows through where no shadow exists.
        let other = parent.child();
        parent.set("v", 3);
        assert_eq!(other.get("v"), Value::from(3));
    }

    #[test]
    fn inheritance_spans_generations() {
        let root = Scope::new();
        root.set("name", "root");

        let grandchild = root.child().child();
        assert_eq!(grandchild.get("name").as_str(), Some("root"));
        assert!(grandchild.contains("name"));
        assert!(!grandchild.contains("other"));
    }

    #[test]
    fn isolated_children_inherit_nothing() {
        let parent = Scope::new();
        parent.set("v", 7);

        let isolate = parent.isolated_child();
        assert_eq!(isolate.get("v"), Value::Undefined);
        assert!(!isolate.contains("v"));

        // But an inheriting child of the isolate sees the isolate's own
        // properties.
        isolate.set("w", 1);
        assert_eq!(isolate.child().get("w"), Value::from(1));
    }

    #[test]
    fn child_in_splits_inheritance_from_hierarchy() {
        let root = Scope::new();
        let left = root.child();
        let right = root.child();
        left.set("v", "left");

        let child = left.child_in(&right);
        // Properties come from `left`...
        assert_eq!(child.get("v").as_str(), Some("left"));
        // ...while the hierarchy parent (and thus traversal) is `right`.
        assert!(Scope::ptr_eq(&child.parent().unwrap(), &right));
        assert!(Scope::ptr_eq(&child.root(), &root));
    }

    #[test]
    fn inheriting_family_shares_one_root() {
        let root = Scope::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(Scope::ptr_eq(&child.root(), &root));
        assert!(Scope::ptr_eq(&grandchild.root(), &root));

        // An isolated child roots its own family.
        let isolate = child.isolated_child();
        assert!(Scope::ptr_eq(&isolate.root(), &isolate));
        assert!(Scope::ptr_eq(&isolate.child().root(), &isolate));
    }

    #[test]
    fn destroy_unlinks_and_is_idempotent() {
        let parent = Scope::new();
        let child = parent.child();
        assert_eq!(parent.children_snapshot().len(), 1);

        child.destroy();
        assert_eq!(parent.children_snapshot().len(), 0);

        // Second destroy, and destroying a root, are no-ops.
        child.destroy();
        parent.destroy();
    }

    #[test]
    fn remove_only_touches_the_own_store() {
        let parent = Scope::new();
        parent.set("v", 1);
        let child = parent.child();
        child.set("v", 2);

        assert_eq!(child.remove("v"), Some(Value::from(2)));
        // The inherited value shows through again.
        assert_eq!(child.get("v"), Value::from(1));
        assert_eq!(child.remove("v"), None);
    }
}
