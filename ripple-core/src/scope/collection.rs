//! Collection Watches
//!
//! `watch_collection` detects shallow, one-level changes: elements of an
//! array (or array-like object) replaced, added or removed; top-level
//! keys of an object added, changed or removed; and, for everything
//! else, scalar change with NaN stability. Nested mutation two levels
//! down is invisible. That is the point: it is far cheaper than a deep
//! watch.
//!
//! # Mechanism
//!
//! The tracker keeps a one-level mirror of the last observed collection
//! and a monotonically increasing change counter. The inner watch
//! function diffs against the mirror, bumps the counter per difference,
//! and returns the counter; the ordinary identity watch on that number
//! is what triggers the listener.
//!
//! The previous-collection snapshot handed to the listener is maintained
//! only by [`Scope::watch_collection_with_old`]; the plain variant skips
//! the per-round clone entirely.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::EvalResult;
use crate::scope::node::Scope;
use crate::scope::value::Value;
use crate::scope::watcher::WatchHandle;

/// One-level mirror of the last observed value.
enum Mirror {
    Scalar(Value),
    Items(Vec<Value>),
    Entries(IndexMap<String, Value>),
}

struct Tracker {
    mirror: Mirror,
    change_count: u64,
    /// Latest watched value, handed to the listener wrapper.
    current: Value,
}

impl Tracker {
    fn new() -> Self {
        Self {
            // The mirror starts as an undefined scalar, so the first
            // observation of a collection registers as a change.
            mirror: Mirror::Scalar(Value::Undefined),
            change_count: 0,
            current: Value::Undefined,
        }
    }

    /// Diff `value` against the mirror, bumping the counter once per
    /// observed top-level difference, and absorb it into the mirror.
    fn observe(&mut self, value: Value) {
        if let Some(items) = value.array_like_items() {
            self.observe_items(items);
        } else if let Value::Object(entries) = &value {
            let entries = entries.borrow();
            self.observe_entries(&entries);
        } else {
            self.observe_scalar(&value);
        }
        self.current = value;
    }

    fn observe_items(&mut self, items: Vec<Value>) {
        if !matches!(self.mirror, Mirror::Items(_)) {
            self.change_count += 1;
            self.mirror = Mirror::Items(Vec::new());
        }
        let Mirror::Items(mirror) = &mut self.mirror else {
            unreachable!()
        };

        if mirror.len() != items.len() {
            self.change_count += 1;
            mirror.resize(items.len(), Value::Undefined);
        }
        for (index, item) in items.into_iter().enumerate() {
            // `identical` keeps a NaN element from counting as an
            // endless change.
            if !item.identical(&mirror[index]) {
                self.change_count += 1;
                mirror[index] = item;
            }
        }
    }

    fn observe_entries(&mut self, entries: &IndexMap<String, Value>) {
        if !matches!(self.mirror, Mirror::Entries(_)) {
            self.change_count += 1;
            self.mirror = Mirror::Entries(IndexMap::new());
        }
        let Mirror::Entries(mirror) = &mut self.mirror else {
            unreachable!()
        };

        for (key, item) in entries.iter() {
            match mirror.get(key) {
                Some(old) => {
                    if !item.identical(old) {
                        self.change_count += 1;
                        mirror.insert(key.clone(), item.clone());
                    }
                }
                None => {
                    self.change_count += 1;
                    mirror.insert(key.clone(), item.clone());
                }
            }
        }

        if mirror.len() > entries.len() {
            let removed: Vec<String> = mirror
                .keys()
                .filter(|key| !entries.contains_key(*key))
                .cloned()
                .collect();
            for key in removed {
                self.change_count += 1;
                mirror.shift_remove(&key);
            }
        }
    }

    fn observe_scalar(&mut self, value: &Value) {
        let changed = match &self.mirror {
            Mirror::Scalar(old) => !value.identical(old),
            _ => true,
        };
        if changed {
            self.change_count += 1;
        }
        self.mirror = Mirror::Scalar(value.clone());
    }
}

impl Scope {
    /// Watch a collection for shallow, one-level changes. The listener
    /// receives the current collection; no previous snapshot is kept.
    pub fn watch_collection<W, L>(&self, watch_fn: W, listener_fn: L) -> WatchHandle
    where
        W: FnMut(&Scope) -> EvalResult<Value> + 'static,
        L: FnMut(&Value, &Scope) -> EvalResult<()> + 'static,
    {
        let tracker = Rc::new(RefCell::new(Tracker::new()));
        let watch = collection_watch(Rc::clone(&tracker), watch_fn);

        let mut listener_fn = listener_fn;
        self.watch(watch, move |_new: &Value, _old: &Value, scope: &Scope| {
            let current = tracker.borrow().current.clone();
            listener_fn(&current, scope)
        })
    }

    /// Like [`watch_collection`](Scope::watch_collection), additionally
    /// maintaining a shallow snapshot of the previous collection and
    /// passing it as the listener's old value (`Undefined` on the first
    /// call).
    pub fn watch_collection_with_old<W, L>(&self, watch_fn: W, listener_fn: L) -> WatchHandle
    where
        W: FnMut(&Scope) -> EvalResult<Value> + 'static,
        L: FnMut(&Value, &Value, &Scope) -> EvalResult<()> + 'static,
    {
        let tracker = Rc::new(RefCell::new(Tracker::new()));
        let watch = collection_watch(Rc::clone(&tracker), watch_fn);

        let mut listener_fn = listener_fn;
        let mut previous = Value::Undefined;
        self.watch(watch, move |_new: &Value, _old: &Value, scope: &Scope| {
            let current = tracker.borrow().current.clone();
            let result = listener_fn(&current, &previous, scope);
            if result.is_ok() {
                previous = current.shallow_clone();
            }
            result
        })
    }
}

/// The inner watch: evaluate the user expression, diff it into the
/// tracker, and surface the change counter to the ordinary watch
/// machinery.
fn collection_watch(
    tracker: Rc<RefCell<Tracker>>,
    mut watch_fn: impl FnMut(&Scope) -> EvalResult<Value> + 'static,
) -> impl FnMut(&Scope) -> EvalResult<Value> + 'static {
    move |scope: &Scope| {
        let value = watch_fn(scope)?;
        let mut tracker = tracker.borrow_mut();
        tracker.observe(value);
        Ok(Value::Number(tracker.change_count as f64))
    }
}
