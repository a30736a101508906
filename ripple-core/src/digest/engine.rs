//! The Stabilization Algorithm
//!
//! A digest repeatedly re-evaluates every watcher reachable from its root
//! until a full pass observes no change, then stops. Watchers are
//! user-supplied and possibly interdependent, so each round may invalidate
//! values an earlier watcher already reported; the loop keeps going until
//! the tree is stable or a fixed iteration budget is spent, at which point
//! it fails loudly rather than spin forever.
//!
//! # One Round
//!
//! 1. Flush the eval-async queue (tasks queued at flush entry only).
//! 2. Run one full pre-order pass over the scope tree, evaluating every
//!    watcher in registration order.
//! 3. A round is unstable if any watcher fired or the eval-async queue is
//!    non-empty again.
//!
//! # The Short Circuit
//!
//! The root remembers the last watcher observed dirty. When a later pass
//! reaches that watcher and finds it clean, a full revolution has happened
//! without any change: everything else is already stable and the entire
//! remaining traversal is abandoned. This is a pure optimization, but the
//! call counts it produces are part of the observable contract.
//!
//! # Exception Isolation
//!
//! A failing watch function, listener, or queued task is reported through
//! `tracing` and skipped; the pass continues. Only the re-entrancy and
//! non-convergence failures surface to the caller.

use std::rc::Rc;

use crate::digest::{Phase, RootCtx};
use crate::error::ScopeError;
use crate::scope::node::Scope;
use crate::scope::value::{are_equal, copy_value, Value};
use crate::scope::watcher::{Last, Watcher};

/// Rounds a digest may spend before giving up. Generous enough for any
/// legitimate propagation chain; fixed, not configurable.
pub(crate) const DIGEST_ITERATION_CAP: u32 = 10;

/// Run a full digest from `root` to a fixed point or failure.
pub(crate) fn run_digest(root: &Scope) -> Result<(), ScopeError> {
    let ctx = root.ctx();
    let _phase = ctx.phase.begin(Phase::Digest)?;
    ctx.last_dirty.set(None);

    // A pending coalesced apply is absorbed into this digest instead of
    // firing separately later.
    cancel_and_flush_apply_async(&ctx);

    let mut iterations = DIGEST_ITERATION_CAP;
    loop {
        flush_eval_async(&ctx);
        let dirty = digest_once(root, &ctx) || !ctx.eval_queue.is_empty();
        if !dirty {
            break;
        }
        if iterations == 0 {
            // The phase token unwinds on the way out.
            return Err(ScopeError::InfiniteDigestion);
        }
        iterations -= 1;
    }

    Ok(())
}

/// Drain the eval-async tasks queued at entry, FIFO, each isolated.
/// Tasks scheduled while draining wait for the next round.
fn flush_eval_async(ctx: &RootCtx) {
    let pending = ctx.eval_queue.len();
    for _ in 0..pending {
        let Some(task) = ctx.eval_queue.pop() else {
            break;
        };
        if let Err(error) = task.run() {
            tracing::error!(%error, "eval-async task failed");
        }
    }
}

/// If a deferred apply-async flush is pending, cancel its turn and run
/// the queued work now.
fn cancel_and_flush_apply_async(ctx: &RootCtx) {
    if let Some(timer) = ctx.apply_timer.get() {
        ctx.defer.cancel(timer);
        execute_apply_queue(ctx);
    }
}

/// Drain the apply-async queue, FIFO, each task isolated, then clear the
/// pending-flush marker.
pub(crate) fn execute_apply_queue(ctx: &RootCtx) {
    while let Some(task) = ctx.apply_queue.pop() {
        if let Err(error) = task.run() {
            tracing::error!(%error, "apply-async task failed");
        }
    }
    ctx.apply_timer.set(None);
}

/// One full pass over the tree reachable from `root`. Returns whether any
/// watcher fired.
fn digest_once(root: &Scope, ctx: &RootCtx) -> bool {
    let mut dirty = false;
    visit_scope(root, ctx, &mut dirty);
    dirty
}

/// Pre-order traversal: the scope's own watchers, then its children in
/// creation order. Returns false once the short circuit fires, stopping
/// every caller up the recursion.
fn visit_scope(scope: &Scope, ctx: &RootCtx, dirty: &mut bool) -> bool {
    let completed = scope
        .watchers()
        .for_each_active(|watcher| evaluate_watcher(scope, ctx, watcher, dirty));
    if !completed {
        return false;
    }
    // Snapshot: scopes created during the pass join the next round.
    for child in scope.children_snapshot() {
        if !visit_scope(&child, ctx, dirty) {
            return false;
        }
    }
    true
}

enum Observation {
    /// The value changed; carries the old value to hand the listener.
    Changed(Value),
    Clean,
}

/// Evaluate one watcher. Returns false to abandon the traversal.
fn evaluate_watcher(scope: &Scope, ctx: &RootCtx, watcher: &Rc<Watcher>, dirty: &mut bool) -> bool {
    let new_value = match watcher.run_watch(scope) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(%error, "watch function failed");
            return true;
        }
    };

    let observation = {
        let last = watcher.last.borrow();
        match &*last {
            // First evaluation: report the new value as the old value.
            Last::Uninit => Observation::Changed(new_value.clone()),
            Last::Seen(old_value) => {
                if are_equal(&new_value, old_value, watcher.deep) {
                    Observation::Clean
                } else {
                    Observation::Changed(old_value.clone())
                }
            }
        }
    };

    match observation {
        Observation::Changed(old_value) => {
            ctx.last_dirty.set(Some(watcher.id));
            *watcher.last.borrow_mut() = Last::Seen(copy_value(&new_value, watcher.deep));
            match watcher.run_listener(&new_value, &old_value, scope) {
                Ok(()) => *dirty = true,
                Err(error) => tracing::error!(%error, "watch listener failed"),
            }
            true
        }
        // Back at the last dirty watcher with nothing changed: the whole
        // tree is stable.
        Observation::Clean => ctx.last_dirty.get() != Some(watcher.id),
    }
}
