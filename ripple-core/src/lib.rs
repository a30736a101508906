//! Ripple Core
//!
//! This crate provides the update-propagation core beneath the Ripple
//! template-binding system. It implements:
//!
//! - A hierarchical tree of observable state containers (scopes)
//! - Dirty-checking watchers with identity or structural comparison
//! - The digest stabilization algorithm with a bounded iteration budget
//! - Deferred, coalescing async evaluation (`eval_async` / `apply_async`)
//!
//! The engine discovers relationships by re-evaluation rather than an
//! explicit dependency graph: every digest pass re-runs every watcher
//! until a full pass observes no change. Watch and listener functions are
//! opaque callables: an expression compiler typically produces them, but
//! the engine never looks inside.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `scope`: the scope tree, dynamic values and watcher bookkeeping
//! - `digest`: the phase guard, async task queues, deferred-turn
//!   scheduler and the stabilization algorithm
//!
//! # Example
//!
//! ```ignore
//! use ripple_core::{Scope, Value};
//!
//! let scope = Scope::new();
//! scope.set("name", "world");
//!
//! scope.watch(
//!     |s| Ok(s.get("name")),
//!     |new, _old, _s| {
//!         println!("hello, {new:?}");
//!         Ok(())
//!     },
//! );
//!
//! // First digest fires every listener once; later digests only on
//! // change.
//! scope.digest()?;
//!
//! scope.set("name", "again");
//! scope.digest()?;
//! ```
//!
//! # Failure model
//!
//! A failing watch function, listener or async task is logged through
//! `tracing` and skipped, so one faulty binding never blocks the rest.
//! Re-entering `digest`/`apply` on a tree already in a phase, and a
//! digest that never stabilizes, are hard errors returned to the caller.

pub mod digest;
pub mod error;
pub mod scope;

pub use digest::Phase;
pub use error::{EvalError, EvalResult, ScopeError};
pub use scope::{GroupHandle, ListenerExpr, Scope, Value, WatchExpr, WatchHandle};
