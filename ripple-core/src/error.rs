//! Error taxonomy for the scope engine.
//!
//! Two failure channels exist and they never mix:
//!
//! - [`EvalError`] is the recoverable, per-task channel. A watch function,
//!   a listener, or a queued async task that cannot complete returns one.
//!   The engine catches it at the invocation site, reports it through
//!   `tracing`, and moves on to the next watcher or task, so one faulty
//!   binding cannot prevent unrelated bindings from updating.
//!
//! - [`ScopeError`] is the synchronous channel for the failures a caller
//!   must handle: starting a digest or apply while one is already running
//!   on the same tree, and a digest that never stabilizes within its
//!   iteration budget.

use thiserror::Error;

use crate::digest::Phase;

/// Result type for user-supplied watch functions, listeners and async tasks.
pub type EvalResult<T> = Result<T, EvalError>;

/// A recoverable failure raised by user code running under the engine.
///
/// The engine treats the payload as opaque: it is logged and dropped,
/// never inspected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    message: String,
}

impl EvalError {
    /// Wrap any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self {
            message: cause.to_string(),
        }
    }
}

impl From<&str> for EvalError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for EvalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Fatal failures of the digest/apply entry points.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// A digest or apply was started while the named phase was already
    /// running on the same tree. The outer phase stays active.
    #[error("{0} already in progress")]
    PhaseInProgress(Phase),

    /// The stabilization loop was still observing changes when the
    /// iteration budget ran out. Signals a circular watcher dependency.
    #[error("infinite digestion: 10 digest iterations reached")]
    InfiniteDigestion,

    /// A user task failed inside `apply`. Surfaced to the caller after the
    /// trailing digest has run.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_error_names_the_active_phase() {
        let error = ScopeError::PhaseInProgress(Phase::Digest);
        assert_eq!(error.to_string(), "$digest already in progress");

        let error = ScopeError::PhaseInProgress(Phase::Apply);
        assert_eq!(error.to_string(), "$apply already in progress");
    }

    #[test]
    fn eval_error_carries_its_message() {
        let error = EvalError::from("lookup failed");
        assert_eq!(error.to_string(), "lookup failed");

        let wrapped = ScopeError::from(error);
        assert_eq!(wrapped.to_string(), "lookup failed");
    }
}
