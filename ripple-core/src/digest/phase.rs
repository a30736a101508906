//! Phase Guard
//!
//! A digest root is in at most one phase at a time: digesting, applying,
//! or neither. The guard is the engine's only mutual-exclusion primitive;
//! it rejects re-entrant `digest`/`apply` calls on the same tree, not
//! structural mutation (which the registry and traversal tolerate).
//!
//! Entering a phase yields an RAII token. The slot is cleared when the
//! token drops, so release is guaranteed on every exit path, including
//! the error returns of a failed digest.

use std::cell::Cell;
use std::fmt;

use crate::error::ScopeError;

/// The two mutually exclusive engine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Digest,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Digest => "$digest",
            Phase::Apply => "$apply",
        })
    }
}

/// Single-slot phase cell owned by a digest root.
#[derive(Debug)]
pub(crate) struct PhaseCell {
    current: Cell<Option<Phase>>,
}

impl PhaseCell {
    pub(crate) fn new() -> Self {
        Self {
            current: Cell::new(None),
        }
    }

    pub(crate) fn current(&self) -> Option<Phase> {
        self.current.get()
    }

    /// Enter `phase`. Fails if a phase is already active, naming the
    /// active one.
    pub(crate) fn begin(&self, phase: Phase) -> Result<PhaseToken<'_>, ScopeError> {
        if let Some(active) = self.current.get() {
            return Err(ScopeError::PhaseInProgress(active));
        }
        self.current.set(Some(phase));
        Ok(PhaseToken { cell: self })
    }
}

/// Token clearing the phase slot when dropped.
#[derive(Debug)]
pub(crate) struct PhaseToken<'a> {
    cell: &'a PhaseCell,
}

impl Drop for PhaseToken<'_> {
    fn drop(&mut self) {
        self.cell.current.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_sets_and_drop_clears() {
        let cell = PhaseCell::new();
        assert_eq!(cell.current(), None);

        {
            let _token = cell.begin(Phase::Digest).unwrap();
            assert_eq!(cell.current(), Some(Phase::Digest));
        }

        assert_eq!(cell.current(), None);
        let _token = cell.begin(Phase::Apply).unwrap();
        assert_eq!(cell.current(), Some(Phase::Apply));
    }

    #[test]
    fn reentry_fails_and_names_the_active_phase() {
        let cell = PhaseCell::new();
        let _token = cell.begin(Phase::Apply).unwrap();

        let error = cell.begin(Phase::Digest).unwrap_err();
        assert_eq!(error.to_string(), "$apply already in progress");
        // The outer phase is untouched by the failed attempt.
        assert_eq!(cell.current(), Some(Phase::Apply));
    }
}
