//! Lifecycle state shared by the orchestrator, servers and listeners.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Startup progress. States only move forward, one step at a time, or
/// drop to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Declared,
    Bootstrapped,
    Instantiated,
    Opened,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move from {from} to {to}")]
pub struct StateError {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

impl LifecycleState {
    pub fn next(self) -> Option<Self> {
        match self {
            LifecycleState::Declared => Some(LifecycleState::Bootstrapped),
            LifecycleState::Bootstrapped => Some(LifecycleState::Instantiated),
            LifecycleState::Instantiated => Some(LifecycleState::Opened),
            LifecycleState::Opened | LifecycleState::Failed => None,
        }
    }

    /// Move to `to` if it is the next state or `Failed`.
    pub fn advance(&mut self, to: LifecycleState) -> Result<(), StateError> {
        let allowed = self.next() == Some(to) || (to == LifecycleState::Failed && *self != LifecycleState::Failed);
        if !allowed {
            return Err(StateError { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    /// Drop to `Failed`. Idempotent.
    pub fn fail(&mut self) {
        *self = LifecycleState::Failed;
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Declared => "declared",
            LifecycleState::Bootstrapped => "bootstrapped",
            LifecycleState::Instantiated => "instantiated",
            LifecycleState::Opened => "opened",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        let mut state = LifecycleState::Declared;
        state.advance(LifecycleState::Bootstrapped).unwrap();
        state.advance(LifecycleState::Instantiated).unwrap();
        state.advance(LifecycleState::Opened).unwrap();
        assert!(state.advance(LifecycleState::Opened).is_err());
    }

    #[test]
    fn test_no_skipping() {
        let mut state = LifecycleState::Declared;
        let err = state.advance(LifecycleState::Opened).unwrap_err();
        assert_eq!(err.to_string(), "cannot move from declared to opened");
        assert_eq!(state, LifecycleState::Declared);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut state = LifecycleState::Bootstrapped;
        state.advance(LifecycleState::Failed).unwrap();
        assert!(state.advance(LifecycleState::Instantiated).is_err());
        assert!(state.advance(LifecycleState::Failed).is_err());
    }
}
