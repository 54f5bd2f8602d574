// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Lifecycle State Machine
//!
//! Pure transition table for agent lifecycle states. The lifecycle manager
//! calls [`validate_transition`] before applying any side effect; nothing
//! else in the system changes an agent's state.
//!
//! | From    | To                       |
//! |---------|--------------------------|
//! | Created | Running, Stopped         |
//! | Running | Paused, Stopped, Failed  |
//! | Paused  | Running, Stopped         |
//! | Stopped | Running                  |
//! | Failed  | Running, Stopped         |
//!
//! There is no terminal state: both Stopped and Failed admit a path back to
//! Running. Records are removed only from Stopped, by the manager's delete
//! operation.

use crate::domain::agent::AgentState;
use thiserror::Error;

/// Requested state change is not in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid state transition from {from} to {to}")]
pub struct StateTransitionError {
    pub from: AgentState,
    pub to: AgentState,
}

/// States reachable from `from` in a single transition.
pub fn valid_transitions(from: AgentState) -> &'static [AgentState] {
    match from {
        AgentState::Created => &[AgentState::Running, AgentState::Stopped],
        AgentState::Running => &[AgentState::Paused, AgentState::Stopped, AgentState::Failed],
        AgentState::Paused => &[AgentState::Running, AgentState::Stopped],
        AgentState::Stopped => &[AgentState::Running],
        AgentState::Failed => &[AgentState::Running, AgentState::Stopped],
    }
}

/// Check a requested transition against the table.
pub fn validate_transition(from: AgentState, to: AgentState) -> Result<(), StateTransitionError> {
    if valid_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateTransitionError { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AgentState; 5] = [
        AgentState::Created,
        AgentState::Running,
        AgentState::Paused,
        AgentState::Stopped,
        AgentState::Failed,
    ];

    #[test]
    fn test_full_transition_table() {
        for from in ALL {
            for to in ALL {
                let expected = valid_transitions(from).contains(&to);
                let result = validate_transition(from, to);
                assert_eq!(
                    result.is_ok(),
                    expected,
                    "transition {from} -> {to} disagreed with the table"
                );
                if let Err(e) = result {
                    assert_eq!(e.from, from);
                    assert_eq!(e.to, to);
                }
            }
        }
    }

    #[test]
    fn test_self_transitions_are_invalid() {
        for state in ALL {
            assert!(validate_transition(state, state).is_err());
        }
    }

    #[test]
    fn test_stopped_only_restarts() {
        assert!(validate_transition(AgentState::Stopped, AgentState::Running).is_ok());
        assert!(validate_transition(AgentState::Stopped, AgentState::Paused).is_err());
        assert!(validate_transition(AgentState::Stopped, AgentState::Failed).is_err());
    }

    #[test]
    fn test_error_carries_endpoints() {
        let err = validate_transition(AgentState::Created, AgentState::Paused).unwrap_err();
        assert_eq!(err.from, AgentState::Created);
        assert_eq!(err.to, AgentState::Paused);
        assert_eq!(
            err.to_string(),
            "invalid state transition from created to paused"
        );
    }
}
