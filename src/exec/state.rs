//! Cooperative lifecycle state machine
//!
//! Operators and workers share the same four-state machine. Every
//! transition is serialised under the owning object's state lock; an
//! illegal transition is logged at warn and leaves the state unchanged.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an operator or worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Created but never started (or reset back to the initial state)
    None,
    Running,
    Paused,
    Stopped,
}

impl ExecutionState {
    /// Whether the lifecycle admits this transition
    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        use ExecutionState::{None, Paused, Running, Stopped};
        matches!(
            (self, target),
            (None, Running)
                | (None, Paused)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Paused, None)
                | (Stopped, None)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::None => "None",
            ExecutionState::Running => "Running",
            ExecutionState::Paused => "Paused",
            ExecutionState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_from_initial() {
        assert!(ExecutionState::None.can_transition_to(ExecutionState::Running));
        assert!(ExecutionState::None.can_transition_to(ExecutionState::Paused));
    }

    #[test]
    fn test_pause_resume_cycle() {
        assert!(ExecutionState::Running.can_transition_to(ExecutionState::Paused));
        assert!(ExecutionState::Paused.can_transition_to(ExecutionState::Running));
    }

    #[test]
    fn test_stop_from_active_states() {
        assert!(ExecutionState::Running.can_transition_to(ExecutionState::Stopped));
        assert!(ExecutionState::Paused.can_transition_to(ExecutionState::Stopped));
        assert!(!ExecutionState::None.can_transition_to(ExecutionState::Stopped));
    }

    #[test]
    fn test_reset_requires_quiescence() {
        assert!(ExecutionState::Stopped.can_transition_to(ExecutionState::None));
        assert!(ExecutionState::Paused.can_transition_to(ExecutionState::None));
        assert!(!ExecutionState::Running.can_transition_to(ExecutionState::None));
    }

    #[test]
    fn test_self_transitions_rejected() {
        for state in [
            ExecutionState::None,
            ExecutionState::Running,
            ExecutionState::Paused,
            ExecutionState::Stopped,
        ] {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_stopped_cannot_resume_directly() {
        assert!(!ExecutionState::Stopped.can_transition_to(ExecutionState::Running));
        assert!(!ExecutionState::Stopped.can_transition_to(ExecutionState::Paused));
    }

    #[test]
    fn test_display() {
        assert_eq!(ExecutionState::Running.to_string(), "Running");
        assert_eq!(ExecutionState::None.as_str(), "None");
    }
}
