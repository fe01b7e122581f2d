//! Phases of a blue/green deployment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a deployment.
///
/// ```text
/// Initializing -> CanaryShifting -> Baking -> Finalizing -> Completed
///      |               |              |
///      |               +------+-------+
///      |                      v
///      |                 RollingBack ------> RolledBack
///      +-----------------------------------> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    /// Starting the target revision on the inactive slot at weight 0.
    Initializing,
    /// Applying the canary schedule.
    CanaryShifting,
    /// Holding the canary weight until the bake deadline.
    Baking,
    /// Moving all traffic and swapping the active color.
    Finalizing,
    /// Returning all traffic to the original slot.
    RollingBack,
    /// The new revision serves all traffic.
    Completed,
    /// The original revision serves all traffic.
    RolledBack,
}

impl DeploymentPhase {
    /// Returns true for `Completed` and `RolledBack`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack)
    }

    /// Returns true if the phase may move to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::CanaryShifting)
                | (Self::Initializing, Self::RolledBack)
                | (Self::CanaryShifting, Self::Baking)
                | (Self::CanaryShifting, Self::RollingBack)
                | (Self::Baking, Self::Finalizing)
                | (Self::Baking, Self::RollingBack)
                | (Self::Finalizing, Self::Completed)
                | (Self::RollingBack, Self::RolledBack)
        )
    }

    /// Returns true while a cancel request turns into a rollback right away.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::CanaryShifting | Self::Baking)
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::CanaryShifting => "canary_shifting",
            Self::Baking => "baking",
            Self::Finalizing => "finalizing",
            Self::RollingBack => "rolling_back",
            Self::Completed => "completed",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use DeploymentPhase::*;
        let path = [Initializing, CanaryShifting, Baking, Finalizing, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rollback_reachability() {
        use DeploymentPhase::*;
        assert!(CanaryShifting.can_transition_to(RollingBack));
        assert!(Baking.can_transition_to(RollingBack));
        assert!(Initializing.can_transition_to(RolledBack));
        assert!(!Initializing.can_transition_to(RollingBack));
        assert!(!Finalizing.can_transition_to(RollingBack));
    }

    #[test]
    fn test_terminal_phases_are_final() {
        use DeploymentPhase::*;
        let all = [
            Initializing,
            CanaryShifting,
            Baking,
            Finalizing,
            RollingBack,
            Completed,
            RolledBack,
        ];
        for terminal in [Completed, RolledBack] {
            assert!(terminal.is_terminal());
            assert!(all.iter().all(|next| !terminal.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_only_shifting_and_baking_cancel_immediately() {
        use DeploymentPhase::*;
        assert!(CanaryShifting.is_cancellable());
        assert!(Baking.is_cancellable());
        for phase in [Initializing, Finalizing, RollingBack, Completed, RolledBack] {
            assert!(!phase.is_cancellable(), "{phase}");
        }
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&DeploymentPhase::CanaryShifting).unwrap();
        assert_eq!(json, format!("\"{}\"", DeploymentPhase::CanaryShifting));
    }
}
