//! Stage identifiers, status enums and slot colors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed stages of a release pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Fetches the source revision named by the trigger.
    Source,
    /// Turns the source into a deployable revision.
    Build,
    /// Rolls the revision out onto the environment pair.
    Deploy,
}

impl StageId {
    /// All stages in execution order.
    pub const ORDER: [Self; 3] = [Self::Source, Self::Build, Self::Deploy];

    /// Returns the stage that must succeed before this one may run.
    #[must_use]
    pub fn predecessor(self) -> Option<Self> {
        match self {
            Self::Source => None,
            Self::Build => Some(Self::Source),
            Self::Deploy => Some(Self::Build),
        }
    }

    /// Artifacts that must exist before the stage may start.
    #[must_use]
    pub fn declared_inputs(self) -> &'static [&'static str] {
        match self {
            Self::Source => &[],
            Self::Build => &[super::SOURCE_ARTIFACT],
            Self::Deploy => &[super::BUILD_ARTIFACT],
        }
    }

    /// Artifacts the stage must produce to count as succeeded.
    #[must_use]
    pub fn declared_outputs(self) -> &'static [&'static str] {
        match self {
            Self::Source => &[super::SOURCE_ARTIFACT],
            Self::Build => &[super::BUILD_ARTIFACT],
            Self::Deploy => &[],
        }
    }

    /// Returns the position of the stage in [`StageId::ORDER`].
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Source => 0,
            Self::Build => 1,
            Self::Deploy => 2,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Build => write!(f, "build"),
            Self::Deploy => write!(f, "deploy"),
        }
    }
}

/// The execution status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Succeeded,
    /// Stage failed.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    ///
    /// Only `Pending -> Running -> {Succeeded | Failed}` is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// The overall status of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, no stage started yet.
    #[default]
    Pending,
    /// At least one stage has started.
    Running,
    /// Every stage succeeded.
    Succeeded,
    /// A stage failed; later stages never ran.
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl ExecutionStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One of the two parallel environments of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// The blue environment.
    Blue,
    /// The green environment.
    Green,
}

impl Color {
    /// Returns the other color.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Blue => Self::Green,
            Self::Green => Self::Blue,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blue => write!(f, "blue"),
            Self::Green => write!(f, "green"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_predecessors() {
        assert_eq!(StageId::Source.predecessor(), None);
        assert_eq!(StageId::Build.predecessor(), Some(StageId::Source));
        assert_eq!(StageId::Deploy.predecessor(), Some(StageId::Build));

        for (i, stage) in StageId::ORDER.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }

    #[test]
    fn test_declared_artifacts_chain() {
        assert!(StageId::Source.declared_inputs().is_empty());
        assert_eq!(StageId::Build.declared_inputs(), StageId::Source.declared_outputs());
        assert_eq!(StageId::Deploy.declared_inputs(), StageId::Build.declared_outputs());
        assert!(StageId::Deploy.declared_outputs().is_empty());
    }

    #[test]
    fn test_stage_status_transitions() {
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Succeeded));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Failed));
        assert!(!StageStatus::Pending.can_transition_to(StageStatus::Succeeded));
        assert!(!StageStatus::Succeeded.can_transition_to(StageStatus::Running));
        assert!(!StageStatus::Failed.can_transition_to(StageStatus::Pending));
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(StageStatus::Succeeded.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_color_other() {
        assert_eq!(Color::Blue.other(), Color::Green);
        assert_eq!(Color::Green.other(), Color::Blue);
        assert_eq!(Color::Green.to_string(), "green");
    }

    #[test]
    fn test_stage_id_serialize() {
        let json = serde_json::to_string(&StageId::Deploy).unwrap();
        assert_eq!(json, r#""deploy""#);
        let back: StageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageId::Deploy);
    }
}
