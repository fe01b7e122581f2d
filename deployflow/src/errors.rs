//! Error types for the deployflow orchestrator.
//!
//! Errors fall into two groups. Provisioning, health and timeout problems
//! are recovered by the deployment controller itself and surface as a
//! [`RollbackReason`](crate::deployment::RollbackReason) on a terminal
//! record. Everything else in this module is returned as `Err` to the
//! caller: invariant violations are configuration or programming defects
//! and are never corrected silently.

use crate::core::{Color, StageId, StageStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployflowError {
    /// The new slot never became ready.
    #[error("{0}")]
    Provisioning(#[from] ProvisioningError),

    /// A traffic or ownership invariant would have been broken.
    #[error("{0}")]
    Invariant(#[from] InvariantViolation),

    /// The build collaborator rejected the source.
    #[error("{0}")]
    Build(#[from] BuildError),

    /// An upstream pipeline stage failed.
    #[error("{0}")]
    StageFailure(#[from] StageFailure),

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// No execution exists with the given id.
    #[error("Pipeline execution not found: {0}")]
    ExecutionNotFound(String),

    /// The execution already reached a terminal status.
    #[error("Pipeline execution {0} has already finished")]
    ExecutionFinished(String),

    /// No deployment record exists with the given id.
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(String),

    /// A persistence backend failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployflowError {
    /// Returns the taxonomy bucket of this error, if it has one.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Provisioning(_) => Some(ErrorKind::ProvisioningError),
            Self::Invariant(_) => Some(ErrorKind::InvariantViolation),
            Self::Build(_) => Some(ErrorKind::BuildError),
            Self::StageFailure(_) => Some(ErrorKind::StageFailure),
            _ => None,
        }
    }

    /// Returns true for errors that indicate a defect an operator must fix.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// The error taxonomy shared by errors and rollback reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// New slot never became ready.
    ProvisioningError,
    /// Bake-period evidence of failure.
    HealthCheckFailure,
    /// Bake deadline passed with unknown health under the strict policy.
    TimeoutExceeded,
    /// A weight or ownership invariant was violated.
    InvariantViolation,
    /// Build collaborator failure.
    BuildError,
    /// Generic upstream stage failure.
    StageFailure,
    /// Operator-requested abort.
    ManualCancel,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProvisioningError => write!(f, "ProvisioningError"),
            Self::HealthCheckFailure => write!(f, "HealthCheckFailure"),
            Self::TimeoutExceeded => write!(f, "TimeoutExceeded"),
            Self::InvariantViolation => write!(f, "InvariantViolation"),
            Self::BuildError => write!(f, "BuildError"),
            Self::StageFailure => write!(f, "StageFailure"),
            Self::ManualCancel => write!(f, "ManualCancel"),
        }
    }
}

/// Violations of the traffic and ownership rules of an environment pair and
/// of the pipeline's sequencing rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Weights that do not add up to 100.
    #[error("Invariant violation: weights blue={blue} green={green} do not sum to 100")]
    WeightSum {
        /// Requested blue weight.
        blue: u16,
        /// Requested green weight.
        green: u16,
    },

    /// The issuer does not hold the pair.
    #[error("Invariant violation: deployment '{issuer}' does not own pair '{pair}'")]
    NotOwner {
        /// Pair name.
        pair: String,
        /// Deployment that issued the action.
        issuer: String,
    },

    /// Another deployment already holds the pair.
    #[error("Invariant violation: pair '{pair}' is held by in-flight deployment '{holder}'")]
    PairBusy {
        /// Pair name.
        pair: String,
        /// Deployment or execution currently holding the pair.
        holder: String,
    },

    /// The action is only allowed on the inactive slot.
    #[error("Invariant violation: cannot {action} the active {color} slot of pair '{pair}'")]
    ActiveSlot {
        /// Pair name.
        pair: String,
        /// Active color.
        color: Color,
        /// The rejected action.
        action: String,
    },

    /// Swapping requires the inactive slot to already carry all traffic.
    #[error("Invariant violation: cannot swap pair '{pair}' while inactive slot has weight {weight}")]
    PrematureSwap {
        /// Pair name.
        pair: String,
        /// Weight on the inactive slot.
        weight: u8,
    },

    /// A weight change that moves against the current direction of travel.
    #[error("Invariant violation: new slot weight cannot move from {from} to {to} in phase {phase}")]
    NonMonotonicWeight {
        /// Weight before the change.
        from: u8,
        /// Requested weight.
        to: u8,
        /// Phase in which the change was attempted.
        phase: String,
    },

    /// A phase change the deployment state machine does not allow.
    #[error("Invariant violation: deployment '{deployment}' cannot move from {from} to {to}")]
    IllegalTransition {
        /// Deployment id.
        deployment: String,
        /// Current phase.
        from: String,
        /// Requested phase.
        to: String,
    },

    /// A stage status change outside `Pending -> Running -> {Succeeded | Failed}`.
    #[error("Invariant violation: stage {stage} cannot move from {from} to {to}")]
    IllegalStageTransition {
        /// Stage being changed.
        stage: StageId,
        /// Current status.
        from: StageStatus,
        /// Requested status.
        to: StageStatus,
    },

    /// A terminal deployment record or execution was about to be mutated.
    #[error("Invariant violation: record '{0}' is terminal and immutable")]
    TerminalRecord(String),

    /// A retry was requested for an execution that has not finished.
    #[error("Invariant violation: execution '{0}' is still in flight")]
    ExecutionInFlight(String),

    /// A stage was started before its inputs existed.
    #[error("Invariant violation: stage {stage} is missing input artifact '{artifact}'")]
    MissingInput {
        /// Stage that was about to start.
        stage: StageId,
        /// Missing artifact name.
        artifact: String,
    },

    /// A stage was started before its predecessor succeeded.
    #[error("Invariant violation: stage {stage} cannot start before {predecessor} succeeds")]
    PredecessorIncomplete {
        /// Stage that was about to start.
        stage: StageId,
        /// The predecessor stage.
        predecessor: StageId,
    },
}

/// Error raised when a slot cannot be brought to a ready state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Provisioning error on {color} slot: {message}")]
pub struct ProvisioningError {
    /// Slot being provisioned.
    pub color: Color,
    /// Human-readable cause.
    pub message: String,
}

impl ProvisioningError {
    /// Creates a new provisioning error.
    #[must_use]
    pub fn new(color: Color, message: impl Into<String>) -> Self {
        Self {
            color,
            message: message.into(),
        }
    }
}

/// Error reported by the build collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Build error: {message}")]
pub struct BuildError {
    /// Human-readable cause.
    pub message: String,
}

impl BuildError {
    /// Creates a new build error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error raised when a pipeline stage fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage {stage} failed: {message}")]
pub struct StageFailure {
    /// Stage that failed.
    pub stage: StageId,
    /// Taxonomy bucket for the failure.
    pub kind: ErrorKind,
    /// Original error message.
    pub message: String,
}

impl StageFailure {
    /// Creates a new generic stage failure.
    #[must_use]
    pub fn new(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: ErrorKind::StageFailure,
            message: message.into(),
        }
    }

    /// Sets the taxonomy bucket.
    #[must_use]
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl From<BuildError> for StageFailure {
    fn from(err: BuildError) -> Self {
        Self::new(StageId::Build, err.message).with_kind(ErrorKind::BuildError)
    }
}

/// Error raised when configuration is malformed or inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration for '{field}': {message}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_sum_message() {
        let err = InvariantViolation::WeightSum { blue: 60, green: 60 };
        assert!(err.to_string().contains("blue=60 green=60"));
    }

    #[test]
    fn test_error_kind_mapping() {
        let err: DeployflowError = InvariantViolation::TerminalRecord("d-1".to_string()).into();
        assert_eq!(err.kind(), Some(ErrorKind::InvariantViolation));
        assert!(err.is_invariant_violation());

        let err: DeployflowError = BuildError::new("docker exited 1").into();
        assert_eq!(err.kind(), Some(ErrorKind::BuildError));
        assert!(!err.is_invariant_violation());
    }

    #[test]
    fn test_build_error_into_stage_failure() {
        let failure: StageFailure = BuildError::new("no Dockerfile").into();
        assert_eq!(failure.stage, StageId::Build);
        assert_eq!(failure.kind, ErrorKind::BuildError);
        assert!(failure.to_string().contains("no Dockerfile"));
    }

    #[test]
    fn test_error_kind_serialize() {
        let json = serde_json::to_string(&ErrorKind::HealthCheckFailure).unwrap();
        assert_eq!(json, r#""health_check_failure""#);
        assert_eq!(ErrorKind::TimeoutExceeded.to_string(), "TimeoutExceeded");
    }
}
