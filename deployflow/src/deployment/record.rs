//! Deployment records: the persisted state of one deployment attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::DeploymentPhase;
use crate::config::CanaryStep;
use crate::core::{Color, Revision};
use crate::environment::TrafficSplit;
use crate::errors::{ErrorKind, InvariantViolation};
use crate::health::HealthSource;

/// Why a deployment was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RollbackReason {
    /// The new slot never became ready; no traffic was shifted.
    ProvisioningError {
        /// Cause reported by the provisioner or the startup timeout.
        message: String,
    },
    /// The health monitor reported the new slot unhealthy.
    HealthCheckFailure {
        /// Signal that fired.
        source: HealthSource,
        /// Detail from the monitor, if any.
        detail: Option<String>,
    },
    /// The bake ended with no health evidence under the strict policy.
    TimeoutExceeded {
        /// How long health had been unknown when the deadline passed.
        unknown_for_seconds: u64,
    },
    /// An operator cancelled the deployment.
    ManualCancel {
        /// Reason given with the cancel request.
        reason: String,
    },
}

impl RollbackReason {
    /// Returns the error taxonomy bucket of the reason.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProvisioningError { .. } => ErrorKind::ProvisioningError,
            Self::HealthCheckFailure { .. } => ErrorKind::HealthCheckFailure,
            Self::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            Self::ManualCancel { .. } => ErrorKind::ManualCancel,
        }
    }
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProvisioningError { message } => write!(f, "ProvisioningError: {message}"),
            Self::HealthCheckFailure { source, detail } => match detail {
                Some(detail) => write!(f, "HealthCheckFailure: {source} reported unhealthy ({detail})"),
                None => write!(f, "HealthCheckFailure: {source} reported unhealthy"),
            },
            Self::TimeoutExceeded { unknown_for_seconds } => write!(
                f,
                "TimeoutExceeded: bake deadline passed with health unknown for {unknown_for_seconds}s"
            ),
            Self::ManualCancel { reason } => write!(f, "ManualCancel: {reason}"),
        }
    }
}

/// One entry of a record's phase history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Phase left.
    pub from: DeploymentPhase,
    /// Phase entered.
    pub to: DeploymentPhase,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

/// The state of one deployment attempt against one pair.
///
/// The traffic split is a pure function of `(phase, steps_applied)`, which
/// is what lets a restarted controller resume without inspecting the data
/// plane. Once the phase is terminal the record is never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Deployment id.
    pub id: String,
    /// Pair the deployment targets.
    pub pair: String,
    /// Revision being rolled out.
    pub target_revision: Revision,
    /// Revision serving traffic when the deployment started.
    pub previous_revision: Option<Revision>,
    /// Slot that was active when the deployment started.
    pub from_color: Color,
    /// Slot receiving the target revision.
    pub to_color: Color,
    /// Current phase.
    pub phase: DeploymentPhase,
    /// Canary schedule in effect.
    pub traffic_schedule: Vec<CanaryStep>,
    /// Number of canary steps whose weight has been applied.
    pub steps_applied: usize,
    /// When the record was created.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the bake, set on entering `Baking`.
    pub bake_deadline: Option<DateTime<Utc>>,
    /// When a terminal phase was reached.
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the deployment rolls back.
    pub rollback_reason: Option<RollbackReason>,
    /// Reason of a cancel request received while the phase could not honor it.
    pub cancel_requested: Option<String>,
    /// Phase history.
    pub transitions: Vec<PhaseTransition>,
}

impl DeploymentRecord {
    /// Creates a record in `Initializing`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        pair: impl Into<String>,
        target_revision: Revision,
        previous_revision: Option<Revision>,
        from_color: Color,
        traffic_schedule: Vec<CanaryStep>,
    ) -> Self {
        Self {
            id: id.into(),
            pair: pair.into(),
            target_revision,
            previous_revision,
            from_color,
            to_color: from_color.other(),
            phase: DeploymentPhase::Initializing,
            traffic_schedule,
            steps_applied: 0,
            started_at: Utc::now(),
            bake_deadline: None,
            finished_at: None,
            rollback_reason: None,
            cancel_requested: None,
            transitions: Vec::new(),
        }
    }

    /// Returns true once the deployment reached a terminal phase.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Returns true if the deployment completed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.phase == DeploymentPhase::Completed
    }

    /// Weight of the current canary step, or 0 before the first one.
    #[must_use]
    pub fn canary_weight(&self) -> u8 {
        self.steps_applied
            .checked_sub(1)
            .and_then(|i| self.traffic_schedule.get(i))
            .map_or(0, |step| step.weight_percent)
    }

    /// Weight the new slot should carry in the current phase.
    #[must_use]
    pub fn new_slot_weight(&self) -> u8 {
        match self.phase {
            DeploymentPhase::Initializing
            | DeploymentPhase::RollingBack
            | DeploymentPhase::RolledBack => 0,
            DeploymentPhase::CanaryShifting | DeploymentPhase::Baking => self.canary_weight(),
            DeploymentPhase::Finalizing | DeploymentPhase::Completed => 100,
        }
    }

    /// Traffic split the pair should carry in the current phase.
    #[must_use]
    pub fn expected_split(&self) -> TrafficSplit {
        TrafficSplit::with_weight_on(self.to_color, self.new_slot_weight())
    }

    /// Moves to `next`, appending to the history.
    pub fn transition_to(&mut self, next: DeploymentPhase) -> Result<(), InvariantViolation> {
        if self.is_terminal() {
            return Err(InvariantViolation::TerminalRecord(self.id.clone()));
        }
        if !self.phase.can_transition_to(next) {
            return Err(InvariantViolation::IllegalTransition {
                deployment: self.id.clone(),
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to: next,
            at: now,
        });
        self.phase = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Records `reason` and leaves the normal path.
    ///
    /// From `Initializing` nothing was exposed, so the record goes straight
    /// to `RolledBack` (the caller still owes the slot cleanup); elsewhere it
    /// enters `RollingBack`.
    pub fn begin_rollback(&mut self, reason: RollbackReason) -> Result<(), InvariantViolation> {
        let next = if self.phase == DeploymentPhase::Initializing {
            DeploymentPhase::RolledBack
        } else {
            DeploymentPhase::RollingBack
        };
        if self.is_terminal() {
            return Err(InvariantViolation::TerminalRecord(self.id.clone()));
        }
        if self.rollback_reason.is_none() {
            self.rollback_reason = Some(reason);
        }
        self.transition_to(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskSpec;
    use std::time::Duration;

    fn record() -> DeploymentRecord {
        DeploymentRecord::new(
            "d-1",
            "nginx",
            Revision::new("nginx:2", TaskSpec::default()).unwrap(),
            Some(Revision::new("nginx:1", TaskSpec::default()).unwrap()),
            Color::Blue,
            vec![
                CanaryStep::new(10, Duration::from_secs(60)),
                CanaryStep::new(50, Duration::from_secs(60)),
            ],
        )
    }

    #[test]
    fn test_new_record_targets_other_color() {
        let record = record();
        assert_eq!(record.to_color, Color::Green);
        assert_eq!(record.phase, DeploymentPhase::Initializing);
        assert_eq!(record.expected_split(), TrafficSplit::all_to(Color::Blue));
    }

    #[test]
    fn test_expected_split_follows_phase_and_step() {
        let mut record = record();
        record.transition_to(DeploymentPhase::CanaryShifting).unwrap();
        assert_eq!(record.new_slot_weight(), 0);

        record.steps_applied = 1;
        assert_eq!(record.expected_split(), TrafficSplit::new(90, 10).unwrap());
        record.steps_applied = 2;
        assert_eq!(record.new_slot_weight(), 50);

        record.transition_to(DeploymentPhase::Baking).unwrap();
        assert_eq!(record.new_slot_weight(), 50);

        record.transition_to(DeploymentPhase::Finalizing).unwrap();
        assert_eq!(record.expected_split(), TrafficSplit::all_to(Color::Green));
    }

    #[test]
    fn test_rollback_split_returns_to_origin() {
        let mut record = record();
        record.transition_to(DeploymentPhase::CanaryShifting).unwrap();
        record.steps_applied = 1;
        record
            .begin_rollback(RollbackReason::ManualCancel {
                reason: "abort".to_string(),
            })
            .unwrap();
        assert_eq!(record.phase, DeploymentPhase::RollingBack);
        assert_eq!(record.expected_split(), TrafficSplit::all_to(Color::Blue));
    }

    #[test]
    fn test_rollback_from_initializing_is_terminal() {
        let mut record = record();
        record
            .begin_rollback(RollbackReason::ProvisioningError {
                message: "not ready".to_string(),
            })
            .unwrap();
        assert_eq!(record.phase, DeploymentPhase::RolledBack);
        assert!(record.finished_at.is_some());
        assert_eq!(record.rollback_reason.as_ref().unwrap().kind(), ErrorKind::ProvisioningError);
    }

    #[test]
    fn test_terminal_record_is_immutable() {
        let mut record = record();
        record
            .begin_rollback(RollbackReason::ProvisioningError {
                message: "not ready".to_string(),
            })
            .unwrap();
        assert_eq!(
            record.transition_to(DeploymentPhase::CanaryShifting).unwrap_err(),
            InvariantViolation::TerminalRecord("d-1".to_string())
        );
    }

    #[test]
    fn test_illegal_transition() {
        let mut record = record();
        let err = record.transition_to(DeploymentPhase::Finalizing).unwrap_err();
        assert!(matches!(err, InvariantViolation::IllegalTransition { .. }));
        assert!(record.transitions.is_empty());
    }

    #[test]
    fn test_reason_display_is_readable() {
        let reason = RollbackReason::HealthCheckFailure {
            source: HealthSource::HealthCheck,
            detail: Some("3/4 targets failing".to_string()),
        };
        assert_eq!(
            reason.to_string(),
            "HealthCheckFailure: health check reported unhealthy (3/4 targets failing)"
        );
    }

    #[test]
    fn test_record_serde_keeps_phase_and_steps() {
        let mut record = record();
        record.transition_to(DeploymentPhase::CanaryShifting).unwrap();
        record.steps_applied = 1;

        let json = serde_json::to_string(&record).unwrap();
        let back: DeploymentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase, DeploymentPhase::CanaryShifting);
        assert_eq!(back.expected_split(), record.expected_split());
    }
}
