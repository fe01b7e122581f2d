//! Pipeline executions and their per-stage state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{Artifact, ExecutionStatus, Revision, StageId, StageStatus, BUILD_ARTIFACT};
use crate::errors::{ErrorKind, InvariantViolation, StageFailure};
use crate::utils::generate_id;

/// An event carrying the source revision to release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Commit or revision identifier.
    pub source_revision_id: String,
    /// Repository in `owner/name` form.
    pub repository: String,
    /// Branch the revision was pushed to.
    pub branch: String,
    /// When the trigger arrived.
    pub received_at: DateTime<Utc>,
}

impl Trigger {
    /// Creates a trigger received now.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        source_revision_id: impl Into<String>,
    ) -> Self {
        Self {
            source_revision_id: source_revision_id.into(),
            repository: repository.into(),
            branch: branch.into(),
            received_at: Utc::now(),
        }
    }
}

/// State of one stage within an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    /// The stage.
    pub stage_id: StageId,
    /// Current status.
    pub status: StageStatus,
    /// Names of the artifacts the stage consumed.
    #[serde(default)]
    pub input_artifacts: Vec<String>,
    /// Names of the artifacts the stage produced. Empty unless it succeeded.
    #[serde(default)]
    pub output_artifacts: Vec<String>,
    /// When the stage started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure taxonomy bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl StageState {
    /// A stage that has not started.
    #[must_use]
    pub fn pending(stage_id: StageId) -> Self {
        Self {
            stage_id,
            status: StageStatus::Pending,
            input_artifacts: Vec::new(),
            output_artifacts: Vec::new(),
            started_at: None,
            finished_at: None,
            error: None,
            error_kind: None,
        }
    }

    fn transition(&mut self, next: StageStatus) -> Result<(), InvariantViolation> {
        if !self.status.can_transition_to(next) {
            return Err(InvariantViolation::IllegalStageTransition {
                stage: self.stage_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub(crate) fn start(&mut self, inputs: Vec<String>) -> Result<(), InvariantViolation> {
        self.transition(StageStatus::Running)?;
        self.input_artifacts = inputs;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn succeed(&mut self, outputs: Vec<String>) -> Result<(), InvariantViolation> {
        self.transition(StageStatus::Succeeded)?;
        self.output_artifacts = outputs;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn fail(&mut self, failure: &StageFailure) -> Result<(), InvariantViolation> {
        self.transition(StageStatus::Failed)?;
        self.output_artifacts.clear();
        self.error = Some(failure.message.clone());
        self.error_kind = Some(failure.kind);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Wall-clock time the stage ran, once finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// One run of the Source, Build, Deploy sequence.
///
/// Only the engine mutates an execution, and never after it is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineExecution {
    /// Unique id.
    pub id: String,
    /// Pipeline name.
    pub pipeline: String,
    /// Environment pair the pipeline deploys to.
    pub pair: String,
    /// What started this execution.
    pub trigger: Trigger,
    /// One entry per stage, in execution order.
    pub stages: Vec<StageState>,
    /// Overall status.
    pub status: ExecutionStatus,
    /// Artifacts produced so far, by name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the execution reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// The execution this one re-runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    /// Stable revision of the pair when the execution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_target: Option<Revision>,
}

impl PipelineExecution {
    /// Creates a pending execution.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        pair: impl Into<String>,
        trigger: Trigger,
        rollback_target: Option<Revision>,
    ) -> Self {
        Self {
            id: generate_id("exec"),
            pipeline: pipeline.into(),
            pair: pair.into(),
            trigger,
            stages: StageId::ORDER.iter().copied().map(StageState::pending).collect(),
            status: ExecutionStatus::Pending,
            artifacts: BTreeMap::new(),
            created_at: Utc::now(),
            finished_at: None,
            retry_of: None,
            rollback_target,
        }
    }

    /// Marks this execution as a re-run of `execution_id`.
    #[must_use]
    pub fn with_retry_of(mut self, execution_id: impl Into<String>) -> Self {
        self.retry_of = Some(execution_id.into());
        self
    }

    /// Returns true once the execution succeeded or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// State of `stage`.
    #[must_use]
    pub fn stage(&self, stage: StageId) -> &StageState {
        &self.stages[stage.index()]
    }

    pub(crate) fn stage_mut(&mut self, stage: StageId) -> &mut StageState {
        &mut self.stages[stage.index()]
    }

    /// The next stage to run, if the execution is not terminal.
    #[must_use]
    pub fn next_stage(&self) -> Option<StageId> {
        if self.is_terminal() {
            return None;
        }
        self.stages
            .iter()
            .find(|state| state.status == StageStatus::Pending)
            .map(|state| state.stage_id)
    }

    /// An artifact produced by this execution.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// The revision Deploy rolled out, once it succeeded.
    #[must_use]
    pub fn deployed_revision(&self) -> Option<Revision> {
        if self.stage(StageId::Deploy).status != StageStatus::Succeeded {
            return None;
        }
        self.artifact(BUILD_ARTIFACT)?.decode().ok()
    }

    /// The first failed stage and its error.
    #[must_use]
    pub fn failure(&self) -> Option<(StageId, &str)> {
        self.stages
            .iter()
            .find(|state| state.status == StageStatus::Failed)
            .map(|state| (state.stage_id, state.error.as_deref().unwrap_or_default()))
    }

    /// Checks that `stage` may start now.
    pub(crate) fn check_eligible(&self, stage: StageId) -> Result<(), InvariantViolation> {
        if let Some(predecessor) = stage.predecessor() {
            if self.stage(predecessor).status != StageStatus::Succeeded {
                return Err(InvariantViolation::PredecessorIncomplete { stage, predecessor });
            }
        }
        for name in stage.declared_inputs() {
            if !self.artifacts.contains_key(*name) {
                return Err(InvariantViolation::MissingInput {
                    stage,
                    artifact: (*name).to_string(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SOURCE_ARTIFACT;
    use crate::testing::{revision, trigger};
    use pretty_assertions::assert_eq;

    fn execution() -> PipelineExecution {
        PipelineExecution::new("web", "nginx", trigger("abc123"), None)
    }

    #[test]
    fn test_new_execution_is_pending() {
        let exec = execution();
        assert!(exec.id.starts_with("exec-"));
        assert_eq!(exec.status, ExecutionStatus::Pending);
        assert_eq!(exec.next_stage(), Some(StageId::Source));
        assert!(exec.stages.iter().all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn test_stage_transitions_are_forward_only() {
        let mut state = StageState::pending(StageId::Build);
        assert!(state.succeed(Vec::new()).is_err());

        state.start(vec![SOURCE_ARTIFACT.to_string()]).unwrap();
        state.succeed(vec![BUILD_ARTIFACT.to_string()]).unwrap();
        assert!(state.duration().is_some());

        let err = state.fail(&StageFailure::new(StageId::Build, "late")).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::IllegalStageTransition {
                stage: StageId::Build,
                from: StageStatus::Succeeded,
                to: StageStatus::Failed,
            }
        );
    }

    #[test]
    fn test_failed_stage_keeps_no_outputs() {
        let mut state = StageState::pending(StageId::Deploy);
        state.start(Vec::new()).unwrap();
        state.output_artifacts.push("partial".to_string());
        state
            .fail(&StageFailure::new(StageId::Deploy, "rolled back").with_kind(ErrorKind::HealthCheckFailure))
            .unwrap();

        assert!(state.output_artifacts.is_empty());
        assert_eq!(state.error_kind, Some(ErrorKind::HealthCheckFailure));
    }

    #[test]
    fn test_eligibility_requires_predecessor_and_inputs() {
        let mut exec = execution();
        assert_eq!(
            exec.check_eligible(StageId::Build),
            Err(InvariantViolation::PredecessorIncomplete {
                stage: StageId::Build,
                predecessor: StageId::Source,
            })
        );

        let source = exec.stage_mut(StageId::Source);
        source.start(Vec::new()).unwrap();
        source.succeed(Vec::new()).unwrap();
        assert_eq!(
            exec.check_eligible(StageId::Build),
            Err(InvariantViolation::MissingInput {
                stage: StageId::Build,
                artifact: SOURCE_ARTIFACT.to_string(),
            })
        );
    }

    #[test]
    fn test_deployed_revision_only_after_deploy() {
        let mut exec = execution();
        exec.artifacts.insert(
            BUILD_ARTIFACT.to_string(),
            Artifact::encode(BUILD_ARTIFACT, StageId::Build, &revision("2")).unwrap(),
        );
        assert!(exec.deployed_revision().is_none());

        let deploy = exec.stage_mut(StageId::Deploy);
        deploy.start(Vec::new()).unwrap();
        deploy.succeed(Vec::new()).unwrap();
        assert_eq!(exec.deployed_revision(), Some(revision("2")));
    }

    #[test]
    fn test_execution_serializes() {
        let exec = execution().with_retry_of("exec-1");
        let json = serde_json::to_string(&exec).unwrap();
        let back: PipelineExecution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, exec);
    }
}
