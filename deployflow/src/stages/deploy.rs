//! The Deploy stage: hands the built revision to the deployment controller.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use super::{StageContext, StageRunner};
use crate::core::{Artifact, Revision, StageId, BUILD_ARTIFACT};
use crate::deployment::{DeploymentController, DeploymentOutcome};
use crate::errors::{ErrorKind, StageFailure};

/// Deploys `build_output` through a [`DeploymentController`].
///
/// A rolled-back deployment fails the stage with the rollback reason.
#[derive(Debug, Clone)]
pub struct DeployStage {
    controller: Arc<DeploymentController>,
}

impl DeployStage {
    /// Creates a deploy stage.
    #[must_use]
    pub fn new(controller: Arc<DeploymentController>) -> Self {
        Self { controller }
    }

    /// The controller this stage deploys through.
    #[must_use]
    pub fn controller(&self) -> &Arc<DeploymentController> {
        &self.controller
    }
}

#[async_trait]
impl StageRunner for DeployStage {
    fn stage_id(&self) -> StageId {
        StageId::Deploy
    }

    async fn run(&self, ctx: &StageContext) -> Result<Vec<Artifact>, StageFailure> {
        let revision: Revision = ctx.decode_input(StageId::Deploy, BUILD_ARTIFACT)?;
        if let Some(baseline) = &ctx.baseline {
            info!(
                execution_id = %ctx.execution_id,
                baseline = %baseline,
                target = %revision,
                "Deploying over stable baseline"
            );
        }

        match self.controller.deploy(revision, &ctx.cancel).await {
            Ok(DeploymentOutcome::Completed(_)) => Ok(Vec::new()),
            Ok(DeploymentOutcome::RolledBack(record)) => {
                let (kind, message) = record.rollback_reason.map_or_else(
                    || (ErrorKind::StageFailure, "deployment rolled back".to_string()),
                    |reason| (reason.kind(), reason.to_string()),
                );
                Err(StageFailure::new(StageId::Deploy, message).with_kind(kind))
            }
            Err(e) => {
                error!(execution_id = %ctx.execution_id, error = %e, "Deployment failed");
                let kind = e.kind().unwrap_or(ErrorKind::StageFailure);
                Err(StageFailure::new(StageId::Deploy, e.to_string()).with_kind(kind))
            }
        }
    }
}
