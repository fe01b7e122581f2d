//! The Build stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{StageContext, StageRunner};
use crate::core::{Artifact, Revision, SourceRevision, StageId, BUILD_ARTIFACT, SOURCE_ARTIFACT};
use crate::errors::{BuildError, StageFailure};

/// Turns a source revision into a deployable revision.
///
/// Image building itself happens outside this crate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildCollaborator: Send + Sync {
    /// Builds `source`.
    async fn build(&self, source: &SourceRevision) -> Result<Revision, BuildError>;
}

/// Runs a [`BuildCollaborator`] on `source_output` and publishes
/// `build_output`.
#[derive(Clone)]
pub struct BuildStage {
    builder: Arc<dyn BuildCollaborator>,
}

impl BuildStage {
    /// Creates a build stage.
    #[must_use]
    pub fn new(builder: Arc<dyn BuildCollaborator>) -> Self {
        Self { builder }
    }
}

impl std::fmt::Debug for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl StageRunner for BuildStage {
    fn stage_id(&self) -> StageId {
        StageId::Build
    }

    async fn run(&self, ctx: &StageContext) -> Result<Vec<Artifact>, StageFailure> {
        let source: SourceRevision = ctx.decode_input(StageId::Build, SOURCE_ARTIFACT)?;
        let revision = self.builder.build(&source).await?;
        info!(
            execution_id = %ctx.execution_id,
            commit = %source.commit,
            revision = %revision,
            "Built revision"
        );
        let artifact = Artifact::encode(BUILD_ARTIFACT, StageId::Build, &revision)
            .map_err(|e| StageFailure::new(StageId::Build, e.to_string()))?;
        Ok(vec![artifact])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::testing::{revision, stage_context, trigger, FailingBuild, StaticBuild};

    fn ctx_with_source() -> StageContext {
        let mut ctx = stage_context(trigger("abc123"));
        let source = SourceRevision::new("o/r", "master", "abc123");
        ctx.inputs.insert(
            SOURCE_ARTIFACT.to_string(),
            Artifact::encode(SOURCE_ARTIFACT, StageId::Source, &source).unwrap(),
        );
        ctx
    }

    #[tokio::test]
    async fn test_build_publishes_revision() {
        let build = Arc::new(StaticBuild::new(revision("2")));
        let artifacts = BuildStage::new(build.clone()).run(&ctx_with_source()).await.unwrap();

        let built: Revision = artifacts[0].decode().unwrap();
        assert_eq!(built, revision("2"));
        assert_eq!(build.calls(), 1);
    }

    #[tokio::test]
    async fn test_build_error_becomes_stage_failure() {
        let stage = BuildStage::new(Arc::new(FailingBuild::new("docker build exited 1")));
        let err = stage.run(&ctx_with_source()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BuildError);
    }

    #[tokio::test]
    async fn test_build_receives_decoded_source() {
        let mut builder = MockBuildCollaborator::new();
        builder
            .expect_build()
            .withf(|source| source.commit == "abc123" && source.branch == "master")
            .times(1)
            .returning(|_| Ok(revision("3")));

        let artifacts = BuildStage::new(Arc::new(builder))
            .run(&ctx_with_source())
            .await
            .unwrap();
        assert_eq!(artifacts[0].name(), BUILD_ARTIFACT);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let stage = BuildStage::new(Arc::new(StaticBuild::new(revision("2"))));
        let err = stage.run(&stage_context(trigger("abc123"))).await.unwrap_err();
        assert!(err.message.contains("source_output"));
    }
}
