//! The Source stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{StageContext, StageRunner};
use crate::core::{Artifact, SourceRevision, StageId, SOURCE_ARTIFACT};
use crate::errors::StageFailure;
use crate::pipeline::Trigger;

/// Fetches the source revision named by a trigger.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Resolves the trigger to a concrete source revision.
    async fn fetch(&self, trigger: &Trigger) -> Result<SourceRevision, StageFailure>;
}

/// Takes the revision straight from the trigger event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerSource;

#[async_trait]
impl SourceProvider for TriggerSource {
    async fn fetch(&self, trigger: &Trigger) -> Result<SourceRevision, StageFailure> {
        if trigger.source_revision_id.trim().is_empty() {
            return Err(StageFailure::new(
                StageId::Source,
                "trigger carries no source revision",
            ));
        }
        Ok(SourceRevision::new(
            &trigger.repository,
            &trigger.branch,
            &trigger.source_revision_id,
        ))
    }
}

/// Runs a [`SourceProvider`] and publishes `source_output`.
#[derive(Clone)]
pub struct SourceStage {
    provider: Arc<dyn SourceProvider>,
}

impl SourceStage {
    /// Creates a source stage.
    #[must_use]
    pub fn new(provider: Arc<dyn SourceProvider>) -> Self {
        Self { provider }
    }
}

impl Default for SourceStage {
    fn default() -> Self {
        Self::new(Arc::new(TriggerSource))
    }
}

impl std::fmt::Debug for SourceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl StageRunner for SourceStage {
    fn stage_id(&self) -> StageId {
        StageId::Source
    }

    async fn run(&self, ctx: &StageContext) -> Result<Vec<Artifact>, StageFailure> {
        let source = self.provider.fetch(&ctx.trigger).await?;
        info!(
            execution_id = %ctx.execution_id,
            repository = %source.repository,
            commit = %source.commit,
            "Fetched source"
        );
        let artifact = Artifact::encode(SOURCE_ARTIFACT, StageId::Source, &source)
            .map_err(|e| StageFailure::new(StageId::Source, e.to_string()))?;
        Ok(vec![artifact])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stage_context, trigger};

    #[tokio::test]
    async fn test_trigger_source_publishes_commit() {
        let ctx = stage_context(trigger("abc123"));
        let artifacts = SourceStage::default().run(&ctx).await.unwrap();

        assert_eq!(artifacts.len(), 1);
        let source: SourceRevision = artifacts[0].decode().unwrap();
        assert_eq!(source.commit, "abc123");
        assert_eq!(source.branch, "master");
    }

    #[tokio::test]
    async fn test_empty_revision_fails() {
        let ctx = stage_context(trigger(" "));
        let err = SourceStage::default().run(&ctx).await.unwrap_err();
        assert_eq!(err.stage, StageId::Source);
    }
}
