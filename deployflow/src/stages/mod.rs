//! Stage runners for the Source, Build and Deploy stages.
//!
//! A runner executes one stage against the input artifacts its stage
//! declares and returns the artifacts it produced. Sequencing, artifact
//! bookkeeping and status tracking belong to the
//! [`PipelineEngine`](crate::pipeline::PipelineEngine).

mod build;
mod deploy;
mod source;

pub use build::{BuildCollaborator, BuildStage};
pub use deploy::DeployStage;
pub use source::{SourceProvider, SourceStage, TriggerSource};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::core::{Artifact, Revision, StageId};
use crate::errors::StageFailure;
use crate::pipeline::Trigger;

/// Everything a runner may look at while executing.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Execution the stage belongs to.
    pub execution_id: String,
    /// Pipeline name.
    pub pipeline: String,
    /// Environment pair the pipeline deploys to.
    pub pair: String,
    /// The trigger that started the execution.
    pub trigger: Trigger,
    /// Declared input artifacts, by name.
    pub inputs: HashMap<String, Artifact>,
    /// Stable revision of the pair when the execution started.
    pub baseline: Option<Revision>,
    /// Cancellation of the execution.
    pub cancel: Arc<CancellationToken>,
}

impl StageContext {
    /// Returns a declared input artifact.
    pub fn input(&self, stage: StageId, name: &str) -> Result<&Artifact, StageFailure> {
        self.inputs
            .get(name)
            .ok_or_else(|| StageFailure::new(stage, format!("missing input artifact '{name}'")))
    }

    /// Decodes a declared input artifact.
    pub fn decode_input<T: DeserializeOwned>(
        &self,
        stage: StageId,
        name: &str,
    ) -> Result<T, StageFailure> {
        self.input(stage, name)?
            .decode()
            .map_err(|e| StageFailure::new(stage, format!("cannot decode '{name}': {e}")))
    }
}

/// Executes one pipeline stage.
#[async_trait]
pub trait StageRunner: Send + Sync + Debug {
    /// The stage this runner implements.
    fn stage_id(&self) -> StageId;

    /// Runs the stage, returning its output artifacts.
    async fn run(&self, ctx: &StageContext) -> Result<Vec<Artifact>, StageFailure>;
}
