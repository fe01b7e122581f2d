//! Sequencing of the Source, Build and Deploy stages.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::execution::{PipelineExecution, StageState, Trigger};
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::core::{Artifact, ExecutionStatus, FlowEvent, Revision, StageId};
use crate::errors::{ConfigError, DeployflowError, ErrorKind, InvariantViolation, StageFailure};
use crate::events::{get_event_sink, EventSink};
use crate::observability::SpanTimer;
use crate::stages::{StageContext, StageRunner};
use crate::store::{BaselineStore, ExecutionStore, InMemoryExecutionStore};

/// Which execution currently runs a Deploy stage on each pair.
///
/// Share one registry between every engine that targets the same pairs.
#[derive(Debug, Default)]
pub struct DeployRegistry {
    held: DashMap<String, String>,
}

impl DeployRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `pair` for `execution_id`.
    pub fn claim(&self, pair: &str, execution_id: &str) -> Result<(), InvariantViolation> {
        match self.held.entry(pair.to_string()) {
            Entry::Occupied(entry) if entry.get() != execution_id => {
                Err(InvariantViolation::PairBusy {
                    pair: pair.to_string(),
                    holder: entry.get().clone(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(execution_id.to_string());
                Ok(())
            }
        }
    }

    /// Releases `pair` if `execution_id` holds it.
    pub fn release(&self, pair: &str, execution_id: &str) {
        self.held.remove_if(pair, |_, holder| holder == execution_id);
    }

    /// The execution deploying to `pair`, if any.
    #[must_use]
    pub fn holder(&self, pair: &str) -> Option<String> {
        self.held.get(pair).map(|entry| entry.value().clone())
    }
}

/// Runs pipeline executions one stage at a time.
///
/// Stages run strictly in order. A stage starts only once its predecessor
/// succeeded and its declared inputs exist; the first failure ends the
/// execution and nothing after it runs.
pub struct PipelineEngine {
    config: PipelineConfig,
    runners: [Arc<dyn StageRunner>; 3],
    executions: Arc<dyn ExecutionStore>,
    baselines: Arc<BaselineStore>,
    deploys: Arc<DeployRegistry>,
    cancels: DashMap<String, Arc<CancellationToken>>,
    advancing: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("pipeline", &self.config.name)
            .field("pair", &self.config.pair)
            .field("runners", &self.runners)
            .finish_non_exhaustive()
    }
}

impl PipelineEngine {
    /// Creates an engine from one runner per stage.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or a runner is wired to the
    /// wrong stage.
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn StageRunner>,
        build: Arc<dyn StageRunner>,
        deploy: Arc<dyn StageRunner>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let runners = [source, build, deploy];
        for (expected, runner) in StageId::ORDER.iter().zip(&runners) {
            if runner.stage_id() != *expected {
                return Err(ConfigError::new(
                    "runners",
                    format!("runner for {} is wired as the {expected} stage", runner.stage_id()),
                ));
            }
        }
        Ok(Self {
            config,
            runners,
            executions: Arc::new(InMemoryExecutionStore::new()),
            baselines: Arc::new(BaselineStore::new()),
            deploys: Arc::new(DeployRegistry::new()),
            cancels: DashMap::new(),
            advancing: DashMap::new(),
            event_sink: get_event_sink(),
        })
    }

    /// Uses `store` for executions.
    #[must_use]
    pub fn with_execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.executions = store;
        self
    }

    /// Shares baselines with other engines.
    #[must_use]
    pub fn with_baselines(mut self, baselines: Arc<BaselineStore>) -> Self {
        self.baselines = baselines;
        self
    }

    /// Shares the in-flight deploy registry with other engines.
    #[must_use]
    pub fn with_deploy_registry(mut self, deploys: Arc<DeployRegistry>) -> Self {
        self.deploys = deploys;
        self
    }

    /// Sends events to `sink` instead of the global sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Creates a pending execution for `trigger`.
    pub async fn start(&self, trigger: Trigger) -> Result<PipelineExecution, DeployflowError> {
        self.create(trigger, None).await
    }

    /// Starts an execution and advances it until it is terminal.
    pub async fn run(&self, trigger: Trigger) -> Result<PipelineExecution, DeployflowError> {
        let execution = self.start(trigger).await?;
        self.run_to_completion(&execution.id).await
    }

    /// Advances an existing execution until it is terminal.
    pub async fn run_to_completion(
        &self,
        execution_id: &str,
    ) -> Result<PipelineExecution, DeployflowError> {
        loop {
            let execution = self.execution(execution_id).await?;
            if execution.is_terminal() {
                return Ok(execution);
            }
            self.advance(execution_id).await?;
        }
    }

    /// Starts a new execution from the trigger of a finished one.
    ///
    /// Nothing is reused: every stage runs again and produces fresh
    /// artifacts.
    pub async fn retry(&self, execution_id: &str) -> Result<PipelineExecution, DeployflowError> {
        let previous = self.execution(execution_id).await?;
        if !previous.is_terminal() {
            return Err(InvariantViolation::ExecutionInFlight(previous.id).into());
        }
        info!(execution_id = %previous.id, "Retrying execution");
        self.create(previous.trigger, Some(previous.id)).await
    }

    /// Loads an execution.
    pub async fn execution(&self, execution_id: &str) -> Result<PipelineExecution, DeployflowError> {
        self.executions
            .load(execution_id)
            .await?
            .ok_or_else(|| DeployflowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Every execution of this engine's store, oldest first.
    pub async fn executions(&self) -> Result<Vec<PipelineExecution>, DeployflowError> {
        self.executions.list().await
    }

    /// The last revision successfully deployed to the pair.
    #[must_use]
    pub fn stable_revision(&self) -> Option<Revision> {
        self.baselines.get(&self.config.pair)
    }

    /// Requests cancellation of a running execution.
    ///
    /// A running Deploy stage rolls back with `ManualCancel`; otherwise the
    /// next stage fails without running.
    pub async fn cancel(&self, execution_id: &str, reason: &str) -> Result<(), DeployflowError> {
        let execution = self.execution(execution_id).await?;
        if execution.is_terminal() {
            return Err(DeployflowError::ExecutionFinished(execution.id));
        }
        info!(execution_id, reason, "Cancellation requested");
        self.cancel_token(execution_id).cancel(reason);
        Ok(())
    }

    /// Runs the next stage of an execution and returns its final state.
    ///
    /// # Errors
    ///
    /// `ExecutionNotFound` and `ExecutionFinished` for unknown or terminal
    /// executions. An [`InvariantViolation`] if the stage is not eligible or
    /// another execution is deploying to the same pair; nothing is mutated
    /// in that case. A stage failure is not an error: it is recorded on the
    /// returned state.
    pub async fn advance(&self, execution_id: &str) -> Result<StageState, DeployflowError> {
        let lock = self
            .advancing
            .entry(execution_id.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let mut execution = self.execution(execution_id).await?;
        let Some(stage) = execution.next_stage() else {
            return Err(DeployflowError::ExecutionFinished(execution.id));
        };

        if let Err(violation) = execution.check_eligible(stage) {
            error!(execution_id, stage = %stage, error = %violation, "Stage not eligible");
            return Err(violation.into());
        }
        if stage == StageId::Deploy {
            if let Err(violation) = self.deploys.claim(&execution.pair, &execution.id) {
                error!(execution_id, pair = %execution.pair, error = %violation, "Rejected deploy");
                return Err(violation.into());
            }
        }

        let result = self.run_stage(&mut execution, stage).await;
        if stage == StageId::Deploy {
            self.deploys.release(&execution.pair, &execution.id);
        }
        if let Err(e) = result {
            error!(execution_id, stage = %stage, error = %e, "Stage could not be recorded");
            // A cancel request outlives the failed attempt.
            self.cancels.remove_if(&execution.id, |_, token| !token.is_cancelled());
            self.advancing.remove(&execution.id);
            return Err(e);
        }

        if execution.is_terminal() {
            self.cancels.remove(&execution.id);
            self.advancing.remove(&execution.id);
        }
        Ok(execution.stage(stage).clone())
    }

    async fn create(
        &self,
        trigger: Trigger,
        retry_of: Option<String>,
    ) -> Result<PipelineExecution, DeployflowError> {
        if trigger.repository != self.config.repository || trigger.branch != self.config.branch {
            warn!(
                pipeline = %self.config.name,
                repository = %trigger.repository,
                branch = %trigger.branch,
                "Trigger does not match the configured source"
            );
        }
        let mut execution = PipelineExecution::new(
            &self.config.name,
            &self.config.pair,
            trigger,
            self.stable_revision(),
        );
        if let Some(previous) = retry_of {
            execution = execution.with_retry_of(previous);
        }
        self.executions.save(&execution).await?;

        info!(
            execution_id = %execution.id,
            pipeline = %execution.pipeline,
            revision = %execution.trigger.source_revision_id,
            "Pipeline execution created"
        );
        FlowEvent::pipeline_started(
            &execution.id,
            &execution.pipeline,
            &execution.trigger.source_revision_id,
        )
        .emit_to(self.event_sink.as_ref());
        Ok(execution)
    }

    fn cancel_token(&self, execution_id: &str) -> Arc<CancellationToken> {
        self.cancels
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(CancellationToken::new()))
            .clone()
    }

    async fn run_stage(
        &self,
        execution: &mut PipelineExecution,
        stage: StageId,
    ) -> Result<(), DeployflowError> {
        let inputs: HashMap<String, Artifact> = stage
            .declared_inputs()
            .iter()
            .filter_map(|name| execution.artifact(name).map(|a| ((*name).to_string(), a.clone())))
            .collect();
        let mut input_names: Vec<String> = inputs.keys().cloned().collect();
        input_names.sort();

        execution.stage_mut(stage).start(input_names)?;
        execution.status = ExecutionStatus::Running;
        self.executions.save(execution).await?;

        info!(execution_id = %execution.id, stage = %stage, "Stage started");
        FlowEvent::stage_started(&execution.id, &stage.to_string())
            .emit_to(self.event_sink.as_ref());

        let cancel = self.cancel_token(&execution.id);
        let timer = SpanTimer::start(stage.to_string());
        let result = if let Some(reason) = cancel.reason() {
            Err(StageFailure::new(stage, format!("cancelled: {reason}"))
                .with_kind(ErrorKind::ManualCancel))
        } else {
            let ctx = StageContext {
                execution_id: execution.id.clone(),
                pipeline: execution.pipeline.clone(),
                pair: execution.pair.clone(),
                trigger: execution.trigger.clone(),
                inputs,
                baseline: execution.rollback_target.clone(),
                cancel,
            };
            self.runners[stage.index()]
                .run(&ctx)
                .await
                .and_then(|artifacts| check_outputs(execution, stage, artifacts))
        };
        let duration_ms = timer.finish();

        match result {
            Ok(artifacts) => {
                let names: Vec<String> = artifacts.iter().map(|a| a.name().to_string()).collect();
                for artifact in artifacts {
                    execution.artifacts.insert(artifact.name().to_string(), artifact);
                }
                execution.stage_mut(stage).succeed(names)?;
                info!(execution_id = %execution.id, stage = %stage, duration_ms, "Stage succeeded");
                FlowEvent::stage_succeeded(&execution.id, &stage.to_string(), duration_ms)
                    .emit_to(self.event_sink.as_ref());

                if execution.next_stage().is_none() {
                    execution.finish(ExecutionStatus::Succeeded);
                }
            }
            Err(failure) => {
                execution.stage_mut(stage).fail(&failure)?;
                execution.finish(ExecutionStatus::Failed);
                error!(
                    execution_id = %execution.id,
                    stage = %stage,
                    kind = %failure.kind,
                    error = %failure.message,
                    duration_ms,
                    "Stage failed"
                );
                FlowEvent::stage_failed(&execution.id, &stage.to_string(), &failure.message)
                    .emit_to(self.event_sink.as_ref());
            }
        }

        if execution.status == ExecutionStatus::Succeeded {
            if let Some(revision) = execution.deployed_revision() {
                self.baselines.record(&execution.pair, revision);
            }
        }
        self.executions.save(execution).await?;

        if execution.is_terminal() {
            let succeeded = execution.status == ExecutionStatus::Succeeded;
            info!(execution_id = %execution.id, status = %execution.status, "Pipeline execution finished");
            FlowEvent::pipeline_finished(&execution.id, &execution.pipeline, succeeded)
                .emit_to(self.event_sink.as_ref());
        } else {
            debug!(execution_id = %execution.id, next = ?execution.next_stage(), "Execution waiting");
        }
        Ok(())
    }
}

/// Rejects outputs that are missing a declared artifact or reuse a name.
fn check_outputs(
    execution: &PipelineExecution,
    stage: StageId,
    artifacts: Vec<Artifact>,
) -> Result<Vec<Artifact>, StageFailure> {
    for name in stage.declared_outputs() {
        if !artifacts.iter().any(|a| a.name() == *name) {
            return Err(StageFailure::new(
                stage,
                format!("stage reported success without producing '{name}'"),
            ));
        }
    }
    for (i, artifact) in artifacts.iter().enumerate() {
        let repeated = artifacts[..i].iter().any(|a| a.name() == artifact.name());
        if repeated || execution.artifacts.contains_key(artifact.name()) {
            return Err(StageFailure::new(
                stage,
                format!("artifact '{}' already exists in this execution", artifact.name()),
            ));
        }
    }
    Ok(artifacts)
}
