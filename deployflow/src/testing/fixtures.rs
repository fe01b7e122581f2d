//! Ready-made values for tests.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Duration;

use crate::cancellation::CancellationToken;
use crate::config::{CanaryStep, DeploymentConfig, HealthPolicy, PipelineConfig};
use crate::core::{Color, Revision, TaskSpec};
use crate::environment::{SharedPair, TargetEnvironmentPair};
use crate::pipeline::Trigger;
use crate::stages::StageContext;

/// Pipeline name used by the fixtures.
pub const TEST_PIPELINE: &str = "web";
/// Pair name used by the fixtures.
pub const TEST_PAIR: &str = "nginx";
/// Repository used by the fixtures.
pub const TEST_REPOSITORY: &str = "acme/web";

/// `nginx:<tag>` with the default task spec.
///
/// # Panics
///
/// Panics if `tag` does not form a valid image reference.
#[must_use]
pub fn revision(tag: &str) -> Revision {
    Revision::new(format!("nginx:{tag}"), TaskSpec::default())
        .unwrap_or_else(|e| panic!("invalid test revision: {e}"))
}

/// A trigger for `commit` on the fixture repository.
#[must_use]
pub fn trigger(commit: &str) -> Trigger {
    Trigger::new(TEST_REPOSITORY, "master", commit)
}

/// A pair in steady state with `revision` live on blue.
#[must_use]
pub fn steady_pair(revision: Option<Revision>) -> SharedPair {
    TargetEnvironmentPair::new(TEST_PAIR, Color::Blue, revision).shared()
}

/// One 10% step held for two minutes, then a five minute bake.
#[must_use]
pub fn canary_deployment() -> DeploymentConfig {
    DeploymentConfig::default()
        .with_steps([CanaryStep::new(10, Duration::from_secs(120))])
        .with_bake(Duration::from_secs(300))
        .with_startup_timeout(Duration::from_secs(60))
        .with_readiness_poll_interval(Duration::from_secs(5))
        .with_health(HealthPolicy::default().with_poll_interval(Duration::from_secs(10)))
}

/// The fixture pipeline with [`canary_deployment`].
#[must_use]
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig::new(TEST_PIPELINE, TEST_PAIR, TEST_REPOSITORY)
        .with_deployment(canary_deployment())
}

/// A stage context with no inputs.
#[must_use]
pub fn stage_context(trigger: Trigger) -> StageContext {
    StageContext {
        execution_id: "exec-test".to_string(),
        pipeline: TEST_PIPELINE.to_string(),
        pair: TEST_PAIR.to_string(),
        trigger,
        inputs: HashMap::new(),
        baseline: None,
        cancel: Arc::new(CancellationToken::new()),
    }
}
