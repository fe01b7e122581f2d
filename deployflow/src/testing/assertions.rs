//! Assertions over pairs, weights and executions.

use crate::core::{ExecutionStatus, StageId, StageStatus};
use crate::environment::TargetEnvironmentPair;
use crate::pipeline::PipelineExecution;

/// Asserts the pair is at rest: the active slot takes all traffic and no
/// deployment holds it.
pub fn assert_pair_steady(pair: &TargetEnvironmentPair) {
    assert!(
        pair.is_steady(),
        "Expected steady pair, got split {} with active {}",
        pair.split(),
        pair.active_color()
    );
    assert!(
        pair.owner().is_none(),
        "Expected pair to be released, held by {:?}",
        pair.owner()
    );
}

/// Asserts a weight series only rises and then only falls.
pub fn assert_rise_then_fall(weights: &[u8]) {
    let peak = weights
        .iter()
        .enumerate()
        .max_by_key(|(i, w)| (**w, std::cmp::Reverse(*i)))
        .map_or(0, |(i, _)| i);
    let (rising, falling) = weights.split_at(peak);
    assert!(
        rising.windows(2).all(|w| w[0] <= w[1]),
        "Weights decreased before the peak: {weights:?}"
    );
    assert!(
        falling.windows(2).all(|w| w[0] >= w[1]),
        "Weights increased after the peak: {weights:?}"
    );
}

/// Asserts an execution ended with `expected`.
pub fn assert_execution_status(execution: &PipelineExecution, expected: ExecutionStatus) {
    assert_eq!(
        execution.status, expected,
        "Execution {} ended {:?}, expected {:?}",
        execution.id, execution.status, expected
    );
}

/// Asserts a stage of an execution has `expected` status.
pub fn assert_stage_status(execution: &PipelineExecution, stage: StageId, expected: StageStatus) {
    let actual = execution.stage(stage).status;
    assert_eq!(
        actual, expected,
        "Stage {stage} of {} is {actual:?}, expected {expected:?}",
        execution.id
    );
}
