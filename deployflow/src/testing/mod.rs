//! Test support: fakes for the external collaborators, fixtures and
//! assertions.
//!
//! The fakes run on the tokio clock, so tests written with
//! `#[tokio::test(start_paused = true)]` drive whole canary schedules
//! without waiting.

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_execution_status, assert_pair_steady, assert_rise_then_fall, assert_stage_status,
};
pub use fixtures::{
    canary_deployment, pipeline_config, revision, stage_context, steady_pair, trigger,
    TEST_PAIR, TEST_PIPELINE, TEST_REPOSITORY,
};
pub use mocks::{FailingBuild, FakeProvisioner, RecordingRouter, ScriptedHealthMonitor, StaticBuild};
