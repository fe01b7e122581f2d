//! Pipeline executions and the engine that sequences their stages.
//!
//! An execution runs Source, Build and Deploy strictly in order. Each stage
//! consumes the artifacts its predecessor declared and must produce the
//! ones it declares itself; a stage that fails ends the execution.

mod engine;
mod execution;

pub use engine::{DeployRegistry, PipelineEngine};
pub use execution::{PipelineExecution, StageState, Trigger};
