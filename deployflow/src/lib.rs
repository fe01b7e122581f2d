//! # Deployflow
//!
//! Release pipeline sequencing and blue/green canary deployment control.
//!
//! A release runs three stages in order: Source fetches the revision named
//! by a trigger, Build turns it into a deployable [`Revision`](core::Revision),
//! and Deploy hands that revision to a
//! [`DeploymentController`](deployment::DeploymentController). The
//! controller stands the revision up on the idle slot of a blue/green
//! environment pair, shifts traffic to it in canary steps, watches health
//! through a bake period and either promotes it or rolls it back.
//!
//! - **Pipeline engine**: strict stage order, declared artifacts, one
//!   in-flight deploy per pair
//! - **Deployment controller**: phase state machine with write-ahead
//!   persistence and resume after restart
//! - **Environment pairs**: weight invariants enforced by construction
//! - **Observability**: `tracing` logs plus [`FlowEvent`](core::FlowEvent)s
//!   through an [`EventSink`](events::EventSink)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//!
//! let pair = TargetEnvironmentPair::new("nginx", Color::Blue, None).shared();
//! let controller = DeploymentController::new(
//!     DeploymentConfig::canary_10_percent_5_minutes(),
//!     pair,
//!     provisioner,
//!     router,
//!     health,
//! )?;
//!
//! let engine = PipelineEngine::new(
//!     PipelineConfig::load("pipeline.json").await?,
//!     Arc::new(SourceStage::default()),
//!     Arc::new(BuildStage::new(builder)),
//!     Arc::new(DeployStage::new(Arc::new(controller))),
//! )?;
//!
//! let execution = engine.run(Trigger::new("acme/web", "master", "abc123")).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod deployment;
pub mod environment;
pub mod errors;
pub mod events;
pub mod health;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        CanaryStep, DeploymentConfig, HealthPolicy, PipelineConfig, UnknownPolicy,
    };
    pub use crate::core::{
        Artifact, Color, ExecutionStatus, FlowEvent, Revision, SourceRevision, StageId,
        StageStatus, TaskSpec,
    };
    pub use crate::deployment::{
        DeploymentController, DeploymentOutcome, DeploymentPhase, DeploymentRecord, Readiness,
        RollbackReason, SlotProvisioner,
    };
    pub use crate::environment::{
        SharedPair, TargetEnvironmentPair, TrafficRouter, TrafficSplit,
    };
    pub use crate::errors::{DeployflowError, ErrorKind, InvariantViolation};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::health::{HealthMonitor, HealthObservation, HealthStatus};
    pub use crate::observability::{init_tracing, LogFormat, TracingConfig};
    pub use crate::pipeline::{PipelineEngine, PipelineExecution, StageState, Trigger};
    pub use crate::stages::{
        BuildCollaborator, BuildStage, DeployStage, SourceProvider, SourceStage, StageRunner,
    };
    pub use crate::store::{
        BaselineStore, DeploymentStore, ExecutionStore, FileDeploymentStore,
        InMemoryDeploymentStore, InMemoryExecutionStore,
    };
    pub use crate::utils::{generate_id, iso_timestamp, Timestamp};
}
