//! Core domain model types for deployflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage identifiers, statuses and slot colors
//! - Artifacts passed between stages
//! - Revisions produced by builds
//! - Observable events

mod artifact;
pub mod event;
mod revision;
mod status;

pub use artifact::{Artifact, ArtifactPayload, BUILD_ARTIFACT, SOURCE_ARTIFACT};
pub use event::FlowEvent;
pub use revision::{
    is_valid_image_reference, PortMapping, Protocol, Revision, SourceRevision, TaskSpec,
};
pub use status::{Color, ExecutionStatus, StageId, StageStatus};
