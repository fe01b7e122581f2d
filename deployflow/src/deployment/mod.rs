//! Blue/green canary deployment control.
//!
//! A [`DeploymentController`] drives one [`DeploymentRecord`] at a time
//! through the phases in [`DeploymentPhase`], programming the pair's
//! traffic split and rolling back on health evidence, timeout or cancel.

mod controller;
mod phase;
mod ports;
mod record;

pub use controller::{DeploymentController, DeploymentOutcome};
pub use phase::DeploymentPhase;
pub use ports::{Readiness, SlotProvisioner};
pub use record::{DeploymentRecord, PhaseTransition, RollbackReason};
