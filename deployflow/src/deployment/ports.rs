//! Compute-side collaborator of the deployment controller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Color, Revision};
use crate::errors::ProvisioningError;

/// Readiness of a freshly provisioned slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum Readiness {
    /// Tasks are running and registered with the slot's target group.
    Ready,
    /// Still starting.
    Pending,
    /// Startup failed for good.
    Failed(String),
}

/// Starts revisions on slots and releases them.
///
/// Implementations must be idempotent: provisioning a revision that already
/// runs, or tearing down an empty slot, succeeds without side effects.
#[async_trait]
pub trait SlotProvisioner: Send + Sync {
    /// Starts `revision` on the `color` slot of `pair`.
    async fn provision(
        &self,
        pair: &str,
        color: Color,
        revision: &Revision,
    ) -> Result<(), ProvisioningError>;

    /// Reports whether the slot can take traffic.
    async fn readiness(&self, pair: &str, color: Color) -> Readiness;

    /// Releases the slot's compute resources.
    async fn teardown(&self, pair: &str, color: Color) -> Result<(), ProvisioningError>;
}
