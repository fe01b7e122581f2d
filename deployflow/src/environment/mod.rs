//! Blue/green environment pairs and the traffic routing they program.

mod pair;
mod split;

pub use pair::{EnvironmentSlot, SharedPair, TargetEnvironmentPair};
pub use split::TrafficSplit;

use async_trait::async_trait;

use crate::errors::DeployflowError;

/// The data plane that actually routes traffic (load balancer listener,
/// mesh route, ...).
///
/// The controller calls `apply` in strict order and never concurrently for
/// the same pair.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Routes traffic for `pair` according to `split`.
    async fn apply(&self, pair: &str, split: TrafficSplit) -> Result<(), DeployflowError>;
}

/// A router that accepts every split without routing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTrafficRouter;

#[async_trait]
impl TrafficRouter for NoOpTrafficRouter {
    async fn apply(&self, _pair: &str, _split: TrafficSplit) -> Result<(), DeployflowError> {
        Ok(())
    }
}
