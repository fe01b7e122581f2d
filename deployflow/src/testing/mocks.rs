//! In-memory stand-ins for the external collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use crate::core::{Color, Revision, SourceRevision};
use crate::deployment::{Readiness, SlotProvisioner};
use crate::environment::{TrafficRouter, TrafficSplit};
use crate::errors::{BuildError, DeployflowError, ProvisioningError};
use crate::health::{HealthMonitor, HealthObservation, HealthStatus};
use crate::stages::BuildCollaborator;

/// A health monitor that replays a timeline.
///
/// Offsets are measured from the moment the monitor was created, on the
/// tokio clock, so paused-time tests see exact boundaries.
#[derive(Debug)]
pub struct ScriptedHealthMonitor {
    started: Instant,
    initial: HealthObservation,
    timeline: Vec<(Duration, HealthObservation)>,
    polls: Mutex<usize>,
}

impl ScriptedHealthMonitor {
    /// Reports `status` until a later change.
    #[must_use]
    pub fn always(status: HealthStatus) -> Self {
        Self {
            started: Instant::now(),
            initial: HealthObservation::new(status),
            timeline: Vec::new(),
            polls: Mutex::new(0),
        }
    }

    /// Reports `observation` from `offset` onwards.
    #[must_use]
    pub fn at(mut self, offset: Duration, observation: HealthObservation) -> Self {
        self.timeline.push((offset, observation));
        self.timeline.sort_by_key(|(offset, _)| *offset);
        self
    }

    /// Number of times the monitor was polled.
    #[must_use]
    pub fn polls(&self) -> usize {
        *self.polls.lock()
    }
}

#[async_trait]
impl HealthMonitor for ScriptedHealthMonitor {
    async fn current_health(&self, _pair: &str, _color: Color) -> HealthObservation {
        *self.polls.lock() += 1;
        let elapsed = self.started.elapsed();
        let current = self
            .timeline
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= elapsed)
            .map_or(&self.initial, |(_, observation)| observation);
        HealthObservation {
            observed_at: chrono::Utc::now(),
            ..current.clone()
        }
    }
}

/// A provisioner whose slots become ready after a fixed delay.
#[derive(Debug)]
pub struct FakeProvisioner {
    ready_after: Option<Duration>,
    provision_error: Option<String>,
    provisioned_at: Mutex<HashMap<(String, Color), Instant>>,
    provisioned: Mutex<Vec<(Color, Revision)>>,
    torn_down: Mutex<Vec<Color>>,
}

impl FakeProvisioner {
    fn build(ready_after: Option<Duration>, provision_error: Option<String>) -> Self {
        Self {
            ready_after,
            provision_error,
            provisioned_at: Mutex::new(HashMap::new()),
            provisioned: Mutex::new(Vec::new()),
            torn_down: Mutex::new(Vec::new()),
        }
    }

    /// Slots are ready as soon as they are provisioned.
    #[must_use]
    pub fn ready() -> Self {
        Self::ready_after(Duration::ZERO)
    }

    /// Slots become ready `delay` after provisioning.
    #[must_use]
    pub fn ready_after(delay: Duration) -> Self {
        Self::build(Some(delay), None)
    }

    /// Slots stay pending forever.
    #[must_use]
    pub fn never_ready() -> Self {
        Self::build(None, None)
    }

    /// Provisioning itself is rejected with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::build(None, Some(message.into()))
    }

    /// Colors torn down, in order.
    #[must_use]
    pub fn torn_down(&self) -> Vec<Color> {
        self.torn_down.lock().clone()
    }

    /// Revisions provisioned, in order.
    #[must_use]
    pub fn provisioned(&self) -> Vec<(Color, Revision)> {
        self.provisioned.lock().clone()
    }
}

#[async_trait]
impl SlotProvisioner for FakeProvisioner {
    async fn provision(
        &self,
        pair: &str,
        color: Color,
        revision: &Revision,
    ) -> Result<(), ProvisioningError> {
        if let Some(message) = &self.provision_error {
            return Err(ProvisioningError::new(color, message.clone()));
        }
        self.provisioned_at.lock().insert((pair.to_string(), color), Instant::now());
        self.provisioned.lock().push((color, revision.clone()));
        Ok(())
    }

    async fn readiness(&self, pair: &str, color: Color) -> Readiness {
        let since = self.provisioned_at.lock().get(&(pair.to_string(), color)).copied();
        match (since, self.ready_after) {
            (Some(since), Some(delay)) if since.elapsed() >= delay => Readiness::Ready,
            _ => Readiness::Pending,
        }
    }

    async fn teardown(&self, pair: &str, color: Color) -> Result<(), ProvisioningError> {
        self.provisioned_at.lock().remove(&(pair.to_string(), color));
        self.torn_down.lock().push(color);
        Ok(())
    }
}

/// A router that records every split it is asked to apply.
#[derive(Debug, Default)]
pub struct RecordingRouter {
    applied: Mutex<Vec<(String, TrafficSplit)>>,
    fail_at: Option<u8>,
}

impl RecordingRouter {
    /// Accepts every split.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects any split that gives `green` weight `weight`.
    #[must_use]
    pub fn failing_at_green(weight: u8) -> Self {
        Self {
            fail_at: Some(weight),
            ..Self::default()
        }
    }

    /// Every applied split, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<(String, TrafficSplit)> {
        self.applied.lock().clone()
    }

    /// The weight `color` received in each applied split.
    #[must_use]
    pub fn new_slot_weights(&self, color: Color) -> Vec<u8> {
        self.applied.lock().iter().map(|(_, split)| split.weight(color)).collect()
    }
}

#[async_trait]
impl TrafficRouter for RecordingRouter {
    async fn apply(&self, pair: &str, split: TrafficSplit) -> Result<(), DeployflowError> {
        if self.fail_at == Some(split.green()) {
            return Err(DeployflowError::Store(format!("listener update rejected for {pair}")));
        }
        self.applied.lock().push((pair.to_string(), split));
        Ok(())
    }
}

/// A build that always returns the same revision.
#[derive(Debug)]
pub struct StaticBuild {
    revision: Revision,
    calls: Mutex<Vec<SourceRevision>>,
}

impl StaticBuild {
    /// Builds every source into `revision`.
    #[must_use]
    pub fn new(revision: Revision) -> Self {
        Self {
            revision,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of builds run.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Sources built, in order.
    #[must_use]
    pub fn sources(&self) -> Vec<SourceRevision> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BuildCollaborator for StaticBuild {
    async fn build(&self, source: &SourceRevision) -> Result<Revision, BuildError> {
        self.calls.lock().push(source.clone());
        Ok(self.revision.clone())
    }
}

/// A build that always fails.
#[derive(Debug)]
pub struct FailingBuild {
    message: String,
}

impl FailingBuild {
    /// Fails every build with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl BuildCollaborator for FailingBuild {
    async fn build(&self, _source: &SourceRevision) -> Result<Revision, BuildError> {
        Err(BuildError::new(self.message.clone()))
    }
}
