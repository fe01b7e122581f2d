//! The blue/green canary deployment state machine.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{DeploymentPhase, DeploymentRecord, Readiness, RollbackReason, SlotProvisioner};
use crate::cancellation::CancellationToken;
use crate::config::{DeploymentConfig, UnknownPolicy};
use crate::core::{event::FlowEvent, Color, Revision};
use crate::environment::{SharedPair, TrafficRouter, TrafficSplit};
use crate::errors::{ConfigError, DeployflowError, InvariantViolation, ProvisioningError};
use crate::events::{get_event_sink, EventSink};
use crate::health::{HealthMonitor, HealthObservation, HealthSource, HealthStatus, UnknownTracker};
use crate::store::{DeploymentStore, InMemoryDeploymentStore};
use crate::utils::{add_duration, generate_id, remaining_until};

/// How a deployment ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentOutcome {
    /// The target revision serves all traffic.
    Completed(DeploymentRecord),
    /// The previous revision serves all traffic again.
    RolledBack(DeploymentRecord),
}

impl DeploymentOutcome {
    fn from_terminal(record: DeploymentRecord) -> Self {
        if record.succeeded() {
            Self::Completed(record)
        } else {
            Self::RolledBack(record)
        }
    }

    /// The terminal record.
    #[must_use]
    pub fn record(&self) -> &DeploymentRecord {
        match self {
            Self::Completed(record) | Self::RolledBack(record) => record,
        }
    }

    /// Consumes the outcome, returning the terminal record.
    #[must_use]
    pub fn into_record(self) -> DeploymentRecord {
        match self {
            Self::Completed(record) | Self::RolledBack(record) => record,
        }
    }

    /// Returns true if the deployment completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Why the deployment rolled back, if it did.
    #[must_use]
    pub fn rollback_reason(&self) -> Option<&RollbackReason> {
        self.record().rollback_reason.as_ref()
    }
}

/// Result of watching health over a window.
enum Watch {
    Clear,
    Rollback(RollbackReason),
}

fn cancel_reason(cancel: &CancellationToken) -> Option<RollbackReason> {
    cancel.is_cancelled().then(|| RollbackReason::ManualCancel {
        reason: cancel
            .reason()
            .unwrap_or_else(|| "cancelled by operator".to_string()),
    })
}

/// A cancel request that must roll `record` back right now.
fn pending_cancel(record: &DeploymentRecord, cancel: &CancellationToken) -> Option<RollbackReason> {
    if record.phase.is_cancellable() {
        cancel_reason(cancel)
    } else {
        None
    }
}

/// Drives deployments against one environment pair.
///
/// Only one deployment may hold the pair at a time; the controller takes
/// the pair's ownership lease on start and releases it on a terminal phase.
/// The lease stays held if a phase fails with an invariant violation, so an
/// operator has to look at the pair (and [`resume`](Self::resume)) before
/// anything else touches it.
pub struct DeploymentController {
    config: DeploymentConfig,
    pair: SharedPair,
    pair_name: String,
    provisioner: Arc<dyn SlotProvisioner>,
    router: Arc<dyn TrafficRouter>,
    health: Arc<dyn HealthMonitor>,
    store: Arc<dyn DeploymentStore>,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for DeploymentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentController")
            .field("pair", &self.pair_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeploymentController {
    /// Creates a controller after validating `config`.
    pub fn new(
        config: DeploymentConfig,
        pair: SharedPair,
        provisioner: Arc<dyn SlotProvisioner>,
        router: Arc<dyn TrafficRouter>,
        health: Arc<dyn HealthMonitor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pair_name = pair.lock().name().to_string();
        Ok(Self {
            config,
            pair,
            pair_name,
            provisioner,
            router,
            health,
            store: Arc::new(InMemoryDeploymentStore::new()),
            event_sink: get_event_sink(),
        })
    }

    /// Sets the store deployment records are persisted to.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DeploymentStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the sink observable events go to.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The pair this controller drives.
    #[must_use]
    pub fn pair(&self) -> &SharedPair {
        &self.pair
    }

    /// Name of the pair this controller drives.
    #[must_use]
    pub fn pair_name(&self) -> &str {
        &self.pair_name
    }

    /// The deployment configuration.
    #[must_use]
    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// The record store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Rolls `target` out onto the inactive slot and runs the deployment to
    /// a terminal phase.
    ///
    /// Provisioning, health and timeout failures end in
    /// [`DeploymentOutcome::RolledBack`]. An `Err` means the deployment could
    /// not start (the pair is held by another deployment) or an invariant
    /// was violated along the way.
    pub async fn deploy(
        &self,
        target: Revision,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutcome, DeployflowError> {
        if let Some(other) = self.store.in_flight(&self.pair_name).await?.first() {
            let violation = InvariantViolation::PairBusy {
                pair: self.pair_name.clone(),
                holder: other.id.clone(),
            };
            error!(pair = %self.pair_name, error = %violation, "Rejected deployment");
            return Err(violation.into());
        }

        let id = generate_id("dep");
        let record = {
            let mut pair = self.pair.lock();
            if let Err(violation) = pair.acquire(&id) {
                error!(pair = %self.pair_name, error = %violation, "Rejected deployment");
                return Err(violation.into());
            }
            let from = pair.active_color();
            DeploymentRecord::new(
                &id,
                pair.name(),
                target,
                pair.slot(from).running_revision.clone(),
                from,
                self.config.canary_steps.clone(),
            )
        };

        if let Err(e) = self.store.save(&record).await {
            let _ = self.pair.lock().release(&id);
            return Err(e);
        }

        info!(
            deployment_id = %record.id,
            pair = %record.pair,
            revision = %record.target_revision,
            from = %record.from_color,
            to = %record.to_color,
            "Deployment started"
        );
        FlowEvent::deployment_started(
            &record.id,
            &record.pair,
            &record.target_revision.image_reference,
            &record.to_color.to_string(),
        )
        .emit_to(self.event_sink.as_ref());

        self.drive(record, cancel).await
    }

    /// Picks up a persisted deployment after a controller restart.
    ///
    /// The traffic split implied by the record's `(phase, steps_applied)` is
    /// re-applied before the phase continues. Terminal records are returned
    /// as they are.
    pub async fn resume(
        &self,
        deployment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutcome, DeployflowError> {
        let record = self
            .store
            .load(deployment_id)
            .await?
            .ok_or_else(|| DeployflowError::DeploymentNotFound(deployment_id.to_string()))?;

        if record.is_terminal() {
            return Ok(DeploymentOutcome::from_terminal(record));
        }
        if record.pair != self.pair_name {
            return Err(InvariantViolation::NotOwner {
                pair: self.pair_name.clone(),
                issuer: record.id,
            }
            .into());
        }

        self.pair.lock().acquire(&record.id)?;
        info!(
            deployment_id = %record.id,
            pair = %record.pair,
            phase = %record.phase,
            steps_applied = record.steps_applied,
            "Resuming deployment"
        );
        FlowEvent::deployment_resumed(
            &record.id,
            &record.pair,
            &record.phase.to_string(),
            record.steps_applied,
        )
        .emit_to(self.event_sink.as_ref());

        if record.phase != DeploymentPhase::Initializing {
            self.restore_new_slot(&record)?;
            self.shift_new_slot(&record, record.new_slot_weight()).await?;
        }
        self.drive(record, cancel).await
    }

    /// Puts the target revision back on the new slot of a pair that was
    /// rebuilt without it.
    fn restore_new_slot(&self, record: &DeploymentRecord) -> Result<(), InvariantViolation> {
        let mut pair = self.pair.lock();
        if pair.inactive_color() != record.to_color
            || pair.slot(record.to_color).running_revision.is_some()
        {
            return Ok(());
        }
        pair.place_revision(&record.id, record.to_color, record.target_revision.clone())?;
        debug!(
            deployment_id = %record.id,
            pair = %record.pair,
            color = %record.to_color,
            revision = %record.target_revision,
            "Restored target revision on new slot"
        );
        Ok(())
    }

    async fn drive(
        &self,
        mut record: DeploymentRecord,
        cancel: &CancellationToken,
    ) -> Result<DeploymentOutcome, DeployflowError> {
        let mut unknown = UnknownTracker::new();

        loop {
            let step = match record.phase {
                DeploymentPhase::Initializing => self.initialize(&mut record, cancel).await,
                DeploymentPhase::CanaryShifting => {
                    self.shift(&mut record, cancel, &mut unknown).await
                }
                DeploymentPhase::Baking => self.bake(&mut record, cancel, &mut unknown).await,
                DeploymentPhase::Finalizing => self.finalize(&mut record, cancel).await,
                DeploymentPhase::RollingBack => self.roll_back(&mut record).await,
                DeploymentPhase::Completed | DeploymentPhase::RolledBack => break,
            };
            if let Err(e) = step {
                error!(
                    deployment_id = %record.id,
                    pair = %record.pair,
                    phase = %record.phase,
                    error = %e,
                    "Deployment halted; pair stays held until the deployment is resumed"
                );
                return Err(e);
            }
        }

        self.pair.lock().release(&record.id)?;

        match &record.rollback_reason {
            Some(reason) if !record.succeeded() => {
                warn!(
                    deployment_id = %record.id,
                    pair = %record.pair,
                    reason = %reason,
                    "Deployment rolled back"
                );
                FlowEvent::deployment_rolled_back(
                    &record.id,
                    &record.pair,
                    &reason.kind().to_string(),
                    &reason.to_string(),
                )
                .emit_to(self.event_sink.as_ref());
            }
            _ => {
                info!(
                    deployment_id = %record.id,
                    pair = %record.pair,
                    active = %record.to_color,
                    "Deployment completed"
                );
                FlowEvent::deployment_completed(
                    &record.id,
                    &record.pair,
                    &record.to_color.to_string(),
                )
                .emit_to(self.event_sink.as_ref());
            }
        }

        Ok(DeploymentOutcome::from_terminal(record))
    }

    async fn enter(
        &self,
        record: &mut DeploymentRecord,
        next: DeploymentPhase,
    ) -> Result<(), DeployflowError> {
        let from = record.phase;
        record.transition_to(next)?;
        self.persist_transition(record, from).await
    }

    async fn enter_rollback(
        &self,
        record: &mut DeploymentRecord,
        reason: RollbackReason,
    ) -> Result<(), DeployflowError> {
        let from = record.phase;
        warn!(
            deployment_id = %record.id,
            pair = %record.pair,
            phase = %from,
            reason = %reason,
            "Rolling back deployment"
        );
        record.begin_rollback(reason)?;
        self.persist_transition(record, from).await
    }

    async fn persist_transition(
        &self,
        record: &DeploymentRecord,
        from: DeploymentPhase,
    ) -> Result<(), DeployflowError> {
        self.store.save(record).await?;
        info!(
            deployment_id = %record.id,
            pair = %record.pair,
            from = %from,
            to = %record.phase,
            "Deployment phase changed"
        );
        FlowEvent::phase_changed(
            &record.id,
            &record.pair,
            &from.to_string(),
            &record.phase.to_string(),
        )
        .emit_to(self.event_sink.as_ref());
        Ok(())
    }

    /// Moves the new slot to `weight` and the original slot to the
    /// complement, on the pair and on the router.
    ///
    /// The new slot's weight only rises outside `RollingBack` and only
    /// falls inside it.
    async fn shift_new_slot(
        &self,
        record: &DeploymentRecord,
        weight: u8,
    ) -> Result<TrafficSplit, DeployflowError> {
        let split = TrafficSplit::with_weight_on(record.to_color, weight);
        {
            let pair = self.pair.lock();
            if pair.owner() != Some(record.id.as_str()) {
                return Err(InvariantViolation::NotOwner {
                    pair: self.pair_name.clone(),
                    issuer: record.id.clone(),
                }
                .into());
            }
            let current = pair.slot(record.to_color).traffic_weight;
            let rolling_back = record.phase == DeploymentPhase::RollingBack;
            if (rolling_back && weight > current) || (!rolling_back && weight < current) {
                return Err(InvariantViolation::NonMonotonicWeight {
                    from: current,
                    to: weight,
                    phase: record.phase.to_string(),
                }
                .into());
            }
        }

        self.router.apply(&record.pair, split).await?;
        self.pair.lock().set_split(&record.id, split)?;

        info!(
            deployment_id = %record.id,
            pair = %record.pair,
            blue = split.blue(),
            green = split.green(),
            "Traffic weights changed"
        );
        FlowEvent::weights_changed(&record.id, &record.pair, split.blue(), split.green())
            .emit_to(self.event_sink.as_ref());
        Ok(split)
    }

    async fn initialize(
        &self,
        record: &mut DeploymentRecord,
        cancel: &CancellationToken,
    ) -> Result<(), DeployflowError> {
        let color = record.to_color;
        self.pair
            .lock()
            .place_revision(&record.id, color, record.target_revision.clone())?;

        let ready = match self
            .provisioner
            .provision(&record.pair, color, &record.target_revision)
            .await
        {
            Ok(()) => self.await_ready(record).await,
            Err(e) => Err(e),
        };

        match ready {
            Ok(()) => {
                if let Some(reason) = cancel_reason(cancel) {
                    info!(
                        deployment_id = %record.id,
                        "Cancel requested while initializing; cleaning up the new slot"
                    );
                    return self.abandon_initialization(record, reason).await;
                }
                info!(deployment_id = %record.id, color = %color, "New slot is ready");
                self.enter(record, DeploymentPhase::CanaryShifting).await
            }
            Err(e) => {
                warn!(deployment_id = %record.id, error = %e, "New slot failed to start");
                let reason = RollbackReason::ProvisioningError { message: e.message };
                self.abandon_initialization(record, reason).await
            }
        }
    }

    async fn await_ready(&self, record: &DeploymentRecord) -> Result<(), ProvisioningError> {
        let timeout = self.config.startup_timeout();
        let interval = self.config.readiness_poll_interval();
        let deadline = Instant::now() + timeout;

        loop {
            match self.provisioner.readiness(&record.pair, record.to_color).await {
                Readiness::Ready => return Ok(()),
                Readiness::Failed(message) => {
                    return Err(ProvisioningError::new(record.to_color, message))
                }
                Readiness::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisioningError::new(
                    record.to_color,
                    format!("slot not ready within {}s startup timeout", timeout.as_secs()),
                ));
            }
            tokio::time::sleep_until(deadline.min(now + interval)).await;
        }
    }

    /// Nothing was exposed yet: release the slot and end as `RolledBack`.
    async fn abandon_initialization(
        &self,
        record: &mut DeploymentRecord,
        reason: RollbackReason,
    ) -> Result<(), DeployflowError> {
        self.release_slot(record, record.to_color).await?;
        self.enter_rollback(record, reason).await
    }

    async fn shift(
        &self,
        record: &mut DeploymentRecord,
        cancel: &CancellationToken,
        unknown: &mut UnknownTracker,
    ) -> Result<(), DeployflowError> {
        // Resumed mid-schedule: the live step's hold starts over.
        if let Some(step) = record
            .steps_applied
            .checked_sub(1)
            .and_then(|i| record.traffic_schedule.get(i).copied())
        {
            if let Watch::Rollback(reason) =
                self.watch(record, step.hold_duration(), cancel, unknown).await?
            {
                return self.enter_rollback(record, reason).await;
            }
        }

        while let Some(step) = record.traffic_schedule.get(record.steps_applied).copied() {
            if let Some(reason) = pending_cancel(record, cancel) {
                return self.enter_rollback(record, reason).await;
            }

            // The step index is persisted before traffic moves, so a restart
            // never sees more traffic on the new slot than the record implies.
            record.steps_applied += 1;
            self.store.save(record).await?;
            self.shift_new_slot(record, step.weight_percent).await?;

            debug!(
                deployment_id = %record.id,
                step = record.steps_applied,
                weight = step.weight_percent,
                hold_seconds = step.hold_seconds,
                "Holding canary step"
            );
            if let Watch::Rollback(reason) =
                self.watch(record, step.hold_duration(), cancel, unknown).await?
            {
                return self.enter_rollback(record, reason).await;
            }
        }

        record.bake_deadline = Some(add_duration(Utc::now(), self.config.bake_duration()));
        self.enter(record, DeploymentPhase::Baking).await
    }

    async fn bake(
        &self,
        record: &mut DeploymentRecord,
        cancel: &CancellationToken,
        unknown: &mut UnknownTracker,
    ) -> Result<(), DeployflowError> {
        let window = record
            .bake_deadline
            .map_or_else(|| self.config.bake_duration(), remaining_until);

        if let Watch::Rollback(reason) = self.watch(record, window, cancel, unknown).await? {
            return self.enter_rollback(record, reason).await;
        }

        let policy = &self.config.health;
        let now = Instant::now();
        if policy.unknown_policy == UnknownPolicy::Strict
            && unknown.exceeded(policy.unknown_grace_period(), now)
        {
            let unknown_for = unknown.unknown_for(now).unwrap_or_default();
            let reason = RollbackReason::TimeoutExceeded {
                unknown_for_seconds: unknown_for.as_secs(),
            };
            return self.enter_rollback(record, reason).await;
        }

        self.enter(record, DeploymentPhase::Finalizing).await
    }

    /// Polls health until `window` elapses, a rollback-worthy signal
    /// arrives, or the deployment is cancelled.
    async fn watch(
        &self,
        record: &DeploymentRecord,
        window: Duration,
        cancel: &CancellationToken,
        unknown: &mut UnknownTracker,
    ) -> Result<Watch, DeployflowError> {
        let deadline = Instant::now() + window;
        let interval = self.config.health.poll_interval();

        loop {
            if let Some(reason) = pending_cancel(record, cancel) {
                return Ok(Watch::Rollback(reason));
            }

            let observation = self
                .health
                .current_health(&record.pair, record.to_color)
                .await;
            let now = Instant::now();
            unknown.observe(observation.status, now);
            self.pair
                .lock()
                .record_health(&record.id, record.to_color, observation.status)?;

            if let Some(reason) = self.judge(record, &observation) {
                return Ok(Watch::Rollback(reason));
            }
            if now >= deadline {
                return Ok(Watch::Clear);
            }

            tokio::select! {
                () = tokio::time::sleep_until(deadline.min(now + interval)) => {}
                () = cancel.cancelled() => {}
            }
        }
    }

    fn judge(
        &self,
        record: &DeploymentRecord,
        observation: &HealthObservation,
    ) -> Option<RollbackReason> {
        if observation.status != HealthStatus::Unhealthy {
            return None;
        }
        match &observation.source {
            HealthSource::Alarm { name } if !self.config.auto_rollback_on_alarm => {
                warn!(
                    deployment_id = %record.id,
                    alarm = %name,
                    "Alarm fired but automatic rollback on alarms is disabled"
                );
                None
            }
            source => Some(RollbackReason::HealthCheckFailure {
                source: source.clone(),
                detail: observation.detail.clone(),
            }),
        }
    }

    async fn finalize(
        &self,
        record: &mut DeploymentRecord,
        cancel: &CancellationToken,
    ) -> Result<(), DeployflowError> {
        if let Some(reason) = cancel.reason() {
            info!(deployment_id = %record.id, "Cancel requested while finalizing; completing anyway");
            record.cancel_requested = Some(reason);
        }

        self.shift_new_slot(record, 100).await?;
        let retired = record.from_color;
        {
            let mut pair = self.pair.lock();
            if pair.active_color() != record.to_color {
                pair.swap_active(&record.id)?;
            }
            pair.mark_for_teardown(&record.id, retired)?;
        }
        self.release_slot(record, retired).await?;
        self.enter(record, DeploymentPhase::Completed).await
    }

    async fn roll_back(&self, record: &mut DeploymentRecord) -> Result<(), DeployflowError> {
        self.apply_rollback(record).await?;
        self.enter(record, DeploymentPhase::RolledBack).await
    }

    /// Forces all traffic back onto the original slot and releases the new
    /// one, without changing the record's phase.
    ///
    /// Applying it again yields the same weights and slot contents.
    pub async fn apply_rollback(&self, record: &DeploymentRecord) -> Result<(), DeployflowError> {
        if record.phase != DeploymentPhase::RollingBack {
            return Err(InvariantViolation::IllegalTransition {
                deployment: record.id.clone(),
                from: record.phase.to_string(),
                to: DeploymentPhase::RollingBack.to_string(),
            }
            .into());
        }
        self.shift_new_slot(record, 0).await?;
        self.release_slot(record, record.to_color).await
    }

    async fn release_slot(
        &self,
        record: &DeploymentRecord,
        color: Color,
    ) -> Result<(), DeployflowError> {
        let released = self.pair.lock().teardown(&record.id, color)?;
        if let Err(e) = self.provisioner.teardown(&record.pair, color).await {
            warn!(
                deployment_id = %record.id,
                color = %color,
                error = %e,
                "Slot teardown failed; resources may need manual cleanup"
            );
        }
        if let Some(revision) = released {
            info!(deployment_id = %record.id, color = %color, revision = %revision, "Slot torn down");
        }
        Ok(())
    }
}
