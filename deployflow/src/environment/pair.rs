//! The blue/green environment pair a deployment switches traffic between.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::TrafficSplit;
use crate::core::{Color, Revision};
use crate::errors::InvariantViolation;
use crate::health::HealthStatus;

/// A pair shared between the controller and whoever inspects it.
///
/// Never hold the lock across an await point.
pub type SharedPair = Arc<Mutex<TargetEnvironmentPair>>;

/// One of the two routable environments of a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSlot {
    /// Slot color.
    pub color: Color,
    /// Revision currently running on the slot, if any.
    pub running_revision: Option<Revision>,
    /// Share of traffic routed to the slot.
    pub traffic_weight: u8,
    /// Last health reading for the slot.
    pub health: HealthStatus,
    /// Set once the slot has been superseded and is waiting to be released.
    pub pending_teardown: bool,
}

impl EnvironmentSlot {
    fn empty(color: Color) -> Self {
        Self {
            color,
            running_revision: None,
            traffic_weight: 0,
            health: HealthStatus::Unknown,
            pending_teardown: false,
        }
    }

    /// Returns true if nothing runs on the slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.running_revision.is_none()
    }
}

/// Blue and green slots plus the steady-state active color.
///
/// Every mutation is issued on behalf of a deployment and requires that
/// deployment to hold the pair (see [`acquire`](Self::acquire)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEnvironmentPair {
    name: String,
    blue: EnvironmentSlot,
    green: EnvironmentSlot,
    active_color: Color,
    owner: Option<String>,
}

impl TargetEnvironmentPair {
    /// Creates a pair with `revision` serving all traffic on `active`.
    #[must_use]
    pub fn new(name: impl Into<String>, active: Color, revision: Option<Revision>) -> Self {
        let mut pair = Self {
            name: name.into(),
            blue: EnvironmentSlot::empty(Color::Blue),
            green: EnvironmentSlot::empty(Color::Green),
            active_color: active,
            owner: None,
        };
        let slot = pair.slot_mut(active);
        slot.running_revision = revision;
        slot.traffic_weight = 100;
        pair
    }

    /// Wraps the pair for sharing.
    #[must_use]
    pub fn shared(self) -> SharedPair {
        Arc::new(Mutex::new(self))
    }

    /// Pair name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The steady-state active color.
    #[must_use]
    pub fn active_color(&self) -> Color {
        self.active_color
    }

    /// The color that receives new revisions.
    #[must_use]
    pub fn inactive_color(&self) -> Color {
        self.active_color.other()
    }

    /// Deployment currently holding the pair.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns the slot of `color`.
    #[must_use]
    pub fn slot(&self, color: Color) -> &EnvironmentSlot {
        match color {
            Color::Blue => &self.blue,
            Color::Green => &self.green,
        }
    }

    fn slot_mut(&mut self, color: Color) -> &mut EnvironmentSlot {
        match color {
            Color::Blue => &mut self.blue,
            Color::Green => &mut self.green,
        }
    }

    /// Returns the active slot.
    #[must_use]
    pub fn active_slot(&self) -> &EnvironmentSlot {
        self.slot(self.active_color)
    }

    /// Current traffic split.
    #[must_use]
    pub fn split(&self) -> TrafficSplit {
        TrafficSplit::with_weight_on(Color::Blue, self.blue.traffic_weight)
    }

    /// Returns true when no deployment holds the pair and the active slot
    /// carries all traffic.
    #[must_use]
    pub fn is_steady(&self) -> bool {
        self.owner.is_none() && self.active_slot().traffic_weight == 100
    }

    /// Takes exclusive ownership of the pair for `deployment_id`.
    ///
    /// Re-acquiring by the current owner is allowed.
    pub fn acquire(&mut self, deployment_id: &str) -> Result<(), InvariantViolation> {
        match self.owner.as_deref() {
            Some(holder) if holder != deployment_id => Err(InvariantViolation::PairBusy {
                pair: self.name.clone(),
                holder: holder.to_string(),
            }),
            _ => {
                self.owner = Some(deployment_id.to_string());
                Ok(())
            }
        }
    }

    /// Gives up ownership. Releasing a pair held by someone else fails.
    pub fn release(&mut self, deployment_id: &str) -> Result<(), InvariantViolation> {
        self.check_owner(deployment_id)?;
        self.owner = None;
        Ok(())
    }

    fn check_owner(&self, issuer: &str) -> Result<(), InvariantViolation> {
        if self.owner.as_deref() == Some(issuer) {
            Ok(())
        } else {
            Err(InvariantViolation::NotOwner {
                pair: self.name.clone(),
                issuer: issuer.to_string(),
            })
        }
    }

    fn check_inactive(&self, color: Color, action: &str) -> Result<(), InvariantViolation> {
        if color == self.active_color {
            Err(InvariantViolation::ActiveSlot {
                pair: self.name.clone(),
                color,
                action: action.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Sets both weights at once.
    pub fn set_weights(
        &mut self,
        issuer: &str,
        blue: u8,
        green: u8,
    ) -> Result<TrafficSplit, InvariantViolation> {
        self.check_owner(issuer)?;
        let split = TrafficSplit::new(blue, green)?;
        self.apply_split(split);
        Ok(split)
    }

    /// Sets both weights from an already validated split.
    pub fn set_split(&mut self, issuer: &str, split: TrafficSplit) -> Result<(), InvariantViolation> {
        self.check_owner(issuer)?;
        self.apply_split(split);
        Ok(())
    }

    fn apply_split(&mut self, split: TrafficSplit) {
        self.blue.traffic_weight = split.blue();
        self.green.traffic_weight = split.green();
        debug!(pair = %self.name, %split, "Applied traffic split");
    }

    /// Flips the steady-state active color.
    ///
    /// Only valid once the inactive slot already carries all traffic.
    pub fn swap_active(&mut self, issuer: &str) -> Result<Color, InvariantViolation> {
        self.check_owner(issuer)?;
        let incoming = self.inactive_color();
        let weight = self.slot(incoming).traffic_weight;
        if weight != 100 {
            return Err(InvariantViolation::PrematureSwap {
                pair: self.name.clone(),
                weight,
            });
        }
        self.active_color = incoming;
        Ok(incoming)
    }

    /// Installs `revision` on the inactive slot with no traffic.
    pub fn place_revision(
        &mut self,
        issuer: &str,
        color: Color,
        revision: Revision,
    ) -> Result<(), InvariantViolation> {
        self.check_owner(issuer)?;
        self.check_inactive(color, "place a revision on")?;
        let slot = self.slot_mut(color);
        if slot.traffic_weight != 0 {
            return Err(InvariantViolation::NonMonotonicWeight {
                from: slot.traffic_weight,
                to: 0,
                phase: "initializing".to_string(),
            });
        }
        slot.running_revision = Some(revision);
        slot.health = HealthStatus::Unknown;
        slot.pending_teardown = false;
        Ok(())
    }

    /// Records the latest health reading of a slot.
    pub fn record_health(
        &mut self,
        issuer: &str,
        color: Color,
        health: HealthStatus,
    ) -> Result<(), InvariantViolation> {
        self.check_owner(issuer)?;
        self.slot_mut(color).health = health;
        Ok(())
    }

    /// Marks the inactive slot as superseded.
    pub fn mark_for_teardown(&mut self, issuer: &str, color: Color) -> Result<(), InvariantViolation> {
        self.check_owner(issuer)?;
        self.check_inactive(color, "mark for teardown")?;
        self.slot_mut(color).pending_teardown = true;
        Ok(())
    }

    /// Releases the inactive slot. Returns the revision that was running,
    /// or `None` if the slot was already empty.
    pub fn teardown(&mut self, issuer: &str, color: Color) -> Result<Option<Revision>, InvariantViolation> {
        self.check_owner(issuer)?;
        self.check_inactive(color, "tear down")?;
        let weight = self.slot(color).traffic_weight;
        if weight != 0 {
            return Err(InvariantViolation::ActiveSlot {
                pair: self.name.clone(),
                color,
                action: format!("tear down (weight {weight})"),
            });
        }
        let slot = self.slot_mut(color);
        let released = slot.running_revision.take();
        slot.health = HealthStatus::Unknown;
        slot.pending_teardown = false;
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskSpec;

    fn revision(tag: &str) -> Revision {
        Revision::new(format!("nginx:{tag}"), TaskSpec::default()).unwrap()
    }

    fn held_pair() -> TargetEnvironmentPair {
        let mut pair = TargetEnvironmentPair::new("nginx", Color::Blue, Some(revision("1")));
        pair.acquire("d-1").unwrap();
        pair
    }

    #[test]
    fn test_new_pair_is_steady() {
        let pair = TargetEnvironmentPair::new("nginx", Color::Blue, Some(revision("1")));
        assert!(pair.is_steady());
        assert_eq!(pair.split(), TrafficSplit::all_to(Color::Blue));
        assert_eq!(pair.inactive_color(), Color::Green);
        assert!(pair.slot(Color::Green).is_empty());
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let mut pair = held_pair();
        assert!(pair.acquire("d-1").is_ok());
        assert_eq!(
            pair.acquire("d-2").unwrap_err(),
            InvariantViolation::PairBusy {
                pair: "nginx".to_string(),
                holder: "d-1".to_string()
            }
        );
        assert!(pair.release("d-2").is_err());
        pair.release("d-1").unwrap();
        assert!(pair.acquire("d-2").is_ok());
    }

    #[test]
    fn test_set_weights_requires_sum_and_owner() {
        let mut pair = held_pair();
        let before = pair.clone();
        assert!(matches!(
            pair.set_weights("d-1", 50, 40),
            Err(InvariantViolation::WeightSum { .. })
        ));
        assert!(matches!(
            pair.set_weights("d-2", 90, 10),
            Err(InvariantViolation::NotOwner { .. })
        ));
        assert_eq!(pair, before);

        pair.set_weights("d-1", 90, 10).unwrap();
        assert_eq!(pair.slot(Color::Green).traffic_weight, 10);
    }

    #[test]
    fn test_swap_requires_full_weight() {
        let mut pair = held_pair();
        pair.place_revision("d-1", Color::Green, revision("2")).unwrap();
        pair.set_weights("d-1", 90, 10).unwrap();
        assert!(matches!(
            pair.swap_active("d-1"),
            Err(InvariantViolation::PrematureSwap { weight: 10, .. })
        ));

        pair.set_weights("d-1", 0, 100).unwrap();
        assert_eq!(pair.swap_active("d-1").unwrap(), Color::Green);
        assert_eq!(pair.active_color(), Color::Green);
    }

    #[test]
    fn test_teardown_only_inactive() {
        let mut pair = held_pair();
        assert!(matches!(
            pair.teardown("d-1", Color::Blue),
            Err(InvariantViolation::ActiveSlot { color: Color::Blue, .. })
        ));

        pair.place_revision("d-1", Color::Green, revision("2")).unwrap();
        assert_eq!(pair.teardown("d-1", Color::Green).unwrap(), Some(revision("2")));
        assert_eq!(pair.teardown("d-1", Color::Green).unwrap(), None);
    }

    #[test]
    fn test_teardown_rejects_weighted_slot() {
        let mut pair = held_pair();
        pair.place_revision("d-1", Color::Green, revision("2")).unwrap();
        pair.set_weights("d-1", 90, 10).unwrap();
        let err = pair.teardown("d-1", Color::Green).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::ActiveSlot {
                pair: "nginx".to_string(),
                color: Color::Green,
                action: "tear down (weight 10)".to_string(),
            }
        );
        assert!(pair.slot(Color::Green).running_revision.is_some());
    }

    #[test]
    fn test_place_revision_rejects_active() {
        let mut pair = held_pair();
        assert!(pair.place_revision("d-1", Color::Blue, revision("2")).is_err());
    }
}
