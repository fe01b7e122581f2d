//! Health signals consumed by the deployment controller.
//!
//! The monitor itself is an external collaborator; this module defines the
//! interface and the rules for turning observations into rollback decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::{Duration, Instant};

use crate::core::Color;

/// Health of a slot as reported by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Evidence that the slot is serving correctly.
    Healthy,
    /// Evidence that the slot is failing.
    Unhealthy,
    /// No evidence yet.
    #[default]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Where a health signal came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum HealthSource {
    /// Target health checks against the slot.
    #[default]
    HealthCheck,
    /// A metric alarm.
    Alarm {
        /// Alarm name.
        name: String,
    },
}

impl fmt::Display for HealthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HealthCheck => write!(f, "health check"),
            Self::Alarm { name } => write!(f, "alarm '{name}'"),
        }
    }
}

/// A single reading from the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthObservation {
    /// Reported status.
    pub status: HealthStatus,
    /// Signal source.
    #[serde(default)]
    pub source: HealthSource,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the reading was taken.
    pub observed_at: DateTime<Utc>,
}

impl HealthObservation {
    /// Creates an observation from the health-check source.
    #[must_use]
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            source: HealthSource::HealthCheck,
            detail: None,
            observed_at: Utc::now(),
        }
    }

    /// A healthy health-check reading.
    #[must_use]
    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    /// An unhealthy health-check reading.
    #[must_use]
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy).with_detail(detail)
    }

    /// A reading with no evidence.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(HealthStatus::Unknown)
    }

    /// A firing alarm.
    #[must_use]
    pub fn alarm(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source: HealthSource::Alarm { name: name.into() },
            ..Self::unhealthy(detail)
        }
    }

    /// Sets the detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Supplies health readings for the slots of an environment pair.
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Returns the current health of `color` on `pair`.
    async fn current_health(&self, pair: &str, color: Color) -> HealthObservation;
}

/// Tracks how long health has been continuously `Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownTracker {
    since: Option<Instant>,
}

impl UnknownTracker {
    /// Creates a tracker with no unknown streak.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a status read at `now`.
    pub fn observe(&mut self, status: HealthStatus, now: Instant) {
        match status {
            HealthStatus::Unknown => {
                self.since.get_or_insert(now);
            }
            HealthStatus::Healthy | HealthStatus::Unhealthy => self.since = None,
        }
    }

    /// Returns how long the current unknown streak has lasted.
    #[must_use]
    pub fn unknown_for(&self, now: Instant) -> Option<Duration> {
        self.since.map(|since| now.saturating_duration_since(since))
    }

    /// Returns true if health has been unknown for at least `grace`.
    #[must_use]
    pub fn exceeded(&self, grace: Duration, now: Instant) -> bool {
        self.unknown_for(now).is_some_and(|elapsed| elapsed >= grace)
    }
}
