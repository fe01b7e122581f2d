//! Observable events emitted by the engine and the deployment controller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::events::EventSink;

/// Event type names.
pub mod names {
    /// An execution was created.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// Every stage succeeded.
    pub const PIPELINE_SUCCEEDED: &str = "pipeline.succeeded";
    /// A stage failed and the execution halted.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A stage began running.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage succeeded.
    pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A deployment record was created.
    pub const DEPLOYMENT_STARTED: &str = "deployment.started";
    /// A deployment moved to another phase.
    pub const DEPLOYMENT_PHASE_CHANGED: &str = "deployment.phase_changed";
    /// Traffic weights on a pair changed.
    pub const DEPLOYMENT_WEIGHTS_CHANGED: &str = "deployment.weights_changed";
    /// A deployment reached `Completed`.
    pub const DEPLOYMENT_COMPLETED: &str = "deployment.completed";
    /// A deployment reached `RolledBack`.
    pub const DEPLOYMENT_ROLLED_BACK: &str = "deployment.rolled_back";
    /// A non-terminal deployment was picked up again after a restart.
    pub const DEPLOYMENT_RESUMED: &str = "deployment.resumed";
}

/// An event emitted for external consumption (dashboards, notifications).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    /// The event type (e.g., "deployment.phase_changed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl FlowEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the payload as a JSON object.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> =
            self.data.clone().into_iter().collect();
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp));
        serde_json::Value::Object(map)
    }

    /// Hands the event to a sink without blocking.
    pub fn emit_to(&self, sink: &dyn EventSink) {
        sink.try_emit(&self.event_type, Some(self.payload()));
    }

    /// Creates a "pipeline.started" event.
    #[must_use]
    pub fn pipeline_started(execution_id: &str, pipeline: &str, source_revision: &str) -> Self {
        Self::new(names::PIPELINE_STARTED)
            .add_data("execution_id", serde_json::json!(execution_id))
            .add_data("pipeline", serde_json::json!(pipeline))
            .add_data("source_revision", serde_json::json!(source_revision))
    }

    /// Creates a "pipeline.succeeded" or "pipeline.failed" event.
    #[must_use]
    pub fn pipeline_finished(execution_id: &str, pipeline: &str, succeeded: bool) -> Self {
        let name = if succeeded {
            names::PIPELINE_SUCCEEDED
        } else {
            names::PIPELINE_FAILED
        };
        Self::new(name)
            .add_data("execution_id", serde_json::json!(execution_id))
            .add_data("pipeline", serde_json::json!(pipeline))
    }

    /// Creates a "stage.started" event.
    #[must_use]
    pub fn stage_started(execution_id: &str, stage: &str) -> Self {
        Self::new(names::STAGE_STARTED)
            .add_data("execution_id", serde_json::json!(execution_id))
            .add_data("stage", serde_json::json!(stage))
    }

    /// Creates a "stage.succeeded" event.
    #[must_use]
    pub fn stage_succeeded(execution_id: &str, stage: &str, duration_ms: f64) -> Self {
        Self::new(names::STAGE_SUCCEEDED)
            .add_data("execution_id", serde_json::json!(execution_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "stage.failed" event.
    #[must_use]
    pub fn stage_failed(execution_id: &str, stage: &str, error: &str) -> Self {
        Self::new(names::STAGE_FAILED)
            .add_data("execution_id", serde_json::json!(execution_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("error", serde_json::json!(error))
    }

    /// Creates a "deployment.started" event.
    #[must_use]
    pub fn deployment_started(deployment_id: &str, pair: &str, revision: &str, to_color: &str) -> Self {
        Self::new(names::DEPLOYMENT_STARTED)
            .add_data("deployment_id", serde_json::json!(deployment_id))
            .add_data("pair", serde_json::json!(pair))
            .add_data("revision", serde_json::json!(revision))
            .add_data("to_color", serde_json::json!(to_color))
    }

    /// Creates a "deployment.resumed" event.
    #[must_use]
    pub fn deployment_resumed(deployment_id: &str, pair: &str, phase: &str, steps_applied: usize) -> Self {
        Self::new(names::DEPLOYMENT_RESUMED)
            .add_data("deployment_id", serde_json::json!(deployment_id))
            .add_data("pair", serde_json::json!(pair))
            .add_data("phase", serde_json::json!(phase))
            .add_data("steps_applied", serde_json::json!(steps_applied))
    }

    /// Creates a "deployment.completed" event.
    #[must_use]
    pub fn deployment_completed(deployment_id: &str, pair: &str, active_color: &str) -> Self {
        Self::new(names::DEPLOYMENT_COMPLETED)
            .add_data("deployment_id", serde_json::json!(deployment_id))
            .add_data("pair", serde_json::json!(pair))
            .add_data("active_color", serde_json::json!(active_color))
    }

    /// Creates a "deployment.rolled_back" event.
    #[must_use]
    pub fn deployment_rolled_back(deployment_id: &str, pair: &str, kind: &str, reason: &str) -> Self {
        Self::new(names::DEPLOYMENT_ROLLED_BACK)
            .add_data("deployment_id", serde_json::json!(deployment_id))
            .add_data("pair", serde_json::json!(pair))
            .add_data("kind", serde_json::json!(kind))
            .add_data("reason", serde_json::json!(reason))
    }

    /// Creates a "deployment.phase_changed" event.
    #[must_use]
    pub fn phase_changed(deployment_id: &str, pair: &str, from: &str, to: &str) -> Self {
        Self::new(names::DEPLOYMENT_PHASE_CHANGED)
            .add_data("deployment_id", serde_json::json!(deployment_id))
            .add_data("pair", serde_json::json!(pair))
            .add_data("from", serde_json::json!(from))
            .add_data("to", serde_json::json!(to))
    }

    /// Creates a "deployment.weights_changed" event.
    #[must_use]
    pub fn weights_changed(deployment_id: &str, pair: &str, blue: u8, green: u8) -> Self {
        Self::new(names::DEPLOYMENT_WEIGHTS_CHANGED)
            .add_data("deployment_id", serde_json::json!(deployment_id))
            .add_data("pair", serde_json::json!(pair))
            .add_data("blue", serde_json::json!(blue))
            .add_data("green", serde_json::json!(green))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    #[test]
    fn test_event_creation() {
        let event = FlowEvent::new("test.event");
        assert_eq!(event.event_type, "test.event");
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_phase_changed_payload() {
        let event = FlowEvent::phase_changed("d-1", "nginx", "baking", "finalizing");
        let payload = event.payload();
        assert_eq!(payload["from"], "baking");
        assert_eq!(payload["to"], "finalizing");
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn test_rolled_back_payload() {
        let event = FlowEvent::deployment_rolled_back("d-1", "nginx", "HealthCheckFailure", "5xx");
        assert_eq!(event.event_type, names::DEPLOYMENT_ROLLED_BACK);
        assert_eq!(event.payload()["kind"], "HealthCheckFailure");
    }

    #[test]
    fn test_pipeline_finished_name() {
        assert_eq!(FlowEvent::pipeline_finished("e", "p", true).event_type, names::PIPELINE_SUCCEEDED);
        assert_eq!(FlowEvent::pipeline_finished("e", "p", false).event_type, names::PIPELINE_FAILED);
    }

    #[test]
    fn test_emit_to_sink() {
        let sink = CollectingEventSink::new();
        FlowEvent::weights_changed("d-1", "nginx", 90, 10).emit_to(&sink);

        let events = sink.events_of_type("deployment.weights");
        assert_eq!(events.len(), 1);
        let data = events[0].1.as_ref().unwrap();
        assert_eq!(data["green"], 10);
    }
}
