//! In-memory stores backed by `DashMap`.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{DeploymentStore, ExecutionStore};
use crate::deployment::DeploymentRecord;
use crate::errors::{DeployflowError, InvariantViolation};
use crate::pipeline::PipelineExecution;

/// Executions kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: DashMap<String, PipelineExecution>,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executions.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: &PipelineExecution) -> Result<(), DeployflowError> {
        if let Some(existing) = self.executions.get(&execution.id) {
            if existing.status.is_terminal() && *existing != *execution {
                return Err(InvariantViolation::TerminalRecord(execution.id.clone()).into());
            }
        }
        self.executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<PipelineExecution>, DeployflowError> {
        Ok(self.executions.get(id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<PipelineExecution>, DeployflowError> {
        let mut all: Vec<_> = self.executions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.created_at);
        Ok(all)
    }
}

/// Deployment records kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryDeploymentStore {
    records: DashMap<String, DeploymentRecord>,
}

impl InMemoryDeploymentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeployflowError> {
        if let Some(existing) = self.records.get(&record.id) {
            if existing.is_terminal() && *existing != *record {
                return Err(InvariantViolation::TerminalRecord(record.id.clone()).into());
            }
        }
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<DeploymentRecord>, DeployflowError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>, DeployflowError> {
        let mut all: Vec<_> = self.records.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.started_at);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Color, Revision, TaskSpec};
    use crate::deployment::{DeploymentPhase, RollbackReason};

    fn record(id: &str, pair: &str) -> DeploymentRecord {
        DeploymentRecord::new(
            id,
            pair,
            Revision::new("nginx:2", TaskSpec::default()).unwrap(),
            None,
            Color::Blue,
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryDeploymentStore::new();
        store.save(&record("d-1", "nginx")).await.unwrap();

        let loaded = store.load("d-1").await.unwrap().unwrap();
        assert_eq!(loaded.phase, DeploymentPhase::Initializing);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_flight_filters_pair_and_terminal() {
        let store = InMemoryDeploymentStore::new();
        store.save(&record("d-1", "nginx")).await.unwrap();
        store.save(&record("d-2", "sample")).await.unwrap();

        let mut done = record("d-3", "nginx");
        done.begin_rollback(RollbackReason::ProvisioningError {
            message: "never ready".to_string(),
        })
        .unwrap();
        store.save(&done).await.unwrap();

        let in_flight = store.in_flight("nginx").await.unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].id, "d-1");
    }

    #[tokio::test]
    async fn test_terminal_record_cannot_be_overwritten() {
        let store = InMemoryDeploymentStore::new();
        let mut done = record("d-1", "nginx");
        done.begin_rollback(RollbackReason::ProvisioningError {
            message: "never ready".to_string(),
        })
        .unwrap();
        store.save(&done).await.unwrap();
        // Saving the identical record again is harmless.
        store.save(&done).await.unwrap();

        let err = store.save(&record("d-1", "nginx")).await.unwrap_err();
        assert!(err.is_invariant_violation());
    }
}
