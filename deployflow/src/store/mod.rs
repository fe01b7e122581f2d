//! Persistence for pipeline executions, deployment records and baselines.
//!
//! Terminal executions and records are history: stores refuse to overwrite
//! them.

mod baseline;
mod file;
mod memory;

pub use baseline::BaselineStore;
pub use file::FileDeploymentStore;
pub use memory::{InMemoryDeploymentStore, InMemoryExecutionStore};

use async_trait::async_trait;

use crate::deployment::DeploymentRecord;
use crate::errors::DeployflowError;
use crate::pipeline::PipelineExecution;

/// Stores pipeline executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Inserts or updates an execution.
    async fn save(&self, execution: &PipelineExecution) -> Result<(), DeployflowError>;

    /// Loads an execution by id.
    async fn load(&self, id: &str) -> Result<Option<PipelineExecution>, DeployflowError>;

    /// Lists every stored execution, oldest first.
    async fn list(&self) -> Result<Vec<PipelineExecution>, DeployflowError>;
}

/// Stores deployment records so a restarted controller can resume them.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Inserts or updates a record.
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeployflowError>;

    /// Loads a record by id.
    async fn load(&self, id: &str) -> Result<Option<DeploymentRecord>, DeployflowError>;

    /// Lists every stored record, oldest first.
    async fn list(&self) -> Result<Vec<DeploymentRecord>, DeployflowError>;

    /// Lists non-terminal records for `pair`.
    async fn in_flight(&self, pair: &str) -> Result<Vec<DeploymentRecord>, DeployflowError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|record| record.pair == pair && !record.is_terminal())
            .collect())
    }
}
