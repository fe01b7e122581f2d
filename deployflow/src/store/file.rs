//! Deployment records persisted as one JSON file per record.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::DeploymentStore;
use crate::deployment::DeploymentRecord;
use crate::errors::{DeployflowError, InvariantViolation};

/// A [`DeploymentStore`] writing `<dir>/<id>.json`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash never leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct FileDeploymentStore {
    dir: PathBuf,
}

impl FileDeploymentStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, DeployflowError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(DeployflowError::Store(format!("invalid record id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(path: &Path) -> Result<Option<DeploymentRecord>, DeployflowError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeployflowError> {
        let path = self.path_for(&record.id)?;
        if let Some(existing) = Self::read(&path).await? {
            if existing.is_terminal() && existing != *record {
                return Err(InvariantViolation::TerminalRecord(record.id.clone()).into());
            }
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(deployment_id = %record.id, path = %path.display(), "Persisted deployment record");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<DeploymentRecord>, DeployflowError> {
        Self::read(&self.path_for(id)?).await
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>, DeployflowError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read(&path).await? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Color, Revision, TaskSpec};
    use crate::deployment::DeploymentPhase;

    fn record(id: &str) -> DeploymentRecord {
        DeploymentRecord::new(
            id,
            "nginx",
            Revision::new("nginx:2", TaskSpec::default()).unwrap(),
            None,
            Color::Green,
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record("dep-1");
        rec.transition_to(DeploymentPhase::CanaryShifting).unwrap();

        FileDeploymentStore::new(dir.path()).save(&rec).await.unwrap();

        let reopened = FileDeploymentStore::new(dir.path());
        let loaded = reopened.load("dep-1").await.unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(reopened.in_flight("nginx").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeploymentStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.load("dep-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeploymentStore::new(dir.path());
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(DeployflowError::Store(_))
        ));
    }
}
