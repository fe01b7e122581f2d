//! Artifacts passed between pipeline stages.

use super::StageId;
use crate::errors::DeployflowError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Name of the artifact produced by the Source stage.
pub const SOURCE_ARTIFACT: &str = "source_output";

/// Name of the artifact produced by the Build stage.
pub const BUILD_ARTIFACT: &str = "build_output";

/// The opaque content of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ArtifactPayload {
    /// Inline bytes.
    Bytes(Vec<u8>),
    /// A pointer to content held elsewhere (bucket key, registry URI, ...).
    Reference(String),
}

/// An immutable output of one stage, consumed by a later stage.
///
/// Identity is the `name`, unique within one pipeline execution. There is
/// no mutating API: once built, an artifact is only cloned or read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    name: String,
    produced_by: StageId,
    payload: ArtifactPayload,
    created_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates a new artifact.
    #[must_use]
    pub fn new(name: impl Into<String>, produced_by: StageId, payload: ArtifactPayload) -> Self {
        Self {
            name: name.into(),
            produced_by,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Creates an artifact whose payload is `value` encoded as JSON bytes.
    pub fn encode<T: Serialize>(
        name: impl Into<String>,
        produced_by: StageId,
        value: &T,
    ) -> Result<Self, DeployflowError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::new(name, produced_by, ArtifactPayload::Bytes(bytes)))
    }

    /// Decodes a JSON payload back into a typed value.
    ///
    /// # Errors
    ///
    /// Fails if the payload is a reference or does not decode as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DeployflowError> {
        match &self.payload {
            ArtifactPayload::Bytes(bytes) => Ok(serde_json::from_slice(bytes)?),
            ArtifactPayload::Reference(reference) => Err(DeployflowError::Store(format!(
                "artifact '{}' is an external reference ({reference}) and cannot be decoded inline",
                self.name
            ))),
        }
    }

    /// Returns the artifact name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage that produced the artifact.
    #[must_use]
    pub fn produced_by(&self) -> StageId {
        self.produced_by
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &ArtifactPayload {
        &self.payload
    }

    /// Returns when the artifact was produced.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_creation() {
        let artifact = Artifact::new(
            SOURCE_ARTIFACT,
            StageId::Source,
            ArtifactPayload::Reference("s3://bucket/source.zip".to_string()),
        );

        assert_eq!(artifact.name(), "source_output");
        assert_eq!(artifact.produced_by(), StageId::Source);
    }

    #[test]
    fn test_encode_decode_value() {
        let artifact = Artifact::encode(BUILD_ARTIFACT, StageId::Build, &json!({"image": "nginx:1"})).unwrap();
        let value: serde_json::Value = artifact.decode().unwrap();
        assert_eq!(value["image"], "nginx:1");
    }

    #[test]
    fn test_reference_cannot_be_decoded() {
        let artifact = Artifact::new(
            BUILD_ARTIFACT,
            StageId::Build,
            ArtifactPayload::Reference("s3://bucket/build.zip".to_string()),
        );
        let result: Result<serde_json::Value, _> = artifact.decode();
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_serialization_shape() {
        let payload = ArtifactPayload::Reference("ref".to_string());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, json!({"kind": "reference", "value": "ref"}));
    }
}
