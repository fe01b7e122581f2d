//! Deployable revisions and the source revisions they are built from.

use crate::errors::ConfigError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

fn image_reference_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"^[a-z0-9]+(?:[._\-/][a-z0-9]+)*(?::[0-9]+/[a-z0-9]+(?:[._\-/][a-z0-9]+)*)?(?::[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127})?(?:@sha256:[a-f0-9]{64})?$",
            )
            .ok()
        })
        .as_ref()
}

/// Returns true if `reference` looks like `repository[:tag][@sha256:digest]`.
#[must_use]
pub fn is_valid_image_reference(reference: &str) -> bool {
    image_reference_pattern().is_some_and(|pattern| pattern.is_match(reference))
}

/// Network protocol of a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    #[default]
    Tcp,
    /// UDP.
    Udp,
}

/// A container port exposed by the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port the container listens on.
    pub container_port: u16,
    /// Protocol of the port.
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    /// Creates a TCP port mapping.
    #[must_use]
    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Protocol::Tcp,
        }
    }
}

/// Resources and ports a revision runs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskSpec {
    /// CPU units (1024 = one vCPU).
    pub cpu: u32,
    /// Memory limit in MiB.
    pub memory_mib: u32,
    /// Exposed container ports.
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            cpu: 256,
            memory_mib: 512,
            port_mappings: vec![PortMapping::tcp(80)],
        }
    }
}

impl TaskSpec {
    /// Sets the CPU units.
    #[must_use]
    pub fn with_cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }

    /// Sets the memory limit.
    #[must_use]
    pub fn with_memory_mib(mut self, memory_mib: u32) -> Self {
        self.memory_mib = memory_mib;
        self
    }

    /// Replaces the port mappings.
    #[must_use]
    pub fn with_ports(mut self, ports: impl IntoIterator<Item = PortMapping>) -> Self {
        self.port_mappings = ports.into_iter().collect();
        self
    }
}

/// The deployable unit produced by the Build stage.
///
/// Two revisions are equal when their image reference and task spec are
/// equal; `created_at` does not take part in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    /// Container image reference, e.g. `repo/app:1.4.2`.
    pub image_reference: String,
    /// Resources and ports.
    pub task_spec: TaskSpec,
    /// When the build produced this revision.
    pub created_at: DateTime<Utc>,
}

impl Revision {
    /// Creates a revision after validating the image reference.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the image reference is malformed.
    pub fn new(image_reference: impl Into<String>, task_spec: TaskSpec) -> Result<Self, ConfigError> {
        let image_reference = image_reference.into();
        if !is_valid_image_reference(&image_reference) {
            return Err(ConfigError::new(
                "image_reference",
                format!("'{image_reference}' is not a valid image reference"),
            ));
        }
        if task_spec.cpu == 0 || task_spec.memory_mib == 0 {
            return Err(ConfigError::new("task_spec", "cpu and memory must be non-zero"));
        }
        Ok(Self {
            image_reference,
            task_spec,
            created_at: Utc::now(),
        })
    }

    /// Returns the content digest of the revision as lowercase hex.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.image_reference.as_bytes());
        hasher.update(self.task_spec.cpu.to_be_bytes());
        hasher.update(self.task_spec.memory_mib.to_be_bytes());
        for port in &self.task_spec.port_mappings {
            hasher.update(port.container_port.to_be_bytes());
            hasher.update([port.protocol as u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the first 12 hex characters of the digest.
    #[must_use]
    pub fn short_digest(&self) -> String {
        self.digest()[..12].to_string()
    }
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.image_reference == other.image_reference && self.task_spec == other.task_spec
    }
}

impl Eq for Revision {}

impl Hash for Revision {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.image_reference.hash(state);
        self.task_spec.hash(state);
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.image_reference, self.short_digest())
    }
}

/// A fetched source revision, the output of the Source stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRevision {
    /// Repository in `owner/name` form.
    pub repository: String,
    /// Branch the commit was taken from.
    pub branch: String,
    /// Commit identifier.
    pub commit: String,
}

impl SourceRevision {
    /// Creates a new source revision.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            commit: commit.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_validation() {
        assert!(is_valid_image_reference("nginx"));
        assert!(is_valid_image_reference("nginx:latest"));
        assert!(is_valid_image_reference("amazon/amazon-ecs-sample"));
        assert!(is_valid_image_reference(
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/app-mastery-internship:latest"
        ));
        assert!(is_valid_image_reference("localhost:5000/team/app:1.2.3"));
        assert!(is_valid_image_reference(&format!("app@sha256:{}", "a".repeat(64))));

        assert!(!is_valid_image_reference(""));
        assert!(!is_valid_image_reference("Nginx:latest"));
        assert!(!is_valid_image_reference("app:"));
        assert!(!is_valid_image_reference("app@sha256:xyz"));
    }

    #[test]
    fn test_revision_rejects_bad_reference() {
        let err = Revision::new("not valid", TaskSpec::default()).unwrap_err();
        assert_eq!(err.field, "image_reference");
    }

    #[test]
    fn test_revision_rejects_zero_resources() {
        assert!(Revision::new("app:1", TaskSpec::default().with_cpu(0)).is_err());
    }

    #[test]
    fn test_default_task_spec() {
        let spec = TaskSpec::default();
        assert_eq!(spec.cpu, 256);
        assert_eq!(spec.memory_mib, 512);
        assert_eq!(spec.port_mappings, vec![PortMapping::tcp(80)]);
    }

    #[test]
    fn test_identity_is_content() {
        let a = Revision::new("app:1", TaskSpec::default()).unwrap();
        let mut b = Revision::new("app:1", TaskSpec::default()).unwrap();
        b.created_at = b.created_at + chrono::Duration::minutes(5);
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());

        let c = Revision::new("app:1", TaskSpec::default().with_memory_mib(1024)).unwrap();
        assert_ne!(a, c);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_digest_shape() {
        let rev = Revision::new("app:1", TaskSpec::default()).unwrap();
        assert_eq!(rev.digest().len(), 64);
        assert_eq!(rev.short_digest().len(), 12);
        assert!(rev.to_string().starts_with("app:1 ("));
    }
}
