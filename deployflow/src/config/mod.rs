//! Configuration types for deployments and pipelines.
//!
//! Durations are serialized as fractional seconds (`*_seconds`) and exposed
//! as [`Duration`] through accessor methods.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::utils::{seconds_to_duration, MAX_DURATION_SECONDS};

/// One step of a canary schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanaryStep {
    /// Traffic percentage routed to the new slot once the step is applied.
    pub weight_percent: u8,
    /// How long to hold this weight before the next step.
    #[serde(default)]
    pub hold_seconds: f64,
}

impl CanaryStep {
    /// Creates a new canary step.
    #[must_use]
    pub fn new(weight_percent: u8, hold: Duration) -> Self {
        Self {
            weight_percent,
            hold_seconds: hold.as_secs_f64(),
        }
    }

    /// Gets the hold as Duration.
    #[must_use]
    pub fn hold_duration(&self) -> Duration {
        seconds_to_duration(self.hold_seconds)
    }
}

/// What to do when health stays `Unknown` for the whole observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    /// Absence of evidence is not a failure.
    #[default]
    Lenient,
    /// Health evidence is required; a bake that ends after the grace period
    /// with nothing but `Unknown` times out.
    Strict,
}

/// How the controller consumes the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Interval between health polls in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,
    /// How long health may stay `Unknown` before it counts against the
    /// deployment under the strict policy.
    #[serde(default = "default_unknown_grace")]
    pub unknown_grace_period_seconds: f64,
    /// Unknown-state policy.
    #[serde(default)]
    pub unknown_policy: UnknownPolicy,
}

fn default_poll_interval() -> f64 {
    10.0
}

fn default_unknown_grace() -> f64 {
    60.0
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            unknown_grace_period_seconds: default_unknown_grace(),
            unknown_policy: UnknownPolicy::default(),
        }
    }
}

impl HealthPolicy {
    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_seconds = interval.as_secs_f64();
        self
    }

    /// Sets the unknown grace period.
    #[must_use]
    pub fn with_unknown_grace_period(mut self, grace: Duration) -> Self {
        self.unknown_grace_period_seconds = grace.as_secs_f64();
        self
    }

    /// Sets the unknown-state policy.
    #[must_use]
    pub fn with_unknown_policy(mut self, policy: UnknownPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds_to_duration(self.poll_interval_seconds)
    }

    /// Gets the unknown grace period as Duration.
    #[must_use]
    pub fn unknown_grace_period(&self) -> Duration {
        seconds_to_duration(self.unknown_grace_period_seconds)
    }
}

/// Configuration of a blue/green canary deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Ordered canary steps. Empty means all traffic moves at once after
    /// the bake.
    #[serde(default = "default_canary_steps")]
    pub canary_steps: Vec<CanaryStep>,
    /// Bake period after the last canary step, in seconds.
    #[serde(default = "default_bake")]
    pub bake_seconds: f64,
    /// How long the new slot may take to become ready, in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: f64,
    /// Interval between readiness polls while initializing, in seconds.
    #[serde(default = "default_readiness_poll")]
    pub readiness_poll_interval_seconds: f64,
    /// Whether alarm-sourced failures trigger a rollback.
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback_on_alarm: bool,
    /// Health monitoring policy.
    #[serde(default)]
    pub health: HealthPolicy,
}

fn default_canary_steps() -> Vec<CanaryStep> {
    vec![CanaryStep::new(10, Duration::ZERO)]
}

fn default_bake() -> f64 {
    300.0
}

fn default_startup_timeout() -> f64 {
    600.0
}

fn default_readiness_poll() -> f64 {
    5.0
}

fn default_auto_rollback() -> bool {
    true
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self::canary_10_percent_5_minutes()
    }
}

impl DeploymentConfig {
    /// Shift 10% immediately, bake for five minutes, then shift the rest.
    #[must_use]
    pub fn canary_10_percent_5_minutes() -> Self {
        Self {
            canary_steps: default_canary_steps(),
            bake_seconds: default_bake(),
            startup_timeout_seconds: default_startup_timeout(),
            readiness_poll_interval_seconds: default_readiness_poll(),
            auto_rollback_on_alarm: default_auto_rollback(),
            health: HealthPolicy::default(),
        }
    }

    /// Shift 10% immediately, bake for fifteen minutes, then shift the rest.
    #[must_use]
    pub fn canary_10_percent_15_minutes() -> Self {
        Self::canary_10_percent_5_minutes().with_bake(Duration::from_secs(15 * 60))
    }

    /// Shift 10% more every minute until all traffic has moved.
    #[must_use]
    pub fn linear_10_percent_every_1_minute() -> Self {
        let steps = (1..=9).map(|i| CanaryStep::new(i * 10, Duration::from_secs(60)));
        Self::canary_10_percent_5_minutes()
            .with_steps(steps)
            .with_bake(Duration::ZERO)
    }

    /// Move all traffic as soon as the new slot is ready.
    #[must_use]
    pub fn all_at_once() -> Self {
        Self::canary_10_percent_5_minutes()
            .with_steps([])
            .with_bake(Duration::ZERO)
    }

    /// Parses a configuration from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::new("deployment", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the canary steps.
    #[must_use]
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = CanaryStep>) -> Self {
        self.canary_steps = steps.into_iter().collect();
        self
    }

    /// Sets the bake period.
    #[must_use]
    pub fn with_bake(mut self, bake: Duration) -> Self {
        self.bake_seconds = bake.as_secs_f64();
        self
    }

    /// Sets the startup timeout.
    #[must_use]
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the readiness poll interval.
    #[must_use]
    pub fn with_readiness_poll_interval(mut self, interval: Duration) -> Self {
        self.readiness_poll_interval_seconds = interval.as_secs_f64();
        self
    }

    /// Enables or disables rollback on alarm signals.
    #[must_use]
    pub fn with_auto_rollback_on_alarm(mut self, enabled: bool) -> Self {
        self.auto_rollback_on_alarm = enabled;
        self
    }

    /// Replaces the health policy.
    #[must_use]
    pub fn with_health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    /// Gets the bake period as Duration.
    #[must_use]
    pub fn bake_duration(&self) -> Duration {
        seconds_to_duration(self.bake_seconds)
    }

    /// Gets the startup timeout as Duration.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        seconds_to_duration(self.startup_timeout_seconds)
    }

    /// Gets the readiness poll interval as Duration.
    #[must_use]
    pub fn readiness_poll_interval(&self) -> Duration {
        seconds_to_duration(self.readiness_poll_interval_seconds)
    }

    /// Upper bound on how long a healthy deployment takes to complete.
    #[must_use]
    pub fn completion_bound(&self) -> Duration {
        let holds: Duration = self.canary_steps.iter().map(CanaryStep::hold_duration).sum();
        self.startup_timeout() + holds + self.bake_duration()
    }

    /// Checks the schedule and timings for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut previous = 0u8;
        for (i, step) in self.canary_steps.iter().enumerate() {
            if step.weight_percent == 0 || step.weight_percent >= 100 {
                return Err(ConfigError::new(
                    format!("canary_steps[{i}].weight_percent"),
                    format!("{} must be between 1 and 99", step.weight_percent),
                ));
            }
            if step.weight_percent <= previous {
                return Err(ConfigError::new(
                    format!("canary_steps[{i}].weight_percent"),
                    format!(
                        "weights must strictly increase ({} follows {previous})",
                        step.weight_percent
                    ),
                ));
            }
            non_negative(&format!("canary_steps[{i}].hold_seconds"), step.hold_seconds)?;
            previous = step.weight_percent;
        }

        non_negative("bake_seconds", self.bake_seconds)?;
        positive("startup_timeout_seconds", self.startup_timeout_seconds)?;
        positive(
            "readiness_poll_interval_seconds",
            self.readiness_poll_interval_seconds,
        )?;
        positive("health.poll_interval_seconds", self.health.poll_interval_seconds)?;
        non_negative(
            "health.unknown_grace_period_seconds",
            self.health.unknown_grace_period_seconds,
        )?;
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::new(field, format!("{value} must be greater than zero")));
    }
    within_bound(field, value)
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(ConfigError::new(field, format!("{value} must not be negative")));
    }
    within_bound(field, value)
}

fn within_bound(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > MAX_DURATION_SECONDS {
        return Err(ConfigError::new(
            field,
            format!("{value} exceeds the {MAX_DURATION_SECONDS} second limit"),
        ));
    }
    Ok(())
}

/// Configuration of a release pipeline bound to one environment pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Name of the environment pair the Deploy stage targets.
    pub pair: String,
    /// Source repository in `owner/name` form.
    pub repository: String,
    /// Branch that triggers the pipeline.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Deployment behaviour of the Deploy stage.
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

fn default_branch() -> String {
    "master".to_string()
}

impl PipelineConfig {
    /// Creates a pipeline configuration with the default deployment.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pair: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pair: pair.into(),
            repository: repository.into(),
            branch: default_branch(),
            deployment: DeploymentConfig::default(),
        }
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Replaces the deployment configuration.
    #[must_use]
    pub fn with_deployment(mut self, deployment: DeploymentConfig) -> Self {
        self.deployment = deployment;
        self
    }

    /// Parses a configuration from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::new("pipeline", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::new(path.display().to_string(), e.to_string()))?;
        Self::from_json_str(&json)
    }

    /// Checks names and the nested deployment configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("name", &self.name),
            ("pair", &self.pair),
            ("repository", &self.repository),
            ("branch", &self.branch),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::new(field, "must not be empty"));
            }
        }
        self.deployment.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_canary_10_percent_5_minutes() {
        let config = DeploymentConfig::default();
        assert_eq!(config.canary_steps, vec![CanaryStep::new(10, Duration::ZERO)]);
        assert_eq!(config.bake_duration(), Duration::from_secs(300));
        assert!(config.auto_rollback_on_alarm);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        for config in [
            DeploymentConfig::canary_10_percent_15_minutes(),
            DeploymentConfig::linear_10_percent_every_1_minute(),
            DeploymentConfig::all_at_once(),
        ] {
            assert!(config.validate().is_ok(), "{config:?}");
        }
        assert_eq!(
            DeploymentConfig::linear_10_percent_every_1_minute().canary_steps.len(),
            9
        );
    }

    #[test]
    fn test_rejects_non_increasing_weights() {
        let config = DeploymentConfig::default().with_steps([
            CanaryStep::new(20, Duration::from_secs(60)),
            CanaryStep::new(20, Duration::from_secs(60)),
        ]);
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "canary_steps[1].weight_percent");
    }

    #[test]
    fn test_rejects_full_weight_step() {
        let config = DeploymentConfig::default().with_steps([CanaryStep::new(100, Duration::ZERO)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_startup_timeout() {
        let config = DeploymentConfig::default().with_startup_timeout(Duration::ZERO);
        assert_eq!(config.validate().unwrap_err().field, "startup_timeout_seconds");
    }

    #[test]
    fn test_completion_bound() {
        let config = DeploymentConfig::default()
            .with_steps([CanaryStep::new(10, Duration::from_secs(120))])
            .with_bake(Duration::from_secs(300))
            .with_startup_timeout(Duration::from_secs(60));
        assert_eq!(config.completion_bound(), Duration::from_secs(480));
    }

    #[test]
    fn test_from_json_with_defaults() {
        let config = DeploymentConfig::from_json_str(
            r#"{"canary_steps": [{"weight_percent": 25, "hold_seconds": 30}], "auto_rollback_on_alarm": false}"#,
        )
        .unwrap();
        assert_eq!(config.canary_steps[0].hold_duration(), Duration::from_secs(30));
        assert!(!config.auto_rollback_on_alarm);
        assert_eq!(config.health.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.health.unknown_policy, UnknownPolicy::Lenient);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = DeploymentConfig::from_json_str(r#"{"bake_seconds": -1}"#).unwrap_err();
        assert_eq!(err.field, "bake_seconds");
    }

    #[test]
    fn test_rejects_durations_beyond_limit() {
        let err = DeploymentConfig::from_json_str(r#"{"bake_seconds": 1e30}"#).unwrap_err();
        assert_eq!(err.field, "bake_seconds");

        let err = DeploymentConfig::from_json_str(
            r#"{"canary_steps": [{"weight_percent": 10, "hold_seconds": 1e300}]}"#,
        )
        .unwrap_err();
        assert_eq!(err.field, "canary_steps[0].hold_seconds");

        let config = DeploymentConfig::default().with_startup_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(config.validate().unwrap_err().field, "startup_timeout_seconds");
    }

    #[test]
    fn test_pipeline_config_from_json() {
        let config = PipelineConfig::from_json_str(
            r#"{"name": "AppMasteryPipeline", "pair": "nginx", "repository": "Dev-Destructor/app-mastery-internship"}"#,
        )
        .unwrap();
        assert_eq!(config.branch, "master");
        assert_eq!(config.deployment.bake_duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_pipeline_config_rejects_empty_pair() {
        let config = PipelineConfig::new("p", " ", "o/r");
        assert_eq!(config.validate().unwrap_err().field, "pair");
    }

    #[tokio::test]
    async fn test_pipeline_config_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"name": "p", "pair": "nginx", "repository": "o/r", "branch": "main"}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(config.branch, "main");

        assert!(PipelineConfig::load(dir.path().join("missing.json")).await.is_err());
    }
}
