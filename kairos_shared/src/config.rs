use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::FrameRate;

/// Determines how the submissions of surfaces that share a device queue are ordered
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueSubmissionPolicy {
    /// Every surface submits as soon as its commands are recorded
    #[default]
    Independent,
    /// Surfaces on the same device queue submit in the order of their priority
    SharedQueueOrdered,
}

/// Wall clock pacing of the update ticks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacingPolicy {
    /// Sleep until the next tick is due. Missed ticks are dropped.
    #[default]
    FixedRate,
    /// Run missed ticks back to back until the clock has caught up
    CatchUp,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("updates_per_second must be greater than zero")]
    ZeroUpdateRate,
    #[error("frames_in_flight must be greater than zero")]
    ZeroFramesInFlight,
    #[error("{0} must be greater than zero")]
    ZeroWorkerThreads(&'static str),
    #[error("wait_timeout must be greater than zero")]
    ZeroWaitTimeout,
    #[error("failed to read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse the configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Configuration of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub application_name: Option<String>,
    /// Rate of the update ticks
    pub updates_per_second: u32,
    /// Number of frames a surface may have submitted but not yet presented
    pub frames_in_flight: u32,
    pub queue_submission_policy: QueueSubmissionPolicy,
    pub pacing_policy: PacingPolicy,
    /// Maximum number of ticks that [`PacingPolicy::CatchUp`] runs back to back
    pub max_catch_up_ticks: u32,
    /// Limit for the render loop
    pub frame_rate: FrameRate,
    pub render_worker_threads: usize,
    pub update_worker_threads: usize,
    /// Upper bound for a single blocking wait. Every wait re-checks the terminating flag after this duration.
    #[serde(with = "duration_millis")]
    pub wait_timeout: Duration,
    /// How long the first render pass waits for the first update to be published
    #[serde(with = "duration_millis")]
    pub startup_wait: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            application_name: None,
            updates_per_second: 100,
            frames_in_flight: 2,
            queue_submission_policy: QueueSubmissionPolicy::default(),
            pacing_policy: PacingPolicy::default(),
            max_catch_up_ticks: 5,
            frame_rate: FrameRate::Unlimited,
            render_worker_threads: num_cpus::get().max(1),
            update_worker_threads: (num_cpus::get() / 2).max(1),
            wait_timeout: Duration::from_millis(100),
            startup_wait: Duration::from_millis(50),
        }
    }
}

impl OrchestratorConfig {
    /// Parses and validates a YAML document. Missing fields keep their default values.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config = serde_yaml::from_str::<Self>(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the YAML file at the given path
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.updates_per_second == 0 {
            return Err(ConfigError::ZeroUpdateRate);
        }
        if self.frames_in_flight == 0 {
            return Err(ConfigError::ZeroFramesInFlight);
        }
        if self.render_worker_threads == 0 {
            return Err(ConfigError::ZeroWorkerThreads("render_worker_threads"));
        }
        if self.update_worker_threads == 0 {
            return Err(ConfigError::ZeroWorkerThreads("update_worker_threads"));
        }
        if self.wait_timeout.is_zero() {
            return Err(ConfigError::ZeroWaitTimeout);
        }
        Ok(())
    }

    /// A single frame in flight and ordered submission for shared queues
    pub fn low_latency() -> Self {
        Self {
            frames_in_flight: 1,
            queue_submission_policy: QueueSubmissionPolicy::SharedQueueOrdered,
            ..Default::default()
        }
    }

    /// Small worker pools and short waits for driving the orchestrator frame by frame
    pub fn stepped() -> Self {
        Self {
            render_worker_threads: 2,
            update_worker_threads: 1,
            wait_timeout: Duration::from_millis(10),
            startup_wait: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Duration of a single update tick
    pub fn update_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.updates_per_second.max(1) as u64)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.update_period(), Duration::from_millis(10));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = OrchestratorConfig::from_yaml_str(
            "updates_per_second: 50\nqueue_submission_policy: SharedQueueOrdered\nwait_timeout: 20\n",
        )
        .unwrap();
        assert_eq!(config.updates_per_second, 50);
        assert_eq!(config.queue_submission_policy, QueueSubmissionPolicy::SharedQueueOrdered);
        assert_eq!(config.wait_timeout, Duration::from_millis(20));
        assert_eq!(config.frames_in_flight, OrchestratorConfig::default().frames_in_flight);
        assert_eq!(config.update_period(), Duration::from_millis(20));
    }

    #[test]
    fn yaml_round_trip() {
        let config = OrchestratorConfig {
            application_name: Some("demo".to_owned()),
            pacing_policy: PacingPolicy::CatchUp,
            frame_rate: FrameRate::Limited(60),
            ..Default::default()
        };
        let yaml = config.to_yaml_string().unwrap();
        assert_eq!(OrchestratorConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn zero_update_rate_is_rejected() {
        let result = OrchestratorConfig::from_yaml_str("updates_per_second: 0\n");
        assert!(matches!(result, Err(ConfigError::ZeroUpdateRate)));
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let config = OrchestratorConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroFramesInFlight)));
    }

    #[test]
    fn unknown_enum_variant_is_a_parse_error() {
        let result = OrchestratorConfig::from_yaml_str("pacing_policy: AsFastAsPossible\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn presets_are_valid() {
        assert!(OrchestratorConfig::low_latency().validate().is_ok());
        assert!(OrchestratorConfig::stepped().validate().is_ok());
        assert_eq!(OrchestratorConfig::low_latency().frames_in_flight, 1);
    }
}
