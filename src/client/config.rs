//! Engine configuration.

use std::time::Duration;

use crate::core::EngineError;
use crate::proximity::ThrottleConfig;
use crate::retry::RetryPolicy;
use crate::sync::{OrchestratorConfig, TrackerConfig};
use crate::transport::{BackoffConfig, SupervisorConfig};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Feed connection supervision.
    pub supervisor: SupervisorConfig,
    /// Recomputation, motion tracking, and processing bound.
    pub orchestrator: OrchestratorConfig,
    /// Write-path retry.
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Start building a configuration from defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Reject nonsensical values.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.supervisor
            .validate()
            .and_then(|()| self.orchestrator.validate())
            .and_then(|()| self.retry.validate())
            .map_err(EngineError::Config)
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconnect backoff.
    pub fn reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.supervisor.backoff = backoff;
        self
    }

    /// Liveness window before the connection is reported degraded.
    pub fn heartbeat_window(mut self, window: Duration) -> Self {
        self.config.supervisor.heartbeat_window = window;
        self
    }

    /// Bound on a single subscribe attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.supervisor.connect_timeout = timeout;
        self
    }

    /// Recomputation throttle.
    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.config.orchestrator.throttle = throttle;
        self
    }

    /// Recompute when the last computation is older than this.
    pub fn recompute_interval(mut self, interval: Duration) -> Self {
        self.config.orchestrator.throttle.recompute_interval = interval;
        self
    }

    /// Recompute when the user moved further than this.
    pub fn movement_threshold_meters(mut self, meters: f64) -> Self {
        self.config.orchestrator.throttle.movement_threshold_meters = meters;
        self
    }

    /// Per-friend motion thresholds.
    pub fn tracker(mut self, tracker: TrackerConfig) -> Self {
        self.config.orchestrator.tracker = tracker;
        self
    }

    /// Processing bound for a single computation.
    pub fn max_processed_friends(mut self, max: usize) -> Self {
        self.config.orchestrator.max_processed_friends = max;
        self
    }

    /// Write-path retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Seed every jitter source (reconnect and retry) for reproducible runs.
    pub fn jitter_seed(mut self, seed: u64) -> Self {
        self.config.supervisor.jitter_seed = Some(seed);
        self.config.retry.jitter_seed = Some(seed);
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DEFAULT_HEARTBEAT_WINDOW, DEFAULT_MAX_PROCESSED_FRIENDS};

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::builder().build().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.supervisor.heartbeat_window, DEFAULT_HEARTBEAT_WINDOW);
        assert_eq!(
            config.orchestrator.max_processed_friends,
            DEFAULT_MAX_PROCESSED_FRIENDS
        );
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = EngineConfig::builder()
            .heartbeat_window(Duration::from_secs(5))
            .movement_threshold_meters(50.0)
            .max_processed_friends(10)
            .jitter_seed(9)
            .build()
            .unwrap();
        assert_eq!(config.supervisor.heartbeat_window, Duration::from_secs(5));
        assert_eq!(config.orchestrator.throttle.movement_threshold_meters, 50.0);
        assert_eq!(config.orchestrator.max_processed_friends, 10);
        assert_eq!(config.supervisor.jitter_seed, Some(9));
        assert_eq!(config.retry.jitter_seed, Some(9));
    }

    #[test]
    fn test_builder_rejects_nonsense() {
        let zero_base = BackoffConfig {
            base_delay: Duration::ZERO,
            ..BackoffConfig::reconnect()
        };
        let cases = [
            EngineConfig::builder().reconnect_backoff(zero_base).build(),
            EngineConfig::builder().max_processed_friends(0).build(),
            EngineConfig::builder().movement_threshold_meters(-3.0).build(),
            EngineConfig::builder()
                .retry(RetryPolicy {
                    max_attempts: 0,
                    ..RetryPolicy::default()
                })
                .build(),
            EngineConfig::builder().connect_timeout(Duration::ZERO).build(),
        ];
        for case in cases {
            assert!(matches!(case, Err(EngineError::Config(_))), "{case:?}");
        }
    }
}
