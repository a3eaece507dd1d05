use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How candidates are probed while locating the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// One candidate at a time, stopping at the first leader
    #[default]
    Sequential,
    /// All candidates at once; the lowest-index leader still wins
    Parallel,
}

/// How a new configuration is submitted to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconfigMode {
    /// Normal reconfiguration, subject to the group's quorum checks
    #[default]
    Safe,
    /// Override quorum checks. Disaster recovery only.
    Forced,
}

impl ReconfigMode {
    pub fn is_forced(&self) -> bool {
        matches!(self, ReconfigMode::Forced)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Bound on connect + leadership query for one candidate
    pub probe_timeout: Duration,
    /// Bound on connect and on each admin command outside probing
    pub command_timeout: Duration,
    pub scan_mode: ScanMode,
    pub reconfig_mode: ReconfigMode,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    /// Overall bound on stabilization polling
    pub poll_deadline: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(3),
            command_timeout: Duration::from_secs(10),
            scan_mode: ScanMode::Sequential,
            reconfig_mode: ReconfigMode::Safe,
            poll_interval: Duration::from_secs(1),
            poll_attempts: 10,
            poll_deadline: Duration::from_secs(30),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_scan_mode(mut self, mode: ScanMode) -> Self {
        self.scan_mode = mode;
        self
    }

    pub fn with_reconfig_mode(mut self, mode: ReconfigMode) -> Self {
        self.reconfig_mode = mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_attempts(mut self, attempts: u32) -> Self {
        self.poll_attempts = attempts;
        self
    }

    pub fn with_poll_deadline(mut self, deadline: Duration) -> Self {
        self.poll_deadline = deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.scan_mode, ScanMode::Sequential);
        assert_eq!(config.reconfig_mode, ReconfigMode::Safe);
        assert_eq!(config.poll_attempts, 10);
    }

    #[test]
    fn test_builders() {
        let config = ControllerConfig::new()
            .with_reconfig_mode(ReconfigMode::Forced)
            .with_scan_mode(ScanMode::Parallel)
            .with_poll_attempts(3)
            .with_poll_interval(Duration::from_millis(5));
        assert!(config.reconfig_mode.is_forced());
        assert_eq!(config.scan_mode, ScanMode::Parallel);
        assert_eq!(config.poll_attempts, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }
}
