use std::time::Duration;

use anyhow::Result;
use beacon_utils::duration_serde::millis;
use serde::{Deserialize, Serialize};

pub mod lifecycle;
pub mod poller;
pub mod push_reconciler;
pub mod retry;
pub mod session;

pub use lifecycle::{
    events::TrackerCommand,
    JobTracker,
    LifecycleState,
    TrackerDeps,
    TrackerHandle,
    TrackerSnapshot,
};
pub use poller::PollPolicy;
pub use push_reconciler::{FrameVerdict, PushReconciler};
pub use retry::{plan_retry, RetryCoordinator, RetryError, RetryOutcome, RetryPlan, SkipReason};
pub use session::{MemorySessionStore, NoopSessionStore, SessionStore};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("job tracker has stopped")]
    Stopped,
}

fn default_exec_limit() -> u32 {
    50
}

fn default_retention() -> Duration {
    Duration::from_secs(60)
}

fn default_push_debounce() -> Duration {
    Duration::from_millis(500)
}

fn default_push_channel() -> String {
    gateway::push::DEFAULT_CHANNEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Executions requested with each job fetch.
    #[serde(default = "default_exec_limit")]
    pub exec_limit: u32,
    /// How long a completed job stays visible before it is dismissed.
    #[serde(rename = "retention_ms", with = "millis", default = "default_retention")]
    pub retention: Duration,
    #[serde(rename = "push_debounce_ms", with = "millis", default = "default_push_debounce")]
    pub push_debounce: Duration,
    #[serde(default = "default_push_channel")]
    pub push_channel: String,
    #[serde(default)]
    pub poll: PollPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            exec_limit: default_exec_limit(),
            retention: default_retention(),
            push_debounce: default_push_debounce(),
            push_channel: default_push_channel(),
            poll: PollPolicy::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retention.is_zero() {
            return Err(anyhow::anyhow!("tracker.retention_ms must be greater than zero"));
        }
        if self.exec_limit == 0 {
            return Err(anyhow::anyhow!("tracker.exec_limit must be greater than zero"));
        }
        if self.push_channel.trim().is_empty() {
            return Err(anyhow::anyhow!("tracker.push_channel must not be empty"));
        }
        self.poll.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: TrackerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.exec_limit, 50);
        assert_eq!(config.retention, Duration::from_secs(60));
        assert_eq!(config.push_debounce, Duration::from_millis(500));
        assert_eq!(config.push_channel, "jobs");
        assert_eq!(config.poll, PollPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config: TrackerConfig = serde_json::from_str(r#"{"retention_ms": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }
}
