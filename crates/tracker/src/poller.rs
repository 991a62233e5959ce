use std::time::Duration;

use beacon_utils::duration_serde::millis;
use chrono::{DateTime, Utc};
use data_model::JobHandle;
use serde::{Deserialize, Serialize};

fn default_unobserved() -> Duration {
    Duration::from_millis(5000)
}

fn default_terminal() -> Duration {
    Duration::from_millis(10_000)
}

fn default_young() -> Duration {
    Duration::from_millis(2000)
}

fn default_young_age() -> Duration {
    Duration::from_secs(30)
}

fn default_settling() -> Duration {
    Duration::from_millis(3000)
}

fn default_settling_age() -> Duration {
    Duration::from_secs(300)
}

fn default_steady() -> Duration {
    Duration::from_millis(5000)
}

/// Picks the delay before the next fetch of a tracked job.
///
/// Young jobs change quickly and are polled often; the interval backs off
/// as the job ages and once it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Before the first response arrives.
    #[serde(rename = "unobserved_ms", with = "millis", default = "default_unobserved")]
    pub unobserved: Duration,
    #[serde(rename = "terminal_ms", with = "millis", default = "default_terminal")]
    pub terminal: Duration,
    #[serde(rename = "young_ms", with = "millis", default = "default_young")]
    pub young: Duration,
    #[serde(rename = "young_age_ms", with = "millis", default = "default_young_age")]
    pub young_age: Duration,
    #[serde(rename = "settling_ms", with = "millis", default = "default_settling")]
    pub settling: Duration,
    #[serde(rename = "settling_age_ms", with = "millis", default = "default_settling_age")]
    pub settling_age: Duration,
    #[serde(rename = "steady_ms", with = "millis", default = "default_steady")]
    pub steady: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            unobserved: default_unobserved(),
            terminal: default_terminal(),
            young: default_young(),
            young_age: default_young_age(),
            settling: default_settling(),
            settling_age: default_settling_age(),
            steady: default_steady(),
        }
    }
}

impl PollPolicy {
    pub fn next_delay(&self, job: Option<&JobHandle>, now: DateTime<Utc>) -> Duration {
        let Some(job) = job else {
            return self.unobserved;
        };
        if job.is_terminal() {
            return self.terminal;
        }
        self.delay_for_age(job_age(job, now))
    }

    pub fn delay_for_age(&self, age: Duration) -> Duration {
        if age < self.young_age {
            self.young
        } else if age < self.settling_age {
            self.settling
        } else {
            self.steady
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            self.unobserved,
            self.terminal,
            self.young,
            self.settling,
            self.steady,
        ];
        if intervals.iter().any(Duration::is_zero) {
            return Err(anyhow::anyhow!("tracker.poll intervals must be non-zero"));
        }
        if self.young_age > self.settling_age {
            return Err(anyhow::anyhow!(
                "tracker.poll.young_age_ms must not exceed settling_age_ms"
            ));
        }
        Ok(())
    }
}

/// Time since the job was created. Missing or future timestamps count as
/// a brand new job.
pub fn job_age(job: &JobHandle, now: DateTime<Utc>) -> Duration {
    job.created_at
        .and_then(|created| (now - created).to_std().ok())
        .unwrap_or_default()
}
