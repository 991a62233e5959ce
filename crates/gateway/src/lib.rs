//! Access to the runner's job, execution, diff and transparency endpoints,
//! plus the push notification feed.
//!
//! Every gateway call makes exactly one attempt. Retrying is the caller's
//! business: the tracker retries on its next poll tick, submissions are
//! never retried.

pub mod http;
pub mod memory;
pub mod push;
pub mod signing;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use data_model::{
    DiffPayload,
    Execution,
    ExecutionId,
    ExecutionStatus,
    JobHandle,
    JobId,
    JobSpec,
    MerkleProof,
    SubmittedJob,
    TransparencyRoot,
};
pub use http::HttpGateway;
pub use memory::InMemoryGateway;
pub use push::{BroadcastPushChannel, PushChannel};
use serde::{Deserialize, Serialize};
pub use signing::{Ed25519Signer, JobSigner, UnsignedSubmission};

const DEFAULT_EXEC_LIMIT: u32 = 50;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("transient gateway failure: {message}")]
    Transient { message: String },

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response from {what}: {message}")]
    Decode { what: String, message: String },
}

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Failures worth trying again on the next tick, malformed payloads
    /// included.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Decode { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Transient { .. } => "transient",
            Self::Rejected { .. } => "rejected",
            Self::Decode { .. } => "decode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQuery {
    pub include_executions: bool,
    pub exec_limit: Option<u32>,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            include_executions: true,
            exec_limit: Some(DEFAULT_EXEC_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionFilter {
    pub job_id: Option<JobId>,
    pub region: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<u32>,
}

impl ExecutionFilter {
    pub fn for_job(job_id: &JobId) -> Self {
        Self {
            job_id: Some(job_id.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait FetchGateway: Send + Sync {
    async fn fetch_job(&self, id: &JobId, query: &JobQuery) -> Result<JobHandle, GatewayError>;

    async fn fetch_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, GatewayError>;

    async fn fetch_diff_analysis(&self, job_id: &JobId) -> Result<DiffPayload, GatewayError>;

    async fn submit_job(&self, spec: &JobSpec) -> Result<SubmittedJob, GatewayError>;

    async fn fetch_proof(
        &self,
        execution_id: &ExecutionId,
        content_pointer: &str,
    ) -> Result<MerkleProof, GatewayError>;

    async fn fetch_transparency_root(&self) -> Result<TransparencyRoot, GatewayError>;
}

fn default_api_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// The diff service may live on its own host.
    #[serde(default)]
    pub diffs_url: Option<String>,
    #[serde(
        default = "default_request_timeout",
        rename = "request_timeout_ms",
        with = "beacon_utils::duration_serde::millis"
    )]
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            diffs_url: None,
            request_timeout: default_request_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn diffs_url(&self) -> &str {
        self.diffs_url.as_deref().unwrap_or(&self.api_url)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("api_url", self.api_url.as_str()), ("diffs_url", self.diffs_url())] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "{} must include a scheme (http:// or https://), got: {}",
                    name,
                    value
                ));
            }
            url::Url::parse(value).map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e))?;
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow::anyhow!("request_timeout_ms must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.api_url, "http://localhost:8090");
        assert_eq!(config.diffs_url(), "http://localhost:8090");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_requires_scheme() {
        let config = GatewayConfig {
            diffs_url: Some("diffs.internal:8000".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_error_classification() {
        assert!(GatewayError::not_found("job job-1").is_not_found());
        assert!(GatewayError::transient("connection reset").is_retryable());
        let rejected = GatewayError::Rejected {
            status: 400,
            message: "bad spec".to_string(),
        };
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.kind(), "rejected");
        assert_eq!(
            rejected.to_string(),
            "request rejected with status 400: bad spec"
        );
    }
}
