pub mod analysis;
pub mod job_spec;
pub mod push;
pub mod receipt;
pub mod test_objects;
pub mod transparency;

use std::fmt::{self, Display};

pub use analysis::{
    AnalysisSource,
    CensorshipLevel,
    DiffAnalysis,
    DiffMetrics,
    DiffPayload,
    LiveExecution,
    LiveScoring,
    ModelDiff,
    RawDiffMetrics,
    RegionResult,
    RegionStatus,
};
use chrono::{DateTime, Utc};
pub use job_spec::{Constraints, JobSpec, ModelSpec, SubmittedJob};
pub use push::PushFrame;
use receipt::JobBody;
pub use receipt::{ExecutionRecord, JobEnvelope, Receipt};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay};
pub use transparency::{MerkleProof, ProofCheck, ProofStatus, TransparencyRoot};

pub const NO_RESPONSE: &str = "No response available";

/// Ids arrive as strings from the job API and as integers from the
/// executions table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(value: RawId) -> Self {
        match value {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[serde(from = "RawId")]
pub struct JobId(String);

impl JobId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<RawId> for JobId {
    fn from(value: RawId) -> Self {
        Self(value.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[serde(from = "RawId")]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<RawId> for ExecutionId {
    fn from(value: RawId) -> Self {
        Self(value.into())
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, AsRefStr, StrumDisplay,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Created,
    #[serde(alias = "queued", alias = "pending")]
    Enqueued,
    #[serde(alias = "processing")]
    Running,
    #[serde(alias = "success", alias = "succeeded")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, AsRefStr, StrumDisplay,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    #[serde(alias = "queued", alias = "created")]
    Pending,
    #[serde(alias = "processing")]
    Running,
    #[serde(alias = "success", alias = "succeeded")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
    #[serde(alias = "timed_out")]
    Timeout,
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Timeout
        )
    }
}

/// Maps the region spellings used by providers and job specs onto the three
/// canonical codes. Unknown regions are upper-cased and kept.
pub fn canonical_region(raw: &str) -> String {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "us" | "us-east" | "us-west" | "us-central" | "usa" | "north-america" | "na" => {
            "US".to_string()
        }
        "eu" | "eu-west" | "eu-central" | "eu-north" | "europe" => "EU".to_string(),
        "asia" | "apac" | "asia-pacific" | "ap-southeast" | "ap-northeast" | "ap-south" => {
            "ASIA".to_string()
        }
        _ if normalized.starts_with("us-") => "US".to_string(),
        _ if normalized.starts_with("eu-") => "EU".to_string(),
        _ if normalized.starts_with("ap-") || normalized.starts_with("asia-") => {
            "ASIA".to_string()
        }
        _ => raw.trim().to_ascii_uppercase(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub region: String,
    #[serde(default)]
    pub model_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "retry_count")]
    pub retries: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "output_data", alias = "result")]
    pub output: Option<serde_json::Value>,
    #[serde(default, alias = "ipfs_cid", alias = "cid")]
    pub content_pointer: Option<String>,
    #[serde(default)]
    pub question_id: Option<String>,
}

impl Execution {
    pub fn canonical_region(&self) -> String {
        canonical_region(&self.region)
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Pulls the model's answer out of the loosely shaped output blob.
    pub fn response_text(&self) -> String {
        let Some(output) = &self.output else {
            return NO_RESPONSE.to_string();
        };
        let candidates = [
            output.pointer("/responses/0/response"),
            output.get("text_output"),
            output.get("output"),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(|value| value.as_str())
            .map(|text| text.to_string())
            .unwrap_or_else(|| NO_RESPONSE.to_string())
    }
}

/// Progress of one requested region, derived from its executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum RegionState {
    Completed,
    Failed,
    InFlight,
}

impl RegionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RegionState::InFlight)
    }
}

/// A job with its executions. Decodes both the runner's `{job, status,
/// executions}` envelope and the flat shape this type serializes to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "JobBody")]
pub struct JobHandle {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub executions: Vec<Execution>,
    pub spec: Option<JobSpec>,
}

impl JobHandle {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Regions the job asked for, canonicalized. Falls back to the regions
    /// seen in executions when no spec is attached.
    pub fn requested_regions(&self) -> Vec<String> {
        let raw: Vec<&str> = match &self.spec {
            Some(spec) if !spec.constraints.regions.is_empty() => {
                spec.constraints.regions.iter().map(String::as_str).collect()
            }
            _ => self.executions.iter().map(|e| e.region.as_str()).collect(),
        };
        let mut regions: Vec<String> = Vec::new();
        for region in raw.into_iter().map(canonical_region) {
            if !regions.contains(&region) {
                regions.push(region);
            }
        }
        regions
    }

    pub fn executions_in_region<'a>(
        &'a self,
        region: &'a str,
    ) -> impl Iterator<Item = &'a Execution> + 'a {
        let region = canonical_region(region);
        self.executions
            .iter()
            .filter(move |e| e.canonical_region() == region)
    }

    pub fn region_state(&self, region: &str) -> RegionState {
        let executions: Vec<&Execution> = self.executions_in_region(region).collect();
        if executions.is_empty() {
            return if self.is_terminal() {
                RegionState::Failed
            } else {
                RegionState::InFlight
            };
        }
        if executions.iter().all(|e| e.is_completed()) {
            RegionState::Completed
        } else if executions.iter().all(|e| e.status.is_terminal()) {
            RegionState::Failed
        } else {
            RegionState::InFlight
        }
    }

    pub fn completed_regions(&self) -> Vec<String> {
        self.requested_regions()
            .into_iter()
            .filter(|region| self.region_state(region) == RegionState::Completed)
            .collect()
    }

    pub fn find_execution(&self, id: &ExecutionId) -> Option<&Execution> {
        self.executions.iter().find(|e| &e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_objects::tests::{mock_execution, mock_job};

    #[test]
    fn test_status_aliases() {
        let status: JobStatus = serde_json::from_value(json!("queued")).unwrap();
        assert_eq!(status, JobStatus::Enqueued);
        let status: JobStatus = serde_json::from_value(json!("processing")).unwrap();
        assert_eq!(status, JobStatus::Running);
        let status: JobStatus = serde_json::from_value(json!("something-new")).unwrap();
        assert_eq!(status, JobStatus::Unknown);
        assert!(!status.is_terminal());

        let status: ExecutionStatus = serde_json::from_value(json!("timed_out")).unwrap();
        assert_eq!(status, ExecutionStatus::Timeout);
        assert!(status.is_terminal());
        assert_eq!(ExecutionStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn test_execution_ids_accept_numbers() {
        let execution: Execution = serde_json::from_value(json!({
            "id": 42,
            "job_id": "job-1",
            "region": "us-east",
            "status": "completed",
            "ipfs_cid": "bafy123",
            "retry_count": 2,
        }))
        .unwrap();
        assert_eq!(execution.id.get(), "42");
        assert_eq!(execution.content_pointer.as_deref(), Some("bafy123"));
        assert_eq!(execution.retries, 2);
        assert_eq!(execution.canonical_region(), "US");
    }

    #[test]
    fn test_canonical_region() {
        assert_eq!(canonical_region("us-west"), "US");
        assert_eq!(canonical_region("EU"), "EU");
        assert_eq!(canonical_region("eu-central"), "EU");
        assert_eq!(canonical_region("apac"), "ASIA");
        assert_eq!(canonical_region("asia-pacific"), "ASIA");
        assert_eq!(canonical_region("latam"), "LATAM");
    }

    #[test]
    fn test_response_text_extraction_order() {
        let mut execution = mock_execution("e1", "job-1", "US", ExecutionStatus::Completed);
        execution.output = Some(json!({
            "responses": [{"response": "first"}],
            "text_output": "second",
        }));
        assert_eq!(execution.response_text(), "first");

        execution.output = Some(json!({"text_output": "second", "output": "third"}));
        assert_eq!(execution.response_text(), "second");

        execution.output = Some(json!({"output": "third"}));
        assert_eq!(execution.response_text(), "third");

        execution.output = Some(json!({"responses": []}));
        assert_eq!(execution.response_text(), NO_RESPONSE);

        execution.output = None;
        assert_eq!(execution.response_text(), NO_RESPONSE);
    }

    #[test]
    fn test_region_state() {
        let mut job = mock_job("job-1", JobStatus::Running, &["US", "EU", "ASIA"]);
        job.executions = vec![
            mock_execution("e1", "job-1", "us-east", ExecutionStatus::Completed),
            mock_execution("e2", "job-1", "EU", ExecutionStatus::Failed),
            mock_execution("e3", "job-1", "ASIA", ExecutionStatus::Running),
        ];
        assert_eq!(job.region_state("US"), RegionState::Completed);
        assert_eq!(job.region_state("EU"), RegionState::Failed);
        assert_eq!(job.region_state("ASIA"), RegionState::InFlight);
        assert_eq!(job.completed_regions(), vec!["US".to_string()]);

        // A region with no executions only counts as terminal once the job is.
        job.executions.truncate(2);
        assert_eq!(job.region_state("ASIA"), RegionState::InFlight);
        job.status = JobStatus::Failed;
        assert_eq!(job.region_state("ASIA"), RegionState::Failed);
    }

    #[test]
    fn test_requested_regions_fall_back_to_executions() {
        let mut job = mock_job("job-1", JobStatus::Running, &[]);
        job.spec = None;
        job.executions = vec![
            mock_execution("e1", "job-1", "eu-west", ExecutionStatus::Completed),
            mock_execution("e2", "job-1", "us-east", ExecutionStatus::Completed),
            mock_execution("e3", "job-1", "EU", ExecutionStatus::Completed),
        ];
        assert_eq!(job.requested_regions(), vec!["EU", "US"]);
    }
}
