use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{Execution, ExecutionId, ExecutionStatus, JobHandle, JobId, JobSpec, JobStatus};

/// Execution details of a runner receipt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptDetails {
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptOutput {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Signed execution record the runner stores per region run.
#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    pub id: ExecutionId,
    #[serde(default)]
    pub jobspec_id: Option<JobId>,
    #[serde(default)]
    pub execution_details: ReceiptDetails,
    #[serde(default)]
    pub output: ReceiptOutput,
}

impl Receipt {
    fn metadata_str(&self, key: &str) -> Option<String> {
        self.output
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn into_execution(self, job_id: &JobId) -> Execution {
        let model_id = self.metadata_str("model_id");
        let question_id = self.metadata_str("question_id");
        let details = self.execution_details;
        Execution {
            id: self.id,
            job_id: self.jobspec_id.unwrap_or_else(|| job_id.clone()),
            region: details.region,
            model_id,
            status: details.status.unwrap_or(ExecutionStatus::Unknown),
            provider_id: details.provider_id.filter(|p| !p.is_empty()),
            started_at: details.started_at.filter(is_set),
            completed_at: details.completed_at.filter(is_set),
            retries: 0,
            error: None,
            output: self.output.data,
            content_pointer: None,
            question_id,
        }
    }
}

/// The runner reports zero timestamps for fields it never filled in.
fn is_set(timestamp: &DateTime<Utc>) -> bool {
    timestamp.timestamp() > 0
}

/// An execution entry as either the flat executions-table row or a receipt.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExecutionRecord {
    Row(Execution),
    Receipt(Receipt),
}

impl ExecutionRecord {
    pub fn into_execution(self, job_id: &JobId) -> Execution {
        match self {
            ExecutionRecord::Row(execution) => execution,
            ExecutionRecord::Receipt(receipt) => receipt.into_execution(job_id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlatJob {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub executions: Vec<ExecutionRecord>,
    #[serde(default, alias = "job", alias = "jobspec")]
    pub spec: Option<JobSpec>,
}

/// `GET /api/v1/jobs/{id}` body: the submitted spec with the job status and
/// its receipts beside it.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    pub job: JobSpec,
    pub status: JobStatus,
    #[serde(default)]
    pub executions: Vec<ExecutionRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JobBody {
    Flat(FlatJob),
    Envelope(JobEnvelope),
}

impl TryFrom<JobBody> for JobHandle {
    type Error = String;

    fn try_from(body: JobBody) -> Result<Self, Self::Error> {
        match body {
            JobBody::Flat(job) => Ok(JobHandle {
                executions: job
                    .executions
                    .into_iter()
                    .map(|record| record.into_execution(&job.id))
                    .collect(),
                id: job.id,
                status: job.status,
                created_at: job.created_at,
                spec: job.spec,
            }),
            JobBody::Envelope(envelope) => {
                let id = envelope
                    .job
                    .id
                    .clone()
                    .or_else(|| {
                        envelope
                            .job
                            .extra
                            .get("jobspec_id")
                            .and_then(Value::as_str)
                            .filter(|id| !id.is_empty())
                            .map(JobId::from)
                    })
                    .ok_or_else(|| "job response carries no job id".to_string())?;
                let created_at = envelope
                    .job
                    .extra
                    .get("created_at")
                    .and_then(|value| serde_json::from_value::<DateTime<Utc>>(value.clone()).ok())
                    .filter(is_set);
                Ok(JobHandle {
                    executions: envelope
                        .executions
                        .into_iter()
                        .map(|record| record.into_execution(&id))
                        .collect(),
                    id,
                    status: envelope.status,
                    created_at,
                    spec: Some(envelope.job),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::RegionState;

    #[test]
    fn test_runner_job_envelope() {
        let job: JobHandle = serde_json::from_value(json!({
            "job": {
                "id": "bias-1",
                "version": "v1",
                "benchmark": {"name": "bias-detection"},
                "constraints": {"regions": ["US", "EU"], "min_regions": 1},
                "questions": ["identity_basic"],
                "created_at": "2025-03-01T10:00:00Z",
                "signature": "sig",
                "public_key": "pk",
            },
            "status": "processing",
            "executions": [{
                "schema_version": "v0.1.0",
                "id": "receipt_task-1_us-east",
                "jobspec_id": "bias-1",
                "execution_details": {
                    "task_id": "task-1",
                    "provider_id": "modal-us",
                    "region": "us-east",
                    "started_at": "2025-03-01T10:00:05Z",
                    "completed_at": "2025-03-01T10:00:20Z",
                    "duration": 15000000000u64,
                    "status": "completed",
                },
                "output": {
                    "data": {"text_output": "an answer"},
                    "hash": "abc",
                    "metadata": {"model_id": "llama3.2-1b", "question_id": "identity_basic"},
                },
                "provenance": {"benchmark_hash": "h"},
                "created_at": "2025-03-01T10:00:20Z",
                "completed_at": "0001-01-01T00:00:00Z",
                "signature": "",
                "public_key": "",
            }],
        }))
        .unwrap();

        assert_eq!(job.id, JobId::from("bias-1"));
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(
            job.created_at.map(|t| t.to_rfc3339()),
            Some("2025-03-01T10:00:00+00:00".to_string())
        );
        assert_eq!(job.requested_regions(), vec!["US", "EU"]);

        let execution = &job.executions[0];
        assert_eq!(execution.job_id, JobId::from("bias-1"));
        assert_eq!(execution.canonical_region(), "US");
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.model_id.as_deref(), Some("llama3.2-1b"));
        assert_eq!(execution.question_id.as_deref(), Some("identity_basic"));
        assert_eq!(execution.response_text(), "an answer");
        assert_eq!(job.region_state("US"), RegionState::Completed);
        assert_eq!(job.region_state("EU"), RegionState::InFlight);
    }

    #[test]
    fn test_envelope_without_executions() {
        let job: JobHandle = serde_json::from_value(json!({
            "job": {"id": "bias-2", "created_at": "0001-01-01T00:00:00Z"},
            "status": "completed",
        }))
        .unwrap();
        assert_eq!(job.id, JobId::from("bias-2"));
        assert!(job.created_at.is_none());
        assert!(job.executions.is_empty());
        assert!(job.is_terminal());
    }

    #[test]
    fn test_envelope_falls_back_to_jobspec_id() {
        let job: JobHandle = serde_json::from_value(json!({
            "job": {"jobspec_id": "bias-3"},
            "status": "queued",
        }))
        .unwrap();
        assert_eq!(job.id, JobId::from("bias-3"));

        let err = serde_json::from_value::<JobHandle>(json!({
            "job": {"version": "v1"},
            "status": "queued",
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_flat_job_still_decodes() {
        let job: JobHandle = serde_json::from_value(json!({
            "id": 7,
            "status": "completed",
            "executions": [
                {"id": 1, "job_id": 7, "region": "EU", "status": "completed"},
            ],
        }))
        .unwrap();
        assert_eq!(job.id, JobId::from("7"));
        assert_eq!(job.executions[0].id, ExecutionId::from("1"));
        assert!(job.spec.is_none());
    }
}
