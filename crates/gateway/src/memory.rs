use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use data_model::{
    DiffPayload,
    Execution,
    ExecutionId,
    JobHandle,
    JobId,
    JobSpec,
    JobStatus,
    MerkleProof,
    SubmittedJob,
    TransparencyRoot,
};

use crate::{ExecutionFilter, FetchGateway, GatewayError, JobQuery};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Result<JobHandle, GatewayError>>,
    job_delays: HashMap<JobId, Duration>,
    diffs: HashMap<JobId, Result<DiffPayload, GatewayError>>,
    proofs: HashMap<ExecutionId, Result<MerkleProof, GatewayError>>,
    root: Option<Result<TransparencyRoot, GatewayError>>,
    submission_error: Option<GatewayError>,
    submissions: Vec<JobSpec>,
    job_fetches: HashMap<JobId, usize>,
    diff_fetches: usize,
}

/// Scriptable [`FetchGateway`] kept entirely in memory. Anything not
/// scripted answers `NotFound`.
#[derive(Default)]
pub struct InMemoryGateway {
    state: Mutex<State>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_job(&self, job: JobHandle) {
        self.state().jobs.insert(job.id.clone(), Ok(job));
    }

    pub fn fail_job(&self, id: &JobId, error: GatewayError) {
        self.state().jobs.insert(id.clone(), Err(error));
    }

    pub fn remove_job(&self, id: &JobId) {
        self.state().jobs.remove(id);
    }

    /// Delays every later fetch of `id`. The answer is captured when the
    /// request starts, so a delayed response reflects the state at request
    /// time.
    pub fn set_job_delay(&self, id: &JobId, delay: Duration) {
        self.state().job_delays.insert(id.clone(), delay);
    }

    pub fn set_diff(&self, job_id: &JobId, payload: DiffPayload) {
        self.state().diffs.insert(job_id.clone(), Ok(payload));
    }

    pub fn fail_diff(&self, job_id: &JobId, error: GatewayError) {
        self.state().diffs.insert(job_id.clone(), Err(error));
    }

    pub fn set_proof(&self, execution_id: &ExecutionId, proof: MerkleProof) {
        self.state().proofs.insert(execution_id.clone(), Ok(proof));
    }

    pub fn fail_proof(&self, execution_id: &ExecutionId, error: GatewayError) {
        self.state().proofs.insert(execution_id.clone(), Err(error));
    }

    pub fn set_root(&self, root: &str) {
        self.state().root = Some(Ok(TransparencyRoot {
            root: root.to_string(),
        }));
    }

    pub fn fail_root(&self, error: GatewayError) {
        self.state().root = Some(Err(error));
    }

    pub fn reject_submissions(&self, error: GatewayError) {
        self.state().submission_error = Some(error);
    }

    pub fn submissions(&self) -> Vec<JobSpec> {
        self.state().submissions.clone()
    }

    pub fn job_fetches(&self, id: &JobId) -> usize {
        self.state().job_fetches.get(id).copied().unwrap_or(0)
    }

    pub fn diff_fetches(&self) -> usize {
        self.state().diff_fetches
    }
}

#[async_trait]
impl FetchGateway for InMemoryGateway {
    async fn fetch_job(&self, id: &JobId, _query: &JobQuery) -> Result<JobHandle, GatewayError> {
        let (answer, delay) = {
            let mut state = self.state();
            *state.job_fetches.entry(id.clone()).or_default() += 1;
            let answer = state
                .jobs
                .get(id)
                .cloned()
                .unwrap_or_else(|| Err(GatewayError::not_found(format!("job {}", id))));
            (answer, state.job_delays.get(id).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn fetch_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, GatewayError> {
        let state = self.state();
        let mut executions: Vec<Execution> = state
            .jobs
            .values()
            .filter_map(|job| job.as_ref().ok())
            .flat_map(|job| job.executions.iter())
            .filter(|e| filter.job_id.as_ref().map_or(true, |id| &e.job_id == id))
            .filter(|e| {
                filter
                    .region
                    .as_ref()
                    .map_or(true, |r| data_model::canonical_region(r) == e.canonical_region())
            })
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = filter.limit {
            executions.truncate(limit as usize);
        }
        Ok(executions)
    }

    async fn fetch_diff_analysis(&self, job_id: &JobId) -> Result<DiffPayload, GatewayError> {
        let mut state = self.state();
        state.diff_fetches += 1;
        state.diffs.get(job_id).cloned().unwrap_or_else(|| {
            Err(GatewayError::not_found(format!(
                "diff analysis for job {}",
                job_id
            )))
        })
    }

    async fn submit_job(&self, spec: &JobSpec) -> Result<SubmittedJob, GatewayError> {
        let mut state = self.state();
        if let Some(error) = &state.submission_error {
            return Err(error.clone());
        }
        state.submissions.push(spec.clone());
        let id = match &spec.parent_job_id {
            Some(parent) => JobId::new(format!("{}-retry-{}", parent, state.submissions.len())),
            None => JobId::new(format!("job-{}", state.submissions.len())),
        };
        let mut stored = spec.clone();
        stored.id = Some(id.clone());
        state.jobs.insert(
            id.clone(),
            Ok(JobHandle {
                id: id.clone(),
                status: JobStatus::Created,
                created_at: Some(chrono::Utc::now()),
                executions: Vec::new(),
                spec: Some(stored),
            }),
        );
        Ok(SubmittedJob {
            id,
            status: Some("created".to_string()),
        })
    }

    async fn fetch_proof(
        &self,
        execution_id: &ExecutionId,
        _content_pointer: &str,
    ) -> Result<MerkleProof, GatewayError> {
        self.state()
            .proofs
            .get(execution_id)
            .cloned()
            .unwrap_or_else(|| {
                Err(GatewayError::not_found(format!(
                    "proof for execution {}",
                    execution_id
                )))
            })
    }

    async fn fetch_transparency_root(&self) -> Result<TransparencyRoot, GatewayError> {
        self.state()
            .root
            .clone()
            .unwrap_or_else(|| Err(GatewayError::not_found("transparency root")))
    }
}

#[cfg(test)]
mod tests {
    use data_model::{
        test_objects::tests::{mock_execution, mock_job, mock_spec},
        ExecutionStatus,
    };

    use super::*;

    #[tokio::test]
    async fn test_unscripted_job_is_not_found() {
        let gateway = InMemoryGateway::new();
        let err = gateway
            .fetch_job(&JobId::from("missing"), &JobQuery::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(gateway.job_fetches(&JobId::from("missing")), 1);
    }

    #[tokio::test]
    async fn test_executions_filter() {
        let gateway = InMemoryGateway::new();
        let mut job = mock_job("job-1", JobStatus::Running, &["US", "EU"]);
        job.executions = vec![
            mock_execution("1", "job-1", "us-east", ExecutionStatus::Completed),
            mock_execution("2", "job-1", "eu-west", ExecutionStatus::Running),
        ];
        gateway.set_job(job);

        let filter = ExecutionFilter {
            region: Some("US".to_string()),
            ..ExecutionFilter::for_job(&JobId::from("job-1"))
        };
        let executions = gateway.fetch_executions(&filter).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].id, ExecutionId::from("1"));
    }

    #[tokio::test]
    async fn test_submission_registers_job() {
        let gateway = InMemoryGateway::new();
        let mut spec = mock_spec(&["ASIA"]);
        spec.parent_job_id = Some(JobId::from("job-1"));
        let submitted = gateway.submit_job(&spec).await.unwrap();
        assert_eq!(submitted.id, JobId::from("job-1-retry-1"));

        let job = gateway
            .fetch_job(&submitted.id, &JobQuery::default())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(gateway.submissions().len(), 1);

        gateway.reject_submissions(GatewayError::Rejected {
            status: 422,
            message: "invalid".to_string(),
        });
        assert!(gateway.submit_job(&spec).await.is_err());
        assert_eq!(gateway.submissions().len(), 1);
    }
}
