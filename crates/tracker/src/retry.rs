use std::{fmt, sync::Arc};

use data_model::{JobHandle, JobId, JobSpec, RegionState};
use gateway::{FetchGateway, GatewayError, JobSigner};
use tracing::{info, warn};

use crate::{lifecycle::TrackerHandle, TrackerError};

/// Why no retry job was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoJob,
    NoSpec,
    NothingCompleted,
    NothingMissing,
    RegionsInFlight(Vec<String>),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoJob => write!(f, "no job is tracked"),
            SkipReason::NoSpec => write!(f, "the job carries no spec to derive a retry from"),
            SkipReason::NothingCompleted => write!(f, "no region has completed"),
            SkipReason::NothingMissing => write!(f, "every requested region completed"),
            SkipReason::RegionsInFlight(regions) => {
                write!(f, "regions still in flight: {}", regions.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryPlan {
    Skip(SkipReason),
    Submit {
        parent: JobId,
        regions: Vec<String>,
        spec: JobSpec,
    },
}

/// Decides whether `job` needs a follow-up covering the regions that did
/// not complete, and builds its spec.
pub fn plan_retry(job: &JobHandle) -> RetryPlan {
    let Some(spec) = &job.spec else {
        return RetryPlan::Skip(SkipReason::NoSpec);
    };
    let requested = job.requested_regions();
    let completed = job.completed_regions();
    if completed.is_empty() {
        return RetryPlan::Skip(SkipReason::NothingCompleted);
    }

    let missing: Vec<String> = requested
        .into_iter()
        .filter(|region| !completed.contains(region))
        .collect();
    if missing.is_empty() {
        return RetryPlan::Skip(SkipReason::NothingMissing);
    }

    let in_flight: Vec<String> = missing
        .iter()
        .filter(|region| job.region_state(region) == RegionState::InFlight)
        .cloned()
        .collect();
    if !in_flight.is_empty() {
        return RetryPlan::Skip(SkipReason::RegionsInFlight(in_flight));
    }

    RetryPlan::Submit {
        parent: job.id.clone(),
        spec: spec.derive_for_regions(&job.id, missing.clone()),
        regions: missing,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Submitted { job_id: JobId, regions: Vec<String> },
    Skipped(SkipReason),
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("retry submission failed: {0}")]
    Submission(#[source] GatewayError),
    #[error("failed to sign retry spec: {0:#}")]
    Signing(anyhow::Error),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Submits region-restricted follow-up jobs for partially successful runs
/// and hands the new job to the tracker.
pub struct RetryCoordinator {
    gateway: Arc<dyn FetchGateway>,
    tracker: TrackerHandle,
    signer: Arc<dyn JobSigner>,
    metrics: metrics::tracker_stats::Metrics,
}

impl RetryCoordinator {
    pub fn new(
        gateway: Arc<dyn FetchGateway>,
        tracker: TrackerHandle,
        signer: Arc<dyn JobSigner>,
    ) -> Self {
        Self {
            gateway,
            tracker,
            signer,
            metrics: metrics::tracker_stats::Metrics::new(),
        }
    }

    /// Plans from the tracker's current snapshot.
    pub fn plan(&self) -> RetryPlan {
        match self.tracker.snapshot().job {
            Some(job) => plan_retry(&job),
            None => RetryPlan::Skip(SkipReason::NoJob),
        }
    }

    /// Submits a retry for the tracked job if one is warranted. Rejections
    /// are returned, never retried.
    pub async fn retry(&self) -> Result<RetryOutcome, RetryError> {
        let (parent, regions, spec) = match self.plan() {
            RetryPlan::Submit {
                parent,
                regions,
                spec,
            } => (parent, regions, spec),
            RetryPlan::Skip(reason) => {
                info!(reason = %reason, "retry skipped");
                return Ok(RetryOutcome::Skipped(reason));
            }
        };
        let mut signed = self.signer.sign(spec).map_err(RetryError::Signing)?;

        // The tracker may have moved on while the spec was prepared.
        let regions = match self.plan() {
            RetryPlan::Submit {
                parent: latest_parent,
                regions: latest,
                spec: latest_spec,
            } if latest_parent == parent => {
                if latest != regions {
                    info!(job_id = %parent, regions = ?latest, "missing regions changed, re-planning retry");
                    signed = self.signer.sign(latest_spec).map_err(RetryError::Signing)?;
                }
                latest
            }
            RetryPlan::Submit { .. } => {
                info!(job_id = %parent, "tracked job changed before submission, retry skipped");
                return Ok(RetryOutcome::Skipped(SkipReason::NoJob));
            }
            RetryPlan::Skip(reason) => {
                info!(job_id = %parent, reason = %reason, "retry no longer needed");
                return Ok(RetryOutcome::Skipped(reason));
            }
        };

        let submitted = match self.gateway.submit_job(&signed).await {
            Ok(submitted) => submitted,
            Err(err) => {
                warn!(job_id = %parent, error = %err, "retry submission rejected");
                return Err(RetryError::Submission(err));
            }
        };
        info!(
            job_id = %parent,
            retry_job_id = %submitted.id,
            regions = ?regions,
            "retry submitted"
        );
        self.metrics.retries_submitted.add(1, &[]);
        self.tracker.adopt(submitted.id.clone())?;
        Ok(RetryOutcome::Submitted {
            job_id: submitted.id,
            regions,
        })
    }
}

#[cfg(test)]
mod tests {
    use data_model::{
        test_objects::tests::{mock_execution, mock_job},
        ExecutionStatus,
        JobStatus,
    };

    use super::*;

    fn job_with(regions: &[(&str, ExecutionStatus)], status: JobStatus) -> JobHandle {
        let mut job = mock_job("job-1", status, &["US", "EU", "ASIA"]);
        job.executions = regions
            .iter()
            .enumerate()
            .map(|(i, (region, status))| mock_execution(&i.to_string(), "job-1", region, *status))
            .collect();
        job
    }

    #[test]
    fn test_plan_covers_missing_regions_in_requested_order() {
        let job = job_with(
            &[
                ("ASIA", ExecutionStatus::Failed),
                ("US", ExecutionStatus::Completed),
                ("EU", ExecutionStatus::Timeout),
            ],
            JobStatus::Completed,
        );
        let RetryPlan::Submit {
            parent,
            regions,
            spec,
        } = plan_retry(&job)
        else {
            panic!("expected a retry plan");
        };
        assert_eq!(parent, job.id);
        assert_eq!(regions, vec!["EU", "ASIA"]);
        assert_eq!(spec.constraints.regions, regions);
        assert_eq!(spec.constraints.min_regions, 1);
        assert_eq!(spec.parent_job_id, Some(job.id.clone()));
        assert_eq!(spec.models, job.spec.as_ref().unwrap().models);
    }

    #[test]
    fn test_in_flight_region_blocks_retry() {
        let job = job_with(
            &[
                ("US", ExecutionStatus::Completed),
                ("EU", ExecutionStatus::Failed),
                ("ASIA", ExecutionStatus::Running),
            ],
            JobStatus::Running,
        );
        assert_eq!(
            plan_retry(&job),
            RetryPlan::Skip(SkipReason::RegionsInFlight(vec!["ASIA".to_string()]))
        );
    }

    #[test]
    fn test_region_without_executions() {
        let running = job_with(&[("US", ExecutionStatus::Completed)], JobStatus::Running);
        assert!(matches!(
            plan_retry(&running),
            RetryPlan::Skip(SkipReason::RegionsInFlight(_))
        ));

        let finished = job_with(&[("US", ExecutionStatus::Completed)], JobStatus::Completed);
        let RetryPlan::Submit { regions, .. } = plan_retry(&finished) else {
            panic!("expected a retry plan");
        };
        assert_eq!(regions, vec!["EU", "ASIA"]);
    }

    #[test]
    fn test_nothing_to_retry() {
        let all_done = job_with(
            &[
                ("US", ExecutionStatus::Completed),
                ("EU", ExecutionStatus::Completed),
                ("ASIA", ExecutionStatus::Completed),
            ],
            JobStatus::Completed,
        );
        assert_eq!(plan_retry(&all_done), RetryPlan::Skip(SkipReason::NothingMissing));

        let all_failed = job_with(
            &[
                ("US", ExecutionStatus::Failed),
                ("EU", ExecutionStatus::Failed),
                ("ASIA", ExecutionStatus::Failed),
            ],
            JobStatus::Failed,
        );
        assert_eq!(plan_retry(&all_failed), RetryPlan::Skip(SkipReason::NothingCompleted));

        let mut unspecified = all_failed.clone();
        unspecified.spec = None;
        assert_eq!(plan_retry(&unspecified), RetryPlan::Skip(SkipReason::NoSpec));
    }

    #[test]
    fn test_partial_region_is_not_completed() {
        let job = job_with(
            &[
                ("US", ExecutionStatus::Completed),
                ("US", ExecutionStatus::Failed),
                ("EU", ExecutionStatus::Completed),
                ("ASIA", ExecutionStatus::Completed),
            ],
            JobStatus::Completed,
        );
        let RetryPlan::Submit { regions, .. } = plan_retry(&job) else {
            panic!("expected a retry plan");
        };
        assert_eq!(regions, vec!["US"]);
    }
}
