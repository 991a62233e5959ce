use std::{collections::HashSet, future::Future, sync::Arc};

use analysis::{DiffAggregator, ProofVerifier};
use anyhow::{Context, Result};
use data_model::{DiffAnalysis, ExecutionId, JobId, ProofCheck, ProofStatus};
use gateway::{
    BroadcastPushChannel,
    Ed25519Signer,
    FetchGateway,
    HttpGateway,
    JobSigner,
    UnsignedSubmission,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracker::{
    JobTracker,
    LifecycleState,
    NoopSessionStore,
    RetryCoordinator,
    RetryOutcome,
    RetryPlan,
    TrackerDeps,
    TrackerHandle,
    TrackerSnapshot,
};

use crate::config::BeaconConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Submit one follow-up job for the regions that did not complete.
    pub retry: bool,
    pub verify_proofs: bool,
}

pub struct Service {
    config: BeaconConfig,
    gateway: Arc<dyn FetchGateway>,
    push_channel: Arc<BroadcastPushChannel>,
    aggregator: Arc<DiffAggregator>,
    verifier: ProofVerifier,
    signer: Arc<dyn JobSigner>,
}

impl Service {
    pub fn new(config: BeaconConfig) -> Result<Self> {
        let gateway = HttpGateway::new(&config.gateway).context("building gateway client")?;
        Self::with_gateway(config, Arc::new(gateway))
    }

    pub fn with_gateway(config: BeaconConfig, gateway: Arc<dyn FetchGateway>) -> Result<Self> {
        let signer: Arc<dyn JobSigner> = match &config.signing.private_key_base64 {
            Some(key) => Arc::new(Ed25519Signer::from_base64(key)?),
            None => Arc::new(UnsignedSubmission),
        };
        Ok(Self {
            aggregator: Arc::new(DiffAggregator::new(
                gateway.clone(),
                config.analysis.clone(),
            )),
            verifier: ProofVerifier::new(gateway.clone()),
            // No transport feeds this hub yet, so tracking relies on polling.
            push_channel: Arc::new(BroadcastPushChannel::default()),
            gateway,
            signer,
            config,
        })
    }

    /// Tracks `job_id` until it is dismissed or purged, or until `shutdown`
    /// resolves. Returns the last snapshot observed.
    pub async fn watch(
        &self,
        job_id: JobId,
        options: WatchOptions,
        shutdown: impl Future<Output = ()>,
    ) -> Result<TrackerSnapshot> {
        let cancel_token = CancellationToken::new();
        let _cancel_on_exit = cancel_token.clone().drop_guard();
        let tracker = JobTracker::spawn(
            self.config.tracker.clone(),
            TrackerDeps {
                gateway: self.gateway.clone(),
                push_channel: self.push_channel.clone(),
                aggregator: Some(self.aggregator.clone()),
                session_store: Arc::new(NoopSessionStore),
            },
            cancel_token,
        );
        let retry = options.retry.then(|| {
            RetryCoordinator::new(self.gateway.clone(), tracker.clone(), self.signer.clone())
        });

        let mut state_rx = tracker.subscribe();
        tracker.adopt(job_id)?;

        let mut reporter = Reporter::default();
        let mut retry_attempted = false;
        let mut verified: HashSet<ExecutionId> = HashSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("interrupted, stopping tracker");
                    let _ = tracker.shutdown();
                    return Ok(tracker.snapshot());
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Ok(tracker.snapshot());
                    }
                }
            }
            let snapshot = state_rx.borrow_and_update().clone();
            reporter.report(&snapshot);

            if matches!(
                snapshot.state,
                LifecycleState::Dismissed | LifecycleState::Purged
            ) {
                return Ok(snapshot);
            }

            if let Some(retry) = &retry {
                if !retry_attempted && matches!(retry.plan(), RetryPlan::Submit { .. }) {
                    retry_attempted = true;
                    self.submit_retry(retry).await;
                }
            }

            if options.verify_proofs && snapshot.state == LifecycleState::Completed {
                self.verify_new_proofs(&tracker, &mut verified).await;
            }
        }
    }

    async fn submit_retry(&self, retry: &RetryCoordinator) {
        match retry.retry().await {
            Ok(RetryOutcome::Submitted { job_id, regions }) => {
                info!(retry_job_id = %job_id, regions = ?regions, "following retry job");
            }
            Ok(RetryOutcome::Skipped(reason)) => info!(reason = %reason, "retry not submitted"),
            Err(err) => warn!(error = %err, "retry failed"),
        }
    }

    async fn verify_new_proofs(&self, tracker: &TrackerHandle, verified: &mut HashSet<ExecutionId>) {
        let Some(job) = tracker.snapshot().job else {
            return;
        };
        let pending = job
            .executions
            .iter()
            .filter(|e| e.content_pointer.is_some() && !verified.contains(&e.id));
        let checks = self.verifier.verify_all(pending).await;
        for (execution_id, check) in checks {
            if check.status != ProofStatus::Verified {
                warn!(
                    execution_id = %execution_id,
                    status = %check.status,
                    error = ?check.error,
                    "execution is not provably in the transparency log"
                );
            }
            verified.insert(execution_id);
        }
    }

    pub async fn diff(&self, job_id: &JobId) -> Result<Option<DiffAnalysis>> {
        self.aggregator
            .aggregate_job(job_id)
            .await
            .with_context(|| format!("fetching job {job_id}"))
    }

    pub async fn verify(&self, execution_id: &ExecutionId, content_pointer: &str) -> ProofCheck {
        self.verifier.verify(execution_id, content_pointer).await
    }
}

/// Logs what changed between consecutive snapshots.
#[derive(Default)]
struct Reporter {
    state: Option<(u64, LifecycleState)>,
    job_status: Option<String>,
    analysis_generation: Option<u64>,
    error: Option<String>,
}

impl Reporter {
    fn report(&mut self, snapshot: &TrackerSnapshot) {
        let state = (snapshot.generation, snapshot.state);
        if self.state != Some(state) {
            info!(
                state = %snapshot.state,
                generation = snapshot.generation,
                job_id = ?snapshot.job_id,
                "tracker state changed"
            );
            self.state = Some(state);
        }

        if let Some(job) = &snapshot.job {
            let status = format!("{}:{}", job.id, job.status);
            if self.job_status.as_ref() != Some(&status) {
                info!(
                    job_id = %job.id,
                    status = %job.status,
                    executions = job.executions.len(),
                    completed_regions = ?job.completed_regions(),
                    "job status"
                );
                self.job_status = Some(status);
            }
        }

        if snapshot.error != self.error {
            if let Some(error) = &snapshot.error {
                warn!(error = %error, "job refresh failing, showing last known state");
            }
            self.error = snapshot.error.clone();
        }

        if let Some(analysis) = &snapshot.analysis {
            if self.analysis_generation != Some(snapshot.generation) {
                info!(
                    source = %analysis.source,
                    bias_variance = analysis.metrics.bias_variance,
                    censorship_rate = analysis.metrics.censorship_rate,
                    factual_consistency = analysis.metrics.factual_consistency,
                    narrative_divergence = analysis.metrics.narrative_divergence,
                    "diff analysis"
                );
                self.analysis_generation = Some(snapshot.generation);
            }
        }
    }
}
