//! JobTracker: the single owner of tracking state.
//!
//! The tracker is the only place that decides what happens to the tracked
//! job. Fetches and diff aggregation run as tokio tasks that report back
//! over an `mpsc` channel; timers and the push subscription live in the
//! per-job [`scope::JobScope`] and are selected on in the same loop.

pub mod events;
mod scope;

use std::sync::Arc;

use analysis::DiffAggregator;
use chrono::Utc;
use data_model::{DiffAnalysis, JobHandle, JobId, JobStatus};
use gateway::{FetchGateway, GatewayError, JobQuery, PushChannel};
use opentelemetry::KeyValue;
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use self::{
    events::{FetchTrigger, ScopeSignal, TrackerCommand, TrackerEvent},
    scope::{next_scope_signal, JobScope},
};
use crate::{
    push_reconciler::{FrameVerdict, PushReconciler},
    session::SessionStore,
    TrackerConfig,
    TrackerError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsRefStr, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    Active,
    Completed,
    Dismissed,
    Purged,
}

impl LifecycleState {
    pub fn is_tracking(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::Completed)
    }
}

/// What observers see of the tracker. Published on every change.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    pub state: LifecycleState,
    /// Bumped on every adoption.
    pub generation: u64,
    pub job_id: Option<JobId>,
    pub job: Option<JobHandle>,
    /// A fetch is in flight.
    pub loading: bool,
    /// Last transient failure, cleared by the next good response.
    pub error: Option<String>,
    pub analysis: Option<DiffAnalysis>,
    pub analysis_pending: bool,
    pub retention_deadline: Option<Instant>,
}

/// Collaborators the tracker talks to.
#[derive(Clone)]
pub struct TrackerDeps {
    pub gateway: Arc<dyn FetchGateway>,
    pub push_channel: Arc<dyn PushChannel>,
    pub aggregator: Option<Arc<DiffAggregator>>,
    pub session_store: Arc<dyn SessionStore>,
}

/// Handle for talking to a running tracker. Cheap to clone.
#[derive(Clone)]
pub struct TrackerHandle {
    command_tx: mpsc::UnboundedSender<TrackerCommand>,
    state_rx: watch::Receiver<TrackerSnapshot>,
}

impl TrackerHandle {
    pub fn adopt(&self, job_id: JobId) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Adopt { job_id })
    }

    pub fn dismiss(&self) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Dismiss)
    }

    pub fn refresh(&self) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Refresh)
    }

    pub fn shutdown(&self) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Shutdown)
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.state_rx.clone()
    }

    /// Resolves with the first snapshot matching `predicate`, including the
    /// current one.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&TrackerSnapshot) -> bool,
    ) -> Result<TrackerSnapshot, TrackerError> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| TrackerError::Stopped)?;
        Ok(snapshot.clone())
    }

    fn send(&self, command: TrackerCommand) -> Result<(), TrackerError> {
        self.command_tx
            .send(command)
            .map_err(|_| TrackerError::Stopped)
    }
}

pub struct JobTracker {
    scope: Option<JobScope>,
    snapshot: TrackerSnapshot,
    generation: u64,

    // -- Channels --
    command_rx: mpsc::UnboundedReceiver<TrackerCommand>,
    event_tx: mpsc::UnboundedSender<TrackerEvent>,
    event_rx: mpsc::UnboundedReceiver<TrackerEvent>,
    state_tx: watch::Sender<TrackerSnapshot>,

    // -- Shared dependencies --
    config: TrackerConfig,
    query: JobQuery,
    deps: TrackerDeps,
    metrics: metrics::tracker_stats::Metrics,

    // -- Shutdown --
    cancel_token: CancellationToken,
}

impl JobTracker {
    /// Spawn the tracker as a tokio task. Returns a handle for
    /// communication.
    pub fn spawn(
        config: TrackerConfig,
        deps: TrackerDeps,
        cancel_token: CancellationToken,
    ) -> TrackerHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TrackerSnapshot::default());
        let query = JobQuery {
            include_executions: true,
            exec_limit: Some(config.exec_limit),
        };
        let tracker = Self {
            scope: None,
            snapshot: TrackerSnapshot::default(),
            generation: 0,
            command_rx,
            event_tx,
            event_rx,
            state_tx,
            config,
            query,
            deps,
            metrics: metrics::tracker_stats::Metrics::new(),
            cancel_token,
        };

        tokio::spawn(async move {
            tracker
                .run()
                .instrument(tracing::info_span!("job_tracker"))
                .await;
        });

        TrackerHandle {
            command_tx,
            state_rx,
        }
    }

    /// Main event loop.
    async fn run(mut self) {
        info!("JobTracker starting");
        if let Some(job_id) = self.deps.session_store.load() {
            info!(job_id = %job_id, "restoring tracked job from session");
            self.adopt(job_id);
        }
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("JobTracker cancelled, shutting down");
                    break;
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(TrackerCommand::Adopt { job_id }) => self.adopt(job_id),
                        Some(TrackerCommand::Dismiss) => self.dismiss(),
                        Some(TrackerCommand::Refresh) => self.issue_fetch(FetchTrigger::Manual),
                        Some(TrackerCommand::Shutdown) => {
                            info!("JobTracker shutdown requested");
                            break;
                        }
                        None => {
                            debug!("all tracker handles dropped");
                            break;
                        }
                    }
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }
                signal = next_scope_signal(&mut self.scope) => {
                    self.handle_signal(signal);
                }
            }
        }
        self.scope = None;
        info!("JobTracker stopped");
    }

    fn adopt(&mut self, job_id: JobId) {
        if self.snapshot.state.is_tracking() && self.snapshot.job_id.as_ref() == Some(&job_id) {
            debug!(job_id = %job_id, "job already tracked, refetching");
            self.issue_fetch(FetchTrigger::Manual);
            return;
        }

        // Release the previous job before anything of the new one attaches.
        self.scope = None;
        self.generation += 1;

        let push_rx = Some(self.deps.push_channel.subscribe(&self.config.push_channel));
        let mut scope = JobScope::new(
            job_id.clone(),
            self.generation,
            push_rx,
            PushReconciler::new(self.config.push_debounce),
        );
        scope
            .poll_timer
            .arm_after(self.config.poll.next_delay(None, Utc::now()));
        self.scope = Some(scope);

        self.snapshot = TrackerSnapshot {
            state: LifecycleState::Active,
            generation: self.generation,
            job_id: Some(job_id.clone()),
            ..Default::default()
        };
        self.deps.session_store.save(Some(&job_id));
        self.metrics.adoptions.add(1, &[]);
        info!(job_id = %job_id, generation = self.generation, "tracking job");
        self.issue_fetch(FetchTrigger::Adopt);
    }

    fn dismiss(&mut self) {
        if !self.snapshot.state.is_tracking() {
            debug!(state = %self.snapshot.state, "nothing to dismiss");
            return;
        }
        info!(job_id = ?self.snapshot.job_id, "job dismissed");
        self.release(LifecycleState::Dismissed);
    }

    fn purge(&mut self) {
        info!(job_id = ?self.snapshot.job_id, "job no longer exists upstream, purging");
        self.metrics.purges.add(1, &[]);
        self.release(LifecycleState::Purged);
    }

    /// Drops the scope and everything tied to it, leaving only the final
    /// state behind.
    fn release(&mut self, state: LifecycleState) {
        self.scope = None;
        self.snapshot = TrackerSnapshot {
            state,
            generation: self.generation,
            ..Default::default()
        };
        self.deps.session_store.save(None);
        self.publish();
    }

    fn issue_fetch(&mut self, trigger: FetchTrigger) {
        let Some(scope) = self.scope.as_mut() else {
            debug!(trigger = trigger.as_ref(), "no tracked job, skipping fetch");
            return;
        };
        scope.in_flight += 1;
        scope.fetches_issued += 1;

        let gateway = self.deps.gateway.clone();
        let event_tx = self.event_tx.clone();
        let cancel = scope.cancel.clone();
        let job_id = scope.job_id.clone();
        let generation = scope.generation;
        let query = self.query.clone();
        let latency = self.metrics.fetch_latency.clone();
        self.metrics.fetches.add(
            1,
            &[KeyValue::new("trigger", trigger.as_ref().to_string())],
        );
        debug!(job_id = %job_id, trigger = trigger.as_ref(), "fetching job");

        tokio::spawn(async move {
            let request_id = job_id.clone();
            let fetch = metrics::create_timed_future(
                async move { gateway.fetch_job(&request_id, &query).await },
                move |elapsed| latency.record(elapsed.as_secs_f64(), &[]),
            );
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = fetch => {
                    let _ = event_tx.send(TrackerEvent::JobFetched { job_id, generation, result });
                }
            }
        });

        self.snapshot.loading = true;
        self.publish();
    }

    fn handle_event(&mut self, event: TrackerEvent) {
        match event {
            TrackerEvent::JobFetched {
                job_id,
                generation,
                result,
            } => self.handle_job_fetched(job_id, generation, result),
            TrackerEvent::AnalysisReady {
                job_id,
                generation,
                analysis,
            } => self.handle_analysis_ready(job_id, generation, analysis),
        }
    }

    fn handle_job_fetched(
        &mut self,
        job_id: JobId,
        generation: u64,
        result: Result<JobHandle, GatewayError>,
    ) {
        let Some(scope) = self.scope.as_mut().filter(|s| s.owns(&job_id, generation)) else {
            debug!(job_id = %job_id, generation, "discarding response for superseded job");
            self.metrics.stale_responses.add(1, &[]);
            return;
        };
        scope.in_flight = scope.in_flight.saturating_sub(1);
        self.snapshot.loading = scope.in_flight > 0;

        match result {
            Ok(job) if job.id != job_id => {
                warn!(job_id = %job_id, returned = %job.id, "response is for a different job, discarding");
                self.metrics.stale_responses.add(1, &[]);
                self.publish();
            }
            Ok(job) => self.apply_job(job),
            Err(err) if err.is_not_found() => self.purge(),
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "failed to fetch job");
                self.metrics
                    .fetch_errors
                    .add(1, &[KeyValue::new("kind", err.kind())]);
                self.snapshot.error = Some(err.to_string());
                self.publish();
            }
        }
    }

    fn apply_job(&mut self, job: JobHandle) {
        match (self.snapshot.state, job.status) {
            (LifecycleState::Active, JobStatus::Completed) => {
                info!(job_id = %job.id, "job completed");
                self.snapshot.job = Some(job);
                self.snapshot.error = None;
                self.snapshot.state = LifecycleState::Completed;
                self.start_retention();
                self.start_analysis();
            }
            (LifecycleState::Active, JobStatus::Failed | JobStatus::Cancelled) => {
                info!(job_id = %job.id, status = %job.status, "job ended without completing, dismissing");
                self.release(LifecycleState::Dismissed);
                return;
            }
            (LifecycleState::Active, _) => {
                self.snapshot.job = Some(job);
                self.snapshot.error = None;
            }
            (LifecycleState::Completed, JobStatus::Completed) => {
                self.snapshot.job = Some(job);
                self.snapshot.error = None;
                // Retention keeps its original deadline.
                self.start_retention();
            }
            (LifecycleState::Completed, status) => {
                warn!(job_id = %job.id, status = %status, "completed job reported a different status, ignoring");
            }
            (state, _) => {
                debug!(state = %state, "response arrived while not tracking");
                return;
            }
        }
        self.reschedule_poll();
        self.publish();
    }

    fn start_retention(&mut self) {
        let Some(scope) = self.scope.as_mut() else {
            return;
        };
        if scope.retention_timer.arm_if_idle(self.config.retention) {
            debug!(job_id = %scope.job_id, retention = ?self.config.retention, "retention started");
        }
        self.snapshot.retention_deadline = scope.retention_timer.deadline();
    }

    fn start_analysis(&mut self) {
        let Some(aggregator) = self.deps.aggregator.clone() else {
            return;
        };
        let Some(scope) = self.scope.as_mut() else {
            return;
        };
        if scope.analysis_started {
            return;
        }
        scope.analysis_started = true;

        let event_tx = self.event_tx.clone();
        let cancel = scope.cancel.clone();
        let job_id = scope.job_id.clone();
        let generation = scope.generation;
        let job = self.snapshot.job.clone();
        self.snapshot.analysis_pending = true;

        tokio::spawn(
            async move {
                let analysis = tokio::select! {
                    _ = cancel.cancelled() => return,
                    analysis = aggregator.aggregate(&job_id, job.as_ref()) => analysis,
                };
                let _ = event_tx.send(TrackerEvent::AnalysisReady {
                    job_id,
                    generation,
                    analysis,
                });
            }
            .in_current_span(),
        );
    }

    fn handle_analysis_ready(
        &mut self,
        job_id: JobId,
        generation: u64,
        analysis: Option<DiffAnalysis>,
    ) {
        if !self
            .scope
            .as_ref()
            .is_some_and(|scope| scope.owns(&job_id, generation))
        {
            debug!(job_id = %job_id, "discarding analysis for superseded job");
            self.metrics.stale_responses.add(1, &[]);
            return;
        }
        match &analysis {
            Some(analysis) => info!(
                job_id = %job_id,
                source = %analysis.source,
                completed = analysis.completed_results(),
                "diff analysis ready"
            ),
            None => info!(job_id = %job_id, "no diff analysis available"),
        }
        self.snapshot.analysis = analysis;
        self.snapshot.analysis_pending = false;
        self.publish();
    }

    fn handle_signal(&mut self, signal: ScopeSignal) {
        match signal {
            ScopeSignal::PollDue => {
                self.issue_fetch(FetchTrigger::Poll);
                self.reschedule_poll();
            }
            ScopeSignal::RetentionElapsed => {
                if self.snapshot.state == LifecycleState::Completed {
                    info!(job_id = ?self.snapshot.job_id, "retention elapsed, dismissing");
                    self.metrics.retention_expiries.add(1, &[]);
                    self.release(LifecycleState::Dismissed);
                }
            }
            ScopeSignal::RefetchDue => {
                let Some(scope) = self.scope.as_mut() else {
                    return;
                };
                if scope.reconciler.close_window(scope.fetches_issued) {
                    self.issue_fetch(FetchTrigger::Push);
                } else {
                    debug!(job_id = %scope.job_id, "push refetch already covered by a later fetch");
                }
            }
            ScopeSignal::Push(frame) => {
                let Some(scope) = self.scope.as_mut() else {
                    return;
                };
                let verdict = scope.reconciler.on_frame(
                    &frame,
                    &scope.job_id,
                    self.snapshot.job.as_ref(),
                    scope.fetches_issued,
                );
                self.on_verdict(verdict);
            }
            ScopeSignal::PushLagged(skipped) => {
                let Some(scope) = self.scope.as_mut() else {
                    return;
                };
                warn!(job_id = %scope.job_id, skipped, "push subscription lagged, scheduling refetch");
                let verdict = scope.reconciler.on_lagged(scope.fetches_issued);
                self.on_verdict(verdict);
            }
            ScopeSignal::PushClosed => {
                if let Some(scope) = self.scope.as_mut() {
                    warn!(job_id = %scope.job_id, "push channel closed, continuing with polling only");
                    scope.push_rx = None;
                }
            }
        }
    }

    fn on_verdict(&mut self, verdict: FrameVerdict) {
        let Some(scope) = self.scope.as_mut() else {
            return;
        };
        match verdict {
            FrameVerdict::Ignored => self.metrics.push_frames_ignored.add(1, &[]),
            FrameVerdict::Scheduled => {
                scope.refetch_timer.arm_after(scope.reconciler.window());
                self.metrics.push_frames_accepted.add(1, &[]);
            }
            FrameVerdict::Collapsed => self.metrics.push_frames_collapsed.add(1, &[]),
        }
    }

    fn reschedule_poll(&mut self) {
        let Some(scope) = self.scope.as_mut() else {
            return;
        };
        let delay = self
            .config
            .poll
            .next_delay(self.snapshot.job.as_ref(), Utc::now());
        scope.poll_timer.arm_after(delay);
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot.clone());
    }
}
