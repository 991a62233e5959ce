use std::future::pending;

use beacon_utils::Deadline;
use data_model::{JobId, PushFrame};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::events::ScopeSignal;
use crate::push_reconciler::PushReconciler;

/// Everything that exists only while one job is tracked. Dropping the
/// scope cancels its in-flight fetches and analysis, and its timers and
/// push subscription go with it.
pub(super) struct JobScope {
    pub job_id: JobId,
    pub generation: u64,
    pub cancel: CancellationToken,
    pub poll_timer: Deadline,
    pub retention_timer: Deadline,
    pub refetch_timer: Deadline,
    pub push_rx: Option<broadcast::Receiver<PushFrame>>,
    pub reconciler: PushReconciler,
    pub in_flight: usize,
    pub fetches_issued: u64,
    pub analysis_started: bool,
}

impl JobScope {
    pub fn new(
        job_id: JobId,
        generation: u64,
        push_rx: Option<broadcast::Receiver<PushFrame>>,
        reconciler: PushReconciler,
    ) -> Self {
        Self {
            job_id,
            generation,
            cancel: CancellationToken::new(),
            poll_timer: Deadline::new(),
            retention_timer: Deadline::new(),
            refetch_timer: Deadline::new(),
            push_rx,
            reconciler,
            in_flight: 0,
            fetches_issued: 0,
            analysis_started: false,
        }
    }

    pub fn owns(&self, job_id: &JobId, generation: u64) -> bool {
        self.generation == generation && &self.job_id == job_id
    }

    pub async fn next_signal(&mut self) -> ScopeSignal {
        tokio::select! {
            _ = self.poll_timer.fired() => ScopeSignal::PollDue,
            _ = self.retention_timer.fired() => ScopeSignal::RetentionElapsed,
            _ = self.refetch_timer.fired() => ScopeSignal::RefetchDue,
            signal = next_frame(&mut self.push_rx) => signal,
        }
    }
}

impl Drop for JobScope {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn next_frame(push_rx: &mut Option<broadcast::Receiver<PushFrame>>) -> ScopeSignal {
    let Some(rx) = push_rx else {
        return pending().await;
    };
    match rx.recv().await {
        Ok(frame) => ScopeSignal::Push(frame),
        Err(RecvError::Lagged(skipped)) => ScopeSignal::PushLagged(skipped),
        Err(RecvError::Closed) => ScopeSignal::PushClosed,
    }
}

/// Waits on the current scope, or forever when nothing is tracked.
pub(super) async fn next_scope_signal(scope: &mut Option<JobScope>) -> ScopeSignal {
    match scope {
        Some(scope) => scope.next_signal().await,
        None => pending().await,
    }
}
