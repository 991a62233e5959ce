use std::time::Duration;

use data_model::{JobHandle, JobId, PushFrame};
use if_chain::if_chain;
use strum::AsRefStr;

const UPDATE_PREFIXES: [&str; 4] = ["job", "jobs", "execution", "executions"];

/// What happened to an incoming push frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FrameVerdict {
    /// Not about the tracked job, or not an update.
    Ignored,
    /// Opened a debounce window; a refetch is due when it closes.
    Scheduled,
    /// Folded into the window that is already open.
    Collapsed,
}

/// Turns bursts of push frames into at most one refetch per debounce
/// window.
///
/// Fetch ordering is tracked with the tracker's issued-fetch counter rather
/// than wall time. A fetch that went out after the last frame of a window
/// suppresses the push refetch; one that went out before a later frame in
/// the window does not.
#[derive(Debug, Clone)]
pub struct PushReconciler {
    window: Duration,
    last_frame_at_fetch: Option<u64>,
}

impl PushReconciler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_frame_at_fetch: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_window_open(&self) -> bool {
        self.last_frame_at_fetch.is_some()
    }

    pub fn is_update_kind(kind: &str) -> bool {
        let first = kind
            .split(['.', '_', ':', '-'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        UPDATE_PREFIXES.contains(&first.as_str())
    }

    /// Whether the frame refers to `job_id`, directly or through one of the
    /// job's known executions.
    pub fn concerns(frame: &PushFrame, job_id: &JobId, job: Option<&JobHandle>) -> bool {
        if frame.job_id().as_ref() == Some(job_id) {
            return true;
        }
        if_chain! {
            if let Some(execution_id) = frame.execution_id();
            if let Some(job) = job;
            if &job.id == job_id;
            then {
                job.find_execution(&execution_id).is_some()
            } else {
                false
            }
        }
    }

    /// `fetches_issued` is the tracker's running count of fetches at the
    /// moment the frame is handled.
    pub fn on_frame(
        &mut self,
        frame: &PushFrame,
        job_id: &JobId,
        job: Option<&JobHandle>,
        fetches_issued: u64,
    ) -> FrameVerdict {
        if !Self::is_update_kind(&frame.kind) || !Self::concerns(frame, job_id, job) {
            return FrameVerdict::Ignored;
        }
        self.open(fetches_issued)
    }

    /// The subscription dropped frames; any of them may have been ours.
    pub fn on_lagged(&mut self, fetches_issued: u64) -> FrameVerdict {
        self.open(fetches_issued)
    }

    /// Closes the window. Returns true when the refetch still has to be
    /// issued, false when a fetch already went out after the window's last
    /// frame.
    pub fn close_window(&mut self, fetches_issued: u64) -> bool {
        match self.last_frame_at_fetch.take() {
            Some(last_frame_at) => fetches_issued <= last_frame_at,
            None => false,
        }
    }

    fn open(&mut self, fetches_issued: u64) -> FrameVerdict {
        let verdict = if self.last_frame_at_fetch.is_some() {
            FrameVerdict::Collapsed
        } else {
            FrameVerdict::Scheduled
        };
        self.last_frame_at_fetch = Some(fetches_issued);
        verdict
    }
}

#[cfg(test)]
mod tests {
    use data_model::{
        test_objects::tests::{mock_execution, mock_job},
        ExecutionId,
        ExecutionStatus,
        JobStatus,
    };
    use serde_json::json;

    use super::*;

    #[test]
    fn test_update_kinds() {
        for kind in [
            "job_updated",
            "job.status",
            "JOB:done",
            "jobs-changed",
            "execution_completed",
            "Executions.progress",
            "job",
        ] {
            assert!(PushReconciler::is_update_kind(kind), "{kind}");
        }
        for kind in ["heartbeat", "jobber_update", "", "provider.job_updated", "exec_done"] {
            assert!(!PushReconciler::is_update_kind(kind), "{kind}");
        }
    }

    #[test]
    fn test_frame_matching() {
        let job_id = JobId::from("job-1");
        let mut job = mock_job("job-1", JobStatus::Running, &["US"]);
        job.executions = vec![mock_execution("e-1", "job-1", "US", ExecutionStatus::Running)];

        assert!(PushReconciler::concerns(
            &PushFrame::for_job("job_updated", &job_id),
            &job_id,
            Some(&job)
        ));
        assert!(PushReconciler::concerns(
            &PushFrame::for_execution("execution_completed", &ExecutionId::from("e-1")),
            &job_id,
            Some(&job)
        ));
        assert!(!PushReconciler::concerns(
            &PushFrame::for_execution("execution_completed", &ExecutionId::from("e-9")),
            &job_id,
            Some(&job)
        ));
        assert!(!PushReconciler::concerns(
            &PushFrame::for_job("job_updated", &JobId::from("job-2")),
            &job_id,
            Some(&job)
        ));
        // Execution ids are unknown until the first response lands.
        assert!(!PushReconciler::concerns(
            &PushFrame::for_execution("execution_completed", &ExecutionId::from("e-1")),
            &job_id,
            None
        ));

        let nested = PushFrame {
            data: Some(json!({"job_id": "job-1"})),
            ..PushFrame::new("job_updated")
        };
        assert!(PushReconciler::concerns(&nested, &job_id, None));
    }

    #[test]
    fn test_burst_collapses_into_one_window() {
        let job_id = JobId::from("job-1");
        let mut reconciler = PushReconciler::new(Duration::from_millis(500));
        let frame = PushFrame::for_job("job_updated", &job_id);

        assert_eq!(reconciler.on_frame(&frame, &job_id, None, 3), FrameVerdict::Scheduled);
        assert_eq!(reconciler.on_frame(&frame, &job_id, None, 3), FrameVerdict::Collapsed);
        assert_eq!(
            reconciler.on_frame(&PushFrame::new("heartbeat"), &job_id, None, 3),
            FrameVerdict::Ignored
        );
        assert!(reconciler.close_window(3));
        assert!(!reconciler.is_window_open());
        assert!(!reconciler.close_window(3));
    }

    #[test]
    fn test_fetch_after_first_frame_skips_refetch() {
        let job_id = JobId::from("job-1");
        let mut reconciler = PushReconciler::new(Duration::from_millis(500));
        let frame = PushFrame::for_job("job_updated", &job_id);

        reconciler.on_frame(&frame, &job_id, None, 7);
        assert!(!reconciler.close_window(8));

        assert_eq!(reconciler.on_lagged(8), FrameVerdict::Scheduled);
        assert!(reconciler.close_window(8));
    }

    #[test]
    fn test_frame_after_poll_keeps_refetch() {
        let job_id = JobId::from("job-1");
        let mut reconciler = PushReconciler::new(Duration::from_millis(500));
        let frame = PushFrame::for_job("job_updated", &job_id);

        assert_eq!(reconciler.on_frame(&frame, &job_id, None, 4), FrameVerdict::Scheduled);
        // A poll goes out, then another frame lands in the same window.
        assert_eq!(reconciler.on_frame(&frame, &job_id, None, 5), FrameVerdict::Collapsed);
        assert!(reconciler.close_window(5));

        reconciler.on_frame(&frame, &job_id, None, 6);
        reconciler.on_frame(&frame, &job_id, None, 7);
        assert!(!reconciler.close_window(8));
    }
}
