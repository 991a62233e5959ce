//! Commands and events for the JobTracker.

use data_model::{DiffAnalysis, JobHandle, JobId, PushFrame};
use gateway::GatewayError;
use strum::AsRefStr;

/// Commands sent TO the tracker (from the handle).
#[derive(Debug)]
pub enum TrackerCommand {
    /// Start tracking `job_id`, releasing whatever was tracked before.
    Adopt { job_id: JobId },
    Dismiss,
    /// Fetch the tracked job now.
    Refresh,
    Shutdown,
}

/// Events sent TO the tracker (from background tokio tasks).
#[allow(clippy::large_enum_variant)]
pub(super) enum TrackerEvent {
    JobFetched {
        job_id: JobId,
        generation: u64,
        result: Result<JobHandle, GatewayError>,
    },
    AnalysisReady {
        job_id: JobId,
        generation: u64,
        analysis: Option<DiffAnalysis>,
    },
}

/// What woke the tracker up on behalf of the current job scope.
pub(super) enum ScopeSignal {
    PollDue,
    RetentionElapsed,
    RefetchDue,
    Push(PushFrame),
    PushLagged(u64),
    PushClosed,
}

/// Why a fetch was issued. Used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub(super) enum FetchTrigger {
    Adopt,
    Poll,
    Push,
    Manual,
}
