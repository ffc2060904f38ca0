//! The batch job abstraction.

use crate::store::{PipelineStore, StoreError};
use chrono::FixedOffset;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// When a job should run. Cron-style schedules are interpreted in the
/// pipeline's local fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    /// Run at fixed intervals.
    Interval(Duration),
    /// Run once per hour at the given minute.
    HourlyAt { minute: u32 },
    /// Run once per day at the given local time.
    DailyAt { hour: u32, minute: u32 },
}

#[derive(Debug)]
pub enum JobError {
    Cancelled,
    ExecutionFailed(String),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Cancelled => write!(f, "Job was cancelled"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        JobError::ExecutionFailed(e.to_string())
    }
}

/// Shared context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn PipelineStore>,
    pub local_offset: FixedOffset,
    pub peak_hours: Vec<u32>,
    pub cancellation_token: CancellationToken,
}

impl JobContext {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        local_offset: FixedOffset,
        peak_hours: Vec<u32>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            local_offset,
            peak_hours,
            cancellation_token,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// A scheduled batch job.
///
/// Jobs are synchronous (store-bound) and run via `spawn_blocking`. They
/// must be idempotent: the scheduler may re-execute a window after a crash
/// and the same window must produce the same rows.
pub trait BatchJob: Send + Sync {
    /// Unique identifier, also used as the job_runs key.
    fn id(&self) -> &'static str;

    /// What this job does, for logs.
    fn description(&self) -> &'static str;

    fn schedule(&self) -> JobSchedule;

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
