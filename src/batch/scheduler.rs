//! Serial scheduler for batch jobs.
//!
//! Jobs run one at a time in registration order. The next trigger for each
//! job is recomputed from the completion time, so a trigger that fires
//! while a job is still running is skipped rather than queued.

use super::job::{BatchJob, JobContext, JobError, JobSchedule};
use super::local_to_utc;
use crate::ops::metrics;
use crate::store::JobRunStatus;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct BatchScheduler {
    jobs: Vec<Arc<dyn BatchJob>>,
    job_context: JobContext,
    run_on_startup: bool,
}

impl BatchScheduler {
    pub fn new(job_context: JobContext, run_on_startup: bool) -> Self {
        Self {
            jobs: Vec::new(),
            job_context,
            run_on_startup,
        }
    }

    pub fn register_job(&mut self, job: Arc<dyn BatchJob>) {
        info!("Registering batch job: {} - {}", job.id(), job.description());
        self.jobs.push(job);
    }

    /// Main scheduler loop. Runs until the context's token is cancelled.
    pub async fn run(self) {
        info!("Starting batch scheduler with {} jobs", self.jobs.len());

        if self.run_on_startup {
            info!("Running initial batch pass");
            for job in &self.jobs {
                if self.job_context.is_cancelled() {
                    break;
                }
                self.run_job(job).await;
            }
        }

        let mut next_runs: HashMap<&'static str, DateTime<Utc>> = self
            .jobs
            .iter()
            .map(|job| {
                (
                    job.id(),
                    next_run_after(Utc::now(), job.schedule(), self.job_context.local_offset),
                )
            })
            .collect();

        loop {
            let next_due = next_runs.values().min().copied().unwrap_or_else(|| {
                // No jobs registered: idle until cancelled.
                Utc::now() + chrono::Duration::hours(1)
            });
            let sleep_for = (next_due - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            debug!("Scheduler sleeping {:?} until next due job", sleep_for);

            tokio::select! {
                _ = self.job_context.cancellation_token.cancelled() => {
                    info!("Batch scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }

            for job in &self.jobs {
                if self.job_context.is_cancelled() {
                    break;
                }
                let due = next_runs
                    .get(job.id())
                    .map(|at| *at <= Utc::now())
                    .unwrap_or(false);
                if due {
                    self.run_job(job).await;
                    next_runs.insert(
                        job.id(),
                        next_run_after(Utc::now(), job.schedule(), self.job_context.local_offset),
                    );
                }
            }
        }

        info!("Batch scheduler stopped");
    }

    async fn run_job(&self, job: &Arc<dyn BatchJob>) {
        let run_id = match self.job_context.store.record_job_start(job.id()) {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to record start of job {}: {}", job.id(), e);
                None
            }
        };

        let job_id = job.id();
        info!("Starting batch job: {}", job_id);
        let started = std::time::Instant::now();
        let job = Arc::clone(job);
        let ctx = self.job_context.clone();
        let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
        let elapsed = started.elapsed();

        let (status, error_message) = match result {
            Ok(Ok(())) => {
                info!("Batch job {} completed in {:?}", job_id, elapsed);
                (JobRunStatus::Completed, None)
            }
            Ok(Err(JobError::Cancelled)) => {
                warn!("Batch job {} was cancelled", job_id);
                (JobRunStatus::Failed, Some("Cancelled".to_string()))
            }
            Ok(Err(e)) => {
                error!("Batch job {} failed: {}", job_id, e);
                (JobRunStatus::Failed, Some(e.to_string()))
            }
            Err(e) => {
                error!("Batch job {} panicked: {}", job_id, e);
                (JobRunStatus::Failed, Some(format!("Task panic: {}", e)))
            }
        };
        metrics::record_batch_job(job_id, status.as_str(), elapsed);

        if let Some(run_id) = run_id {
            if let Err(e) =
                self.job_context
                    .store
                    .record_job_finish(run_id, status, error_message)
            {
                error!("Failed to record finish of job {}: {}", job_id, e);
            }
        }
    }
}

/// The first instant strictly after `after` that matches the schedule.
pub fn next_run_after(
    after: DateTime<Utc>,
    schedule: JobSchedule,
    offset: FixedOffset,
) -> DateTime<Utc> {
    match schedule {
        JobSchedule::Interval(interval) => {
            after + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::hours(1))
        }
        JobSchedule::HourlyAt { minute } => {
            let local = after.with_timezone(&offset);
            let hour_start = local
                .date_naive()
                .and_hms_opt(local.hour(), 0, 0)
                .expect("valid hour start");
            let candidate = hour_start + chrono::Duration::minutes(minute as i64);
            let candidate = if local_to_utc(candidate, offset) <= after {
                candidate + chrono::Duration::hours(1)
            } else {
                candidate
            };
            local_to_utc(candidate, offset)
        }
        JobSchedule::DailyAt { hour, minute } => {
            let local = after.with_timezone(&offset);
            let candidate = local
                .date_naive()
                .and_hms_opt(hour, minute, 0)
                .expect("valid local schedule time");
            let candidate = if local_to_utc(candidate, offset) <= after {
                candidate + chrono::Duration::days(1)
            } else {
                candidate
            };
            local_to_utc(candidate, offset)
        }
    }
}
