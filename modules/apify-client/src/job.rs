// Three-phase job driver: submit a run, poll it at a fixed interval, fetch
// the dataset. Every phase races the caller's cancellation token and the
// whole sequence sits under one deadline. Nothing here is retried.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::types::{InstagramScraperInput, JobRun, RunData, RunStatus};
use crate::RunApi;

/// Poll cadence and overall time bound for one job.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// End-to-end bound on submit + poll + retrieve. `None` leaves only the attempt budget.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
            deadline: Some(Duration::from_secs(5 * 60 + 60)),
        }
    }
}

/// Drives one Apify run per call. Holds no per-call state, so any number of
/// fetches can run concurrently against the same client.
pub struct JobClient<A> {
    api: A,
    policy: PollPolicy,
}

impl<A: RunApi> JobClient<A> {
    pub fn new(api: A, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    /// Scrape a profile end-to-end and return the unnormalized dataset.
    pub async fn fetch_raw_posts(
        &self,
        username: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, JobError> {
        let job = self.run_job(username, max_results, cancel);
        match self.policy.deadline {
            Some(deadline) => tokio::time::timeout(deadline, job)
                .await
                .map_err(|_| {
                    warn!(username, secs = deadline.as_secs(), "Apify job hit its deadline");
                    JobError::DeadlineExceeded {
                        secs: deadline.as_secs(),
                    }
                })?,
            None => job.await,
        }
    }

    async fn run_job(
        &self,
        username: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, JobError> {
        info!(username, max_results, "Starting Instagram profile scrape");

        let input = InstagramScraperInput::profile_posts(username, max_results);
        let run = cancellable(cancel, None, self.api.start_run(&input))
            .await?
            .map_err(|e| JobError::SubmitFailed {
                status: e.status(),
                message: e.to_string(),
            })?;

        let mut job = JobRun {
            run_id: run.id.clone(),
            status: run.run_status(),
        };
        info!(run_id = %job.run_id, "Apify run started, polling for completion");

        let completed = self.poll_until_finished(&mut job, cancel).await?;
        info!(
            run_id = %completed.id,
            dataset_id = ?completed.default_dataset_id,
            "Run completed, fetching results"
        );

        let items = cancellable(
            cancel,
            Some(job.run_id.as_str()),
            self.api.get_dataset_items(&completed),
        )
        .await?
        .map_err(|e| JobError::RetrieveFailed {
            run_id: job.run_id.clone(),
            status: e.status(),
            message: e.to_string(),
        })?;

        let count = items.as_array().map(Vec::len);
        info!(run_id = %job.run_id, ?count, "Fetched Instagram dataset");
        Ok(items)
    }

    async fn poll_until_finished(
        &self,
        job: &mut JobRun,
        cancel: &CancellationToken,
    ) -> Result<RunData, JobError> {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            let run = cancellable(cancel, Some(job.run_id.as_str()), self.api.get_run(&job.run_id))
                .await?
                .map_err(|e| JobError::StatusCheckFailed {
                    run_id: job.run_id.clone(),
                    status: e.status(),
                    message: e.to_string(),
                })?;

            job.status = run.run_status();
            match job.status {
                RunStatus::Succeeded => return Ok(run),
                RunStatus::Failed => {
                    return Err(JobError::RunFailed {
                        run_id: job.run_id.clone(),
                        status: run.status,
                    })
                }
                RunStatus::TimedOut => {
                    return Err(JobError::RunTimedOut {
                        run_id: job.run_id.clone(),
                    })
                }
                RunStatus::Running => {
                    debug!(run_id = %job.run_id, attempt, status = %run.status, "Run still in progress");
                    if attempt < max_attempts {
                        cancellable(
                            cancel,
                            Some(job.run_id.as_str()),
                            tokio::time::sleep(self.policy.interval),
                        )
                        .await?;
                    }
                }
            }
        }

        Err(JobError::PollTimeout {
            run_id: job.run_id.clone(),
            attempts: max_attempts,
        })
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    run_id: Option<&str>,
    fut: F,
) -> Result<F::Output, JobError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobError::Cancelled {
            run_id: run_id.map(String::from),
        }),
        out = fut => Ok(out),
    }
}
