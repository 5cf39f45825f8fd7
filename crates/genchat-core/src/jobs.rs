use std::time::Duration;

use async_trait::async_trait;
use genchat_contracts::JobStatus;
use tracing::{debug, info};

use crate::CoreError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_ATTEMPTS: u32 = 120;
/// Statuses meaning "keep polling". Anything else is terminal.
pub const PENDING_STATES: &[&str] =
    &["queued", "pending", "processing", "running", "generating", "in_progress"];

pub fn is_pending_status(status: &str) -> bool {
    let status = status.trim().to_ascii_lowercase();
    PENDING_STATES.contains(&status.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self { interval: DEFAULT_POLL_INTERVAL, max_attempts: DEFAULT_POLL_ATTEMPTS }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done(JobStatus),
    /// Ceiling reached while still pending. The job stays queryable by id.
    TimedOut { job_id: String, attempts: u32 },
}

#[async_trait]
pub trait JobPoller: Send + Sync {
    async fn poll(&self, job_id: &str) -> Result<JobStatus, CoreError>;
}

/// `created -> (poll)* -> done | timeout`, one poll in flight at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobLifecycle {
    policy: PollPolicy,
}

impl JobLifecycle {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub async fn run(&self, poller: &dyn JobPoller, job_id: &str) -> Result<JobOutcome, CoreError> {
        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.interval).await;
            let status = poller.poll(job_id).await?;
            debug!(
                event = "job.poll",
                job_id,
                attempt,
                status = status.status.as_deref().unwrap_or(""),
                progress = status.progress,
                done = status.done
            );
            if status.done {
                info!(event = "job.done", job_id, attempts = attempt);
                return Ok(JobOutcome::Done(status));
            }
        }

        info!(event = "job.timeout", job_id, attempts = self.policy.max_attempts);
        Ok(JobOutcome::TimedOut {
            job_id: job_id.to_string(),
            attempts: self.policy.max_attempts,
        })
    }
}
