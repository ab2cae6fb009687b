//! Cadence-driven REST job scheduler.
//!
//! A coarse poll tick checks every job; a job runs when at least its cadence
//! has elapsed since its previous run. Cadence resolution is therefore bounded
//! below by the poll interval and drift is not corrected.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{RestClient, RestError};
use crate::application::jobs::{JobDefinition, RequestSpec};
use crate::application::ports::SharedRepository;
use crate::application::service::IngestLoop;
use crate::infrastructure::metrics::{self, RestOutcome};

/// Scheduler counters, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    jobs_run: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerSnapshot {
    /// Poll ticks completed.
    pub cycles: u64,
    /// Job runs started.
    pub jobs_run: u64,
    /// Requests processed successfully.
    pub requests_succeeded: u64,
    /// Requests abandoned or failed.
    pub requests_failed: u64,
}

impl SchedulerStats {
    /// Read the counters.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            jobs_run: self.jobs_run.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Runs the job catalog forever at a fixed poll tick.
pub struct RestScheduler {
    jobs: Vec<JobDefinition>,
    tickers: Vec<String>,
    client: RestClient,
    repository: SharedRepository,
    poll_interval: Duration,
    last_run: HashMap<String, Instant>,
    stats: Arc<SchedulerStats>,
}

impl RestScheduler {
    /// Create a scheduler. Every job is due on the first tick.
    #[must_use]
    pub fn new(
        jobs: Vec<JobDefinition>,
        tickers: Vec<String>,
        client: RestClient,
        repository: SharedRepository,
        poll_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            tickers,
            client,
            repository,
            poll_interval,
            last_run: HashMap::new(),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    /// Jobs in the catalog.
    #[must_use]
    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires. Cancellation interrupts any pending sleep,
    /// rate limiter wait or HTTP call.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            jobs = self.jobs.len(),
            tickers = self.tickers.len(),
            poll_interval_ms = self.poll_interval.as_millis(),
            "REST scheduler started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = self.run_due_jobs(Instant::now()) => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("REST scheduler stopped");
    }

    /// Run every job due at `now`, one request at a time.
    ///
    /// Returns the number of jobs that ran.
    pub async fn run_due_jobs(&mut self, now: Instant) -> usize {
        let due: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| self.is_due(job, now))
            .map(|(idx, _)| idx)
            .collect();

        for &idx in &due {
            let job = self.jobs[idx].clone();
            self.stats.jobs_run.fetch_add(1, Ordering::Relaxed);
            self.execute_job(&job).await;
            self.last_run.insert(job.name.clone(), now);
        }

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        due.len()
    }

    fn is_due(&self, job: &JobDefinition, now: Instant) -> bool {
        self.last_run
            .get(&job.name)
            .is_none_or(|last| now.saturating_duration_since(*last) >= job.cadence)
    }

    async fn execute_job(&self, job: &JobDefinition) {
        let requests = job.requests(&self.tickers);
        tracing::debug!(job = %job.name, requests = requests.len(), "Running job");

        for spec in &requests {
            let outcome = match self.execute_request(job, spec).await {
                Ok(()) => {
                    self.stats.requests_succeeded.fetch_add(1, Ordering::Relaxed);
                    RestOutcome::Success
                }
                Err(e) => {
                    self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                    log_failure(spec, &e);
                    outcome_for(&e)
                }
            };
            metrics::record_rest_request(&job.name, outcome);
        }
    }

    async fn execute_request(&self, job: &JobDefinition, spec: &RequestSpec) -> Result<(), RestError> {
        let payload = self.client.fetch(spec).await?;
        job.processor
            .process(payload, spec, self.repository.as_ref())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IngestLoop for RestScheduler {
    fn name(&self) -> &'static str {
        "rest_scheduler"
    }

    async fn run_until_cancelled(self: Box<Self>, cancel: CancellationToken) {
        (*self).run(cancel).await;
    }
}

impl std::fmt::Debug for RestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestScheduler")
            .field("jobs", &self.jobs.len())
            .field("tickers", &self.tickers)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

fn log_failure(spec: &RequestSpec, error: &RestError) {
    match error {
        RestError::Rejected { status, .. } => {
            tracing::warn!(request = %spec.name, status, error = %error, "Request rejected, abandoning");
        }
        RestError::RateLimited { attempts } => {
            tracing::warn!(request = %spec.name, attempts, "Still rate limited, skipping this cycle");
        }
        _ => tracing::error!(request = %spec.name, error = %error, "Request failed"),
    }
}

const fn outcome_for(error: &RestError) -> RestOutcome {
    match error {
        RestError::RateLimited { .. } | RestError::RateLimit(_) => RestOutcome::RateLimited,
        RestError::Rejected { .. } => RestOutcome::ClientError,
        RestError::Server { .. } => RestOutcome::ServerError,
        RestError::Network { .. } | RestError::Client(_) => RestOutcome::NetworkError,
        RestError::Decode(_) => RestOutcome::DecodeError,
        RestError::Process(_) => RestOutcome::ProcessorError,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::jobs::{RawPayloadProcessor, RequestBuilder};
    use crate::application::ports::MockRepository;
    use crate::infrastructure::rate_limit::TokenBucket;
    use crate::infrastructure::rest::RetryPolicy;

    fn job(name: &str, secs: u64) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            cadence: Duration::from_secs(secs),
            builder: RequestBuilder::PerTicker {
                endpoint_key: name.to_string(),
                path_template: "/api/stock/{ticker}/x".to_string(),
                params: Vec::new(),
            },
            processor: Arc::new(RawPayloadProcessor),
        }
    }

    fn scheduler(jobs: Vec<JobDefinition>) -> RestScheduler {
        let limiter = Arc::new(TokenBucket::new(10.0, 1.0).unwrap());
        let client = RestClient::new(
            "http://127.0.0.1:9",
            "token",
            Duration::from_millis(50),
            limiter,
            RetryPolicy::default(),
        )
        .unwrap();
        // No tickers, so per-ticker jobs build zero requests.
        RestScheduler::new(
            jobs,
            Vec::new(),
            client,
            Arc::new(MockRepository::new()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_run_when_cadence_elapsed() {
        let mut scheduler = scheduler(vec![job("fast", 10), job("slow", 60)]);
        let start = Instant::now();

        assert_eq!(scheduler.run_due_jobs(start).await, 2);
        assert_eq!(scheduler.run_due_jobs(start + Duration::from_secs(5)).await, 0);
        assert_eq!(scheduler.run_due_jobs(start + Duration::from_secs(10)).await, 1);
        assert_eq!(scheduler.run_due_jobs(start + Duration::from_secs(60)).await, 2);

        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.cycles, 4);
        assert_eq!(stats.jobs_run, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let scheduler = scheduler(vec![job("fast", 10)]);
        let stats = scheduler.stats();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(stats.snapshot().cycles >= 2);
    }

    #[test]
    fn outcomes_map_error_classes() {
        assert_eq!(
            outcome_for(&RestError::Rejected {
                status: 404,
                body: String::new()
            }),
            RestOutcome::ClientError
        );
        assert_eq!(
            outcome_for(&RestError::RateLimited { attempts: 3 }),
            RestOutcome::RateLimited
        );
        assert_eq!(
            outcome_for(&RestError::Decode("eof".to_string())),
            RestOutcome::DecodeError
        );
    }
}
