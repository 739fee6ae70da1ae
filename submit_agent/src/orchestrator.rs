//! Job loop: pull a job, fan it out over targets, report back.

use crate::automation::ConversationController;
use crate::browser::SessionFactory;
use crate::catalog::TargetCatalog;
use crate::config::OrchestratorConfig;
use crate::error::AgentResult;
use std::future::Future;
use crate::events::{EventLevel, EventLog};
use crate::queue::QueueClient;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use submit_agent_types::{
    now_ms, BatchSummary, BusinessProfile, FailureReason, Job, JobStatus, SubmissionTarget,
    TargetResult,
};
use tokio::sync::watch;

/// What a processed job produced.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    /// Job identifier.
    pub job_id: String,
    /// Final status sent to the queue.
    pub status: JobStatus,
    /// Rollup sent to the queue.
    pub summary: BatchSummary,
    /// One result per attempted target, in target order.
    pub results: Vec<TargetResult>,
}

/// Pulls jobs from a queue and drives every target through the controller.
pub struct Orchestrator {
    queue: Arc<dyn QueueClient>,
    catalog: TargetCatalog,
    sessions: Arc<dyn SessionFactory>,
    controller: ConversationController,
    config: OrchestratorConfig,
    events: Arc<EventLog>,
}

impl Orchestrator {
    /// Create an orchestrator.
    pub fn new(
        queue: Arc<dyn QueueClient>,
        catalog: TargetCatalog,
        sessions: Arc<dyn SessionFactory>,
        controller: ConversationController,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            queue,
            catalog,
            sessions,
            controller,
            config,
            events: Arc::new(EventLog::disabled()),
        }
    }

    /// Send job level events to `events`.
    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Orchestrator settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Process at most one job. `Ok(None)` when the queue is empty.
    pub async fn run_once(&self) -> AgentResult<Option<JobReport>> {
        match self.queue.next_job().await? {
            Some(job) => Ok(Some(self.process_job(job).await)),
            None => Ok(None),
        }
    }

    /// Poll the queue until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A job in progress is always finished and reported before stopping.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!("worker loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    log::debug!("no job available");
                    self.config.idle_poll_interval
                }
                Err(e) => {
                    log::warn!("queue poll failed: {}", e);
                    self.config.queue_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("worker loop stopped");
    }

    /// Run every target of `job` and report completion.
    pub async fn process_job(&self, mut job: Job) -> JobReport {
        let started = Instant::now();
        job.transition(JobStatus::InProgress);

        let targets = self.catalog.resolve(job.item_count);
        log::info!(
            "job {}: {} target(s) for {}",
            job.id,
            targets.len(),
            job.payload.name
        );

        let results = if targets.is_empty() {
            log::warn!("job {}: no schedulable targets", job.id);
            job.transition(JobStatus::Failed);
            Vec::new()
        } else {
            let results = self.run_targets(&job, &targets).await;
            job.transition(JobStatus::Complete);
            results
        };

        let summary = BatchSummary::from_results(&results, started.elapsed());
        log::info!(
            "Submission results: {}/{} successful",
            summary.successful,
            summary.total
        );
        self.events
            .emit(
                &job.id,
                EventLevel::Info,
                format!("job {}", job.status),
                serde_json::to_value(summary).unwrap_or_default(),
            )
            .await;

        self.complete(&job.id, job.status, &summary).await;

        JobReport {
            job_id: job.id,
            status: job.status,
            summary,
            results,
        }
    }

    async fn run_targets(&self, job: &Job, targets: &[SubmissionTarget]) -> Vec<TargetResult> {
        let concurrency = self.config.max_concurrent_targets.max(1);
        let mut stream = futures::stream::iter(targets.iter().enumerate().map(|(i, target)| {
            let profile = &job.payload;
            async move {
                if i > 0 {
                    let delay = self.config.target_delay();
                    if !delay.is_zero() {
                        log::debug!("waiting {:?} before {}", delay, target.id);
                        tokio::time::sleep(delay).await;
                    }
                }
                self.attempt(target, profile).await
            }
        }))
        .buffered(concurrency);

        let mut results = Vec::with_capacity(targets.len());
        let mut delivered = 0;
        while let Some(result) = stream.next().await {
            log::info!(
                "job {}: {} {} ({})",
                job.id,
                result.target_name,
                result.status,
                result.message
            );
            results.push(result);
            if self.progress(&job.id, job.status, &results).await {
                delivered = results.len();
            }
        }

        // reports are cumulative, so one accepted report catches up on every miss
        if delivered < results.len() {
            self.deliver(&job.id, "final progress report", || {
                self.queue.report_progress(&job.id, job.status, &results)
            })
            .await;
        }
        results
    }

    /// One target in a fresh session that is always closed afterwards.
    async fn attempt(&self, target: &SubmissionTarget, profile: &BusinessProfile) -> TargetResult {
        let session = match self.sessions.open().await {
            Ok(session) => session,
            Err(e) => {
                log::error!("no browser session for {}: {}", target.id, e);
                return TargetResult::failed(
                    &target.id,
                    &target.name,
                    FailureReason::FatalBrowser,
                    format!("browser session unavailable: {}", e),
                    now_ms(),
                );
            }
        };

        let result = self.controller.run(session.as_ref(), target, profile).await;

        if let Err(e) = session.close().await {
            log::warn!("closing session for {} failed: {}", target.id, e);
        }
        result
    }

    /// Best-effort intermediate report. `false` when every attempt failed.
    async fn progress(&self, job_id: &str, status: JobStatus, results: &[TargetResult]) -> bool {
        let attempts = self.config.progress_attempts.max(1);
        for attempt in 1..=attempts {
            match self.queue.report_progress(job_id, status, results).await {
                Ok(()) => return true,
                Err(e) if attempt < attempts && e.is_transient() => {
                    log::warn!("progress report for {} failed (attempt {}): {}", job_id, attempt, e);
                    tokio::time::sleep(self.config.report_retry.delay_for(attempt - 1)).await;
                }
                Err(e) => {
                    log::warn!("progress report for {} deferred: {}", job_id, e);
                    return false;
                }
            }
        }
        false
    }

    async fn complete(&self, job_id: &str, status: JobStatus, summary: &BatchSummary) {
        let accepted = self
            .deliver(job_id, "completion report", || {
                self.queue.report_complete(job_id, status, summary)
            })
            .await;
        if accepted {
            log::info!("job {} reported {}", job_id, status);
        }
    }

    /// Send a report until the queue accepts it.
    ///
    /// Transient failures retry without limit on a growing backoff; a
    /// rejected report is abandoned after `report_retry.max_attempts`.
    async fn deliver<F, Fut>(&self, job_id: &str, what: &str, mut send: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AgentResult<()>>,
    {
        let retry = &self.config.report_retry;
        let mut attempt = 0usize;
        let mut rejected = 0usize;
        loop {
            match send().await {
                Ok(()) => return true,
                Err(e) if e.is_transient() => {
                    log::warn!("{} for job {} failed (attempt {}): {}", what, job_id, attempt + 1, e);
                }
                Err(e) => {
                    rejected += 1;
                    if rejected >= retry.max_attempts {
                        log::error!(
                            "{} for job {} abandoned after {} attempt(s): {}",
                            what,
                            job_id,
                            attempt + 1,
                            e
                        );
                        self.events
                            .emit(
                                job_id,
                                EventLevel::Error,
                                format!("{} abandoned", what),
                                serde_json::json!({ "error": e.to_string() }),
                            )
                            .await;
                        return false;
                    }
                    log::warn!("{} for job {} rejected (attempt {}): {}", what, job_id, attempt + 1, e);
                }
            }
            tokio::time::sleep(retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("catalog", &self.catalog.len())
            .field("controller", &self.controller)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
