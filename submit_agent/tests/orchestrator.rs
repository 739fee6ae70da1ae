mod common;

use common::{fast_config, harness, RecordingFactory, RecordingQueue, ScriptedDecisionService};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use submit_agent::{
    ActionDescriptor, BusinessProfile, Decision, FailureReason, Job, JobStatus, Orchestrator,
    OrchestratorConfig, SubmissionTarget, TargetCatalog, TargetStatus,
};
use tokio::sync::watch;

fn catalog() -> TargetCatalog {
    TargetCatalog::from_targets(vec![
        SubmissionTarget::new("a", "Alpha", "https://alpha.example/add"),
        SubmissionTarget::new("b", "Beta", "https://beta.example/new"),
        SubmissionTarget::new("c", "Gamma", "https://gamma.example/submit"),
    ])
}

fn job(id: &str, item_count: usize) -> Job {
    Job::new(id, BusinessProfile::new("Acme Plumbing"), item_count)
}

fn orchestrator(
    queue: Arc<RecordingQueue>,
    catalog: TargetCatalog,
    sessions: Arc<RecordingFactory>,
    decision: Arc<ScriptedDecisionService>,
) -> Orchestrator {
    Orchestrator::new(
        queue,
        catalog,
        sessions,
        harness(decision, None, fast_config()).controller,
        OrchestratorConfig::instant(),
    )
}

#[tokio::test]
async fn every_target_yields_one_result_in_order() {
    let queue = RecordingQueue::with_jobs(vec![job("j1", 3)]);
    let sessions = RecordingFactory::new();
    let decision = ScriptedDecisionService::repeating(Decision::text("Listing submitted."));
    let orch = orchestrator(queue.clone(), catalog(), sessions.clone(), decision);

    let report = orch.run_once().await.unwrap().unwrap();

    assert_eq!(report.job_id, "j1");
    assert_eq!(report.status, JobStatus::Complete);
    let ids: Vec<&str> = report.results.iter().map(|r| r.target_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.successful, 3);
    assert_eq!(report.summary.failed, 0);

    let progress = queue.progress();
    assert_eq!(
        progress.iter().map(|p| p.2).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(progress.iter().all(|p| p.1 == JobStatus::InProgress));

    let completions = queue.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].1, JobStatus::Complete);
    assert_eq!(completions[0].2.successful, 3);

    let opened = sessions.sessions();
    assert_eq!(opened.len(), 3);
    assert!(opened.iter().all(|s| s.closed()));
}

#[tokio::test]
async fn all_failed_targets_still_complete_the_job() {
    let queue = RecordingQueue::with_jobs(vec![job("j2", 0)]);
    let sessions = RecordingFactory::new();
    let decision = ScriptedDecisionService::repeating(Decision::text("Let me try again later"));
    let orch = orchestrator(queue.clone(), catalog(), sessions.clone(), decision);

    let report = orch.run_once().await.unwrap().unwrap();

    assert_eq!(report.status, JobStatus::Complete);
    assert_eq!(report.summary.successful, 0);
    assert_eq!(report.summary.failed, 3);
    assert!(report
        .results
        .iter()
        .all(|r| r.reason == Some(FailureReason::TaskIncomplete)));
    assert!(sessions.sessions().iter().all(|s| s.closed()));
}

#[tokio::test]
async fn unresolvable_targets_fail_the_job() {
    let queue = RecordingQueue::with_jobs(vec![job("j3", 5)]);
    let sessions = RecordingFactory::new();
    let decision = ScriptedDecisionService::repeating(Decision::text("done"));
    let orch = orchestrator(
        queue.clone(),
        TargetCatalog::default(),
        sessions.clone(),
        decision,
    );

    let report = orch.run_once().await.unwrap().unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert!(report.results.is_empty());
    assert_eq!(queue.completions()[0].1, JobStatus::Failed);
    assert!(sessions.sessions().is_empty());
}

#[tokio::test]
async fn item_count_limits_targets() {
    let queue = RecordingQueue::with_jobs(vec![job("j4", 2)]);
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = orchestrator(queue, catalog(), RecordingFactory::new(), decision);

    let report = orch.run_once().await.unwrap().unwrap();
    assert_eq!(report.results.len(), 2);
}

#[tokio::test]
async fn session_failures_become_error_results() {
    let queue = RecordingQueue::with_jobs(vec![job("j5", 2)]);
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = orchestrator(queue.clone(), catalog(), RecordingFactory::failing(), decision.clone());

    let report = orch.run_once().await.unwrap().unwrap();

    assert_eq!(report.status, JobStatus::Complete);
    assert!(report
        .results
        .iter()
        .all(|r| r.status == TargetStatus::Error && r.reason == Some(FailureReason::FatalBrowser)));
    assert_eq!(decision.calls(), 0);
}

#[tokio::test]
async fn max_turns_still_reports_each_target_once() {
    let queue = RecordingQueue::with_jobs(vec![job("j6", 2)]);
    let decision = ScriptedDecisionService::repeating(Decision::actions(vec![
        ActionDescriptor::scroll(Default::default()),
    ]));
    let orch = orchestrator(queue.clone(), catalog(), RecordingFactory::new(), decision);

    let report = orch.run_once().await.unwrap().unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(report
        .results
        .iter()
        .all(|r| r.reason == Some(FailureReason::MaxTurnsReached)));
    assert_eq!(queue.completions().len(), 1);
}

#[tokio::test]
async fn completion_is_retried_until_accepted() {
    let queue = RecordingQueue::flaky(vec![job("j7", 1)], 5, 0);
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = orchestrator(queue.clone(), catalog(), RecordingFactory::new(), decision);

    orch.run_once().await.unwrap();

    // more transient failures than report_retry.max_attempts
    assert_eq!(queue.completion_calls.load(Ordering::SeqCst), 6);
    assert_eq!(queue.completions().len(), 1);
}

#[tokio::test]
async fn rejected_completion_does_not_stall_the_worker() {
    let queue = RecordingQueue::rejecting(vec![job("j7a", 1), job("j7b", 1)]);
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = orchestrator(queue.clone(), catalog(), RecordingFactory::new(), decision);
    let attempts = orch.config().report_retry.max_attempts;

    let first = tokio::time::timeout(Duration::from_secs(5), orch.run_once())
        .await
        .expect("a rejected completion must not block the job loop")
        .unwrap()
        .unwrap();
    assert_eq!(first.job_id, "j7a");
    assert_eq!(queue.completion_calls.load(Ordering::SeqCst), attempts);
    assert!(queue.completions().is_empty());

    let second = tokio::time::timeout(Duration::from_secs(5), orch.run_once())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.job_id, "j7b");
    assert_eq!(queue.completion_calls.load(Ordering::SeqCst), 2 * attempts);
}

#[tokio::test]
async fn missed_progress_is_delivered_before_completion() {
    // three failed attempts for each of the two per-target reports
    let queue = RecordingQueue::flaky(vec![job("j8", 2)], 0, 6);
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = orchestrator(queue.clone(), catalog(), RecordingFactory::new(), decision);

    let report = orch.run_once().await.unwrap().unwrap();

    assert_eq!(report.status, JobStatus::Complete);
    assert_eq!(queue.progress_calls.load(Ordering::SeqCst), 7);
    assert_eq!(
        queue.progress(),
        vec![("j8".to_string(), JobStatus::InProgress, 2)]
    );
    assert_eq!(queue.completions().len(), 1);
}

#[tokio::test]
async fn deferred_progress_catches_up_on_the_next_report() {
    // only the first target's report fails
    let queue = RecordingQueue::flaky(vec![job("j8b", 2)], 0, 3);
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = orchestrator(queue.clone(), catalog(), RecordingFactory::new(), decision);

    orch.run_once().await.unwrap();

    assert_eq!(queue.progress_calls.load(Ordering::SeqCst), 4);
    assert_eq!(queue.progress().iter().map(|p| p.2).collect::<Vec<_>>(), vec![2]);
}

#[tokio::test]
async fn concurrent_targets_keep_result_order() {
    let queue = RecordingQueue::with_jobs(vec![job("j11", 3)]);
    let sessions = RecordingFactory::with_navigate_delays(vec![
        ("alpha.example", Duration::from_millis(200)),
        ("beta.example", Duration::from_millis(10)),
        ("gamma.example", Duration::from_millis(10)),
    ]);
    let decision = ScriptedDecisionService::repeating(Decision::text("Listing submitted."));
    let orch = Orchestrator::new(
        queue.clone(),
        catalog(),
        sessions.clone(),
        harness(decision.clone(), None, fast_config()).controller,
        OrchestratorConfig::instant().with_max_concurrent_targets(2),
    );

    let report = orch.run_once().await.unwrap().unwrap();

    let ids: Vec<&str> = report.results.iter().map(|r| r.target_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(report.results.iter().all(|r| r.status == TargetStatus::Submitted));
    assert_eq!(
        queue.progress().iter().map(|p| p.2).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(decision.calls(), 3);

    // beta finished while alpha was still loading
    let closed = sessions.gauge.closed_urls();
    assert_eq!(closed.len(), 3);
    assert_eq!(closed[0], "https://beta.example/new");
    assert_eq!(sessions.gauge.peak(), 2);
    assert_eq!(sessions.gauge.active(), 0);

    let opened = sessions.sessions();
    assert_eq!(opened.len(), 3);
    assert!(opened.iter().all(|s| s.closed()));
}

#[tokio::test]
async fn empty_queue_yields_nothing() {
    let queue = RecordingQueue::with_jobs(Vec::new());
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = orchestrator(queue, catalog(), RecordingFactory::new(), decision);

    assert!(orch.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn run_forever_drains_jobs_and_stops_on_signal() {
    let queue = RecordingQueue::with_jobs(vec![job("j9", 1), job("j10", 1)]);
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = Orchestrator::new(
        queue.clone(),
        catalog(),
        RecordingFactory::new(),
        harness(decision, None, fast_config()).controller,
        OrchestratorConfig::instant().with_idle_poll_interval(Duration::from_millis(10)),
    );
    let (stop, shutdown) = watch::channel(false);

    let watcher = {
        let queue = queue.clone();
        async move {
            while queue.completions().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stop.send(true).unwrap();
        }
    };

    tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(orch.run_forever(shutdown), watcher) },
    )
    .await
    .unwrap();

    let ids: Vec<String> = queue.completions().into_iter().map(|c| c.0).collect();
    assert_eq!(ids, vec!["j9".to_string(), "j10".to_string()]);
}

#[tokio::test]
async fn run_forever_stops_when_sender_is_dropped() {
    let queue = RecordingQueue::with_jobs(Vec::new());
    let decision = ScriptedDecisionService::repeating(Decision::text("Submitted!"));
    let orch = Orchestrator::new(
        queue,
        catalog(),
        RecordingFactory::new(),
        harness(decision, None, fast_config()).controller,
        OrchestratorConfig::instant().with_idle_poll_interval(Duration::from_secs(3600)),
    );
    let (stop, shutdown) = watch::channel(false);
    drop(stop);

    tokio::time::timeout(Duration::from_secs(5), orch.run_forever(shutdown))
        .await
        .unwrap();
}
