#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use submit_agent::{
    AgentError, AgentResult, AuditSink, BatchSummary, BrowserSession, CaptchaConfig,
    CaptchaSolver, ControllerConfig, ConversationController, Decision,
    DecisionRequest, DecisionService, EvidenceCapturer, ExecutorConfig, Job, JobStatus,
    MemoryAuditLog, MemoryEvidenceStore, QueueClient, RetryConfig, SafetyDecisionRecord,
    SafetyGate, SessionFactory, SolveStatus, TargetResult, Viewport,
};

/// Everything a fake session was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String),
    GoBack,
    Click(f64, f64),
    ClearFocused,
    TypeText(String),
    PressKey(String),
    Scroll(f64, f64),
    MouseMove(f64, f64),
    MouseDown(f64, f64),
    MouseUp(f64, f64),
    Close,
}

#[derive(Debug, Default)]
struct SessionState {
    calls: Mutex<Vec<Call>>,
    url: Mutex<Option<String>>,
    html: Mutex<String>,
    screenshots: AtomicUsize,
}

/// Sessions open right now, the most ever open at once, and close order.
#[derive(Debug, Default)]
pub struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    closed_urls: Mutex<Vec<String>>,
}

impl Gauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn closed_urls(&self) -> Vec<String> {
        self.closed_urls.lock().clone()
    }

    fn opened(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }
}

/// In-memory browser session. Clones share state.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    state: Arc<SessionState>,
    viewport: Viewport,
    broken_clicks: bool,
    fatal_clicks: bool,
    navigate_delays: Arc<Vec<(String, Duration)>>,
    gauge: Option<Arc<Gauge>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SessionState::default()),
            viewport: Viewport::new(1000, 500),
            broken_clicks: false,
            fatal_clicks: false,
            navigate_delays: Arc::new(Vec::new()),
            gauge: None,
        }
    }

    pub fn with_html(self, html: &str) -> Self {
        *self.state.html.lock() = html.to_string();
        self
    }

    pub fn with_broken_clicks(mut self) -> Self {
        self.broken_clicks = true;
        self
    }

    pub fn with_fatal_clicks(mut self) -> Self {
        self.fatal_clicks = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn clicks(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Click(..)))
            .count()
    }

    pub fn closed(&self) -> bool {
        self.calls().contains(&Call::Close)
    }

    pub fn screenshots(&self) -> usize {
        self.state.screenshots.load(Ordering::SeqCst)
    }

    fn push(&self, call: Call) {
        self.state.calls.lock().push(call);
    }
}

#[async_trait]
impl BrowserSession for RecordingSession {
    async fn navigate(&self, url: &str) -> AgentResult<()> {
        let delay = self
            .navigate_delays
            .iter()
            .find(|(host, _)| url.contains(host.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.push(Call::Navigate(url.to_string()));
        *self.state.url.lock() = Some(url.to_string());
        Ok(())
    }

    async fn go_back(&self) -> AgentResult<()> {
        self.push(Call::GoBack);
        Ok(())
    }

    async fn current_url(&self) -> AgentResult<Option<String>> {
        Ok(self.state.url.lock().clone())
    }

    async fn html(&self) -> AgentResult<String> {
        Ok(self.state.html.lock().clone())
    }

    async fn screenshot(&self) -> AgentResult<Vec<u8>> {
        self.state.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(b"\x89PNG\r\n\x1a\nfake".to_vec())
    }

    async fn viewport(&self) -> AgentResult<Viewport> {
        Ok(self.viewport)
    }

    async fn click(&self, x: f64, y: f64) -> AgentResult<()> {
        if self.fatal_clicks {
            return Err(AgentError::FatalBrowser("target crashed".into()));
        }
        if self.broken_clicks {
            return Err(AgentError::Browser("node detached".into()));
        }
        self.push(Call::Click(x, y));
        Ok(())
    }

    async fn clear_focused(&self) -> AgentResult<()> {
        self.push(Call::ClearFocused);
        Ok(())
    }

    async fn type_text(&self, text: &str) -> AgentResult<()> {
        self.push(Call::TypeText(text.to_string()));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> AgentResult<()> {
        self.push(Call::PressKey(key.to_string()));
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> AgentResult<()> {
        self.push(Call::Scroll(dx, dy));
        Ok(())
    }

    async fn mouse_move(&self, x: f64, y: f64) -> AgentResult<()> {
        self.push(Call::MouseMove(x, y));
        Ok(())
    }

    async fn mouse_down(&self, x: f64, y: f64) -> AgentResult<()> {
        self.push(Call::MouseDown(x, y));
        Ok(())
    }

    async fn mouse_up(&self, x: f64, y: f64) -> AgentResult<()> {
        self.push(Call::MouseUp(x, y));
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> AgentResult<()> {
        Ok(())
    }

    async fn close(&self) -> AgentResult<()> {
        self.push(Call::Close);
        if let Some(gauge) = &self.gauge {
            gauge.active.fetch_sub(1, Ordering::SeqCst);
            let url = self.state.url.lock().clone().unwrap_or_default();
            gauge.closed_urls.lock().push(url);
        }
        Ok(())
    }
}

/// Hands out recording sessions and keeps a handle on each.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    opened: Mutex<Vec<RecordingSession>>,
    fail_open: bool,
    navigate_delays: Arc<Vec<(String, Duration)>>,
    pub gauge: Arc<Gauge>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Navigation to a URL containing a listed host takes that long.
    pub fn with_navigate_delays(delays: Vec<(&str, Duration)>) -> Arc<Self> {
        Arc::new(Self {
            navigate_delays: Arc::new(
                delays
                    .into_iter()
                    .map(|(host, delay)| (host.to_string(), delay))
                    .collect(),
            ),
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_open: true,
            ..Self::default()
        })
    }

    pub fn sessions(&self) -> Vec<RecordingSession> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for RecordingFactory {
    async fn open(&self) -> AgentResult<Box<dyn BrowserSession>> {
        if self.fail_open {
            return Err(AgentError::FatalBrowser("browser is gone".into()));
        }
        let mut session = RecordingSession::new();
        session.navigate_delays = self.navigate_delays.clone();
        session.gauge = Some(self.gauge.clone());
        self.gauge.opened();
        self.opened.lock().push(session.clone());
        Ok(Box::new(session))
    }
}

/// What the decision service was shown.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub instruction: String,
    pub history_len: usize,
    pub observation: submit_agent::Observation,
    pub description: String,
}

/// Replies from a script, then repeats `fallback` forever.
pub struct ScriptedDecisionService {
    replies: Mutex<VecDeque<AgentResult<Decision>>>,
    fallback: Option<Decision>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedDecisionService {
    pub fn new(replies: Vec<AgentResult<Decision>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(replies: Vec<Decision>) -> Arc<Self> {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    pub fn repeating(decision: Decision) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(decision),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl DecisionService for ScriptedDecisionService {
    async fn decide(&self, request: &DecisionRequest<'_>) -> AgentResult<Decision> {
        self.seen.lock().push(SeenRequest {
            instruction: request.instruction.to_string(),
            history_len: request.history.len(),
            observation: request.observation.clone(),
            description: request.observation.describe(),
        });
        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => reply,
            None => match &self.fallback {
                Some(decision) => Ok(decision.clone()),
                None => Err(AgentError::Remote("script exhausted".into())),
            },
        }
    }

    fn service_name(&self) -> &'static str {
        "scripted"
    }
}

/// CAPTCHA solver driven by a poll script; pending once the script runs out.
pub struct ScriptedSolver {
    polls: Mutex<VecDeque<SolveStatus>>,
    pub submits: AtomicUsize,
    pub poll_calls: AtomicUsize,
}

impl ScriptedSolver {
    pub fn new(polls: Vec<SolveStatus>) -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(polls.into()),
            submits: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        })
    }

    /// Answers `answer` on the first poll of every escalation.
    pub fn always(answer: &str) -> Arc<Self> {
        Self::new(vec![SolveStatus::Solved(answer.to_string()); 16])
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptchaSolver for ScriptedSolver {
    async fn submit(&self, _png_base64: &str) -> AgentResult<String> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(format!("task-{}", n))
    }

    async fn poll(&self, _task_id: &str) -> AgentResult<SolveStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.polls.lock().pop_front().unwrap_or(SolveStatus::Pending))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Audit sink that always fails.
#[derive(Debug, Default)]
pub struct BrokenAudit;

#[async_trait]
impl AuditSink for BrokenAudit {
    async fn record(&self, _record: &SafetyDecisionRecord) -> AgentResult<()> {
        Err(AgentError::Io(std::io::Error::other("disk full")))
    }
}

/// Queue backed by memory; reports can be made to fail a number of times
/// with a transient error, or be rejected outright.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    jobs: Mutex<VecDeque<Job>>,
    pub progress: Mutex<Vec<(String, JobStatus, usize)>>,
    pub completions: Mutex<Vec<(String, JobStatus, BatchSummary)>>,
    failing_completions: AtomicUsize,
    pub completion_calls: AtomicUsize,
    failing_progress: AtomicUsize,
    pub progress_calls: AtomicUsize,
    reject_completions: bool,
}

impl RecordingQueue {
    pub fn with_jobs(jobs: Vec<Job>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs.into()),
            ..Self::default()
        })
    }

    pub fn flaky(jobs: Vec<Job>, failing_completions: usize, failing_progress: usize) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs.into()),
            failing_completions: AtomicUsize::new(failing_completions),
            failing_progress: AtomicUsize::new(failing_progress),
            ..Self::default()
        })
    }

    /// Every completion report is refused with an auth error.
    pub fn rejecting(jobs: Vec<Job>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(jobs.into()),
            reject_completions: true,
            ..Self::default()
        })
    }

    pub fn completions(&self) -> Vec<(String, JobStatus, BatchSummary)> {
        self.completions.lock().clone()
    }

    pub fn progress(&self) -> Vec<(String, JobStatus, usize)> {
        self.progress.lock().clone()
    }
}

#[async_trait]
impl QueueClient for RecordingQueue {
    async fn next_job(&self) -> AgentResult<Option<Job>> {
        Ok(self.jobs.lock().pop_front())
    }

    async fn report_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        results: &[TargetResult],
    ) -> AgentResult<()> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_progress) {
            return Err(AgentError::Queue("HTTP 502".into()));
        }
        self.progress
            .lock()
            .push((job_id.to_string(), status, results.len()));
        Ok(())
    }

    async fn report_complete(
        &self,
        job_id: &str,
        final_status: JobStatus,
        summary: &BatchSummary,
    ) -> AgentResult<()> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_completions {
            return Err(AgentError::Auth("queue returned 401 Unauthorized".into()));
        }
        if take_failure(&self.failing_completions) {
            return Err(AgentError::Queue("HTTP 503".into()));
        }
        self.completions
            .lock()
            .push((job_id.to_string(), final_status, *summary));
        Ok(())
    }
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Route `log` output through the test harness; `RUST_LOG` picks the level.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Controller config with every wait zeroed.
pub fn fast_config() -> ControllerConfig {
    let retry = RetryConfig::new().with_backoff(Duration::ZERO);
    ControllerConfig::new()
        .with_retry(retry.clone())
        .with_executor(ExecutorConfig::instant())
        .with_captcha(
            CaptchaConfig::new()
                .with_poll_interval(Duration::ZERO)
                .with_retry(retry),
        )
}

/// Pieces a controller test inspects afterwards.
pub struct Harness {
    pub controller: ConversationController,
    pub evidence: Arc<MemoryEvidenceStore>,
    pub audit: Arc<MemoryAuditLog>,
}

pub fn harness(
    decision: Arc<ScriptedDecisionService>,
    solver: Option<Arc<ScriptedSolver>>,
    config: ControllerConfig,
) -> Harness {
    init_logging();
    let evidence = Arc::new(MemoryEvidenceStore::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let gate = SafetyGate::new(Arc::new(submit_agent::AutoApprovePolicy), audit.clone());
    let mut controller = ConversationController::new(
        decision,
        EvidenceCapturer::new(evidence.clone()),
        gate,
        config.clone(),
    );
    if let Some(solver) = solver {
        controller = controller.with_solver(solver);
    }
    Harness {
        controller,
        evidence,
        audit,
    }
}
