//! Configuration types for submit_agent.

use crate::error::{AgentError, AgentResult};
use std::path::PathBuf;
use std::time::Duration;
use submit_agent_types::Viewport;

/// Retry configuration for external calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Max attempts (including the first).
    pub max_attempts: usize,
    /// Backoff before the second attempt; doubles after each failure.
    pub backoff: Duration,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max attempts.
    pub fn with_max_attempts(mut self, n: usize) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set backoff delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Delay to sleep after failed attempt number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16) as u32;
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Timings for the action executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Viewport the normalized grid maps onto.
    pub viewport: Viewport,
    /// Scroll distance in CSS pixels.
    pub scroll_distance: f64,
    /// Intermediate pointer positions for a drag.
    pub drag_steps: usize,
    /// Duration of a `wait` action.
    pub wait_duration: Duration,
    /// Upper bound on waiting for network idle after a batch.
    pub network_idle_timeout: Duration,
    /// Extra settle delay after a batch.
    pub settle_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            scroll_distance: 500.0,
            drag_steps: 10,
            wait_duration: Duration::from_secs(5),
            network_idle_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every delay.
    pub fn instant() -> Self {
        Self {
            wait_duration: Duration::ZERO,
            network_idle_timeout: Duration::ZERO,
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the viewport.
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Set the scroll distance.
    pub fn with_scroll_distance(mut self, distance: f64) -> Self {
        self.scroll_distance = distance;
        self
    }

    /// Set the number of drag steps.
    pub fn with_drag_steps(mut self, steps: usize) -> Self {
        self.drag_steps = steps;
        self
    }

    /// Set the duration of `wait`.
    pub fn with_wait_duration(mut self, duration: Duration) -> Self {
        self.wait_duration = duration;
        self
    }

    /// Set the network-idle bound.
    pub fn with_network_idle_timeout(mut self, timeout: Duration) -> Self {
        self.network_idle_timeout = timeout;
        self
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

/// CAPTCHA escalation limits.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// Interval between result polls.
    pub poll_interval: Duration,
    /// Polls before giving up on one escalation.
    pub max_polls: usize,
    /// Escalations allowed per target.
    pub max_escalations: usize,
    /// Retry policy for submit/poll transport errors.
    pub retry: RetryConfig,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_polls: 20,
            max_escalations: 3,
            retry: RetryConfig::default(),
        }
    }
}

impl CaptchaConfig {
    /// Create a new captcha config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the number of polls per escalation.
    pub fn with_max_polls(mut self, n: usize) -> Self {
        self.max_polls = n;
        self
    }

    /// Set the per-target escalation cap.
    pub fn with_max_escalations(mut self, n: usize) -> Self {
        self.max_escalations = n;
        self
    }

    /// Set the transport retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Which confirmation policy gates risky actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PolicyKind {
    /// Approve everything and log it.
    #[default]
    AutoApprove,
    /// Ask on the terminal.
    Interactive,
    /// Ask an external approver over a channel.
    Channel,
}

impl std::str::FromStr for PolicyKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "auto_approve" | "autoapprove" => Ok(Self::AutoApprove),
            "interactive" | "prompt" | "stdin" => Ok(Self::Interactive),
            "channel" | "external" => Ok(Self::Channel),
            _ => Err(AgentError::InvalidField("safety policy")),
        }
    }
}

/// Safety gate configuration.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Policy applied to `requires_confirmation` actions.
    pub policy: PolicyKind,
    /// How long an external approver may take before the action is denied.
    pub confirmation_timeout: Duration,
    /// Append-only audit file.
    pub audit_path: Option<PathBuf>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::AutoApprove,
            confirmation_timeout: Duration::from_secs(120),
            audit_path: None,
        }
    }
}

impl SafetyConfig {
    /// Create a new safety config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy kind.
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Set the confirmation timeout.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Set the audit file.
    pub fn with_audit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_path = Some(path.into());
        self
    }
}

/// Conversation controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Turn budget per target.
    pub max_turns: usize,
    /// Retry policy for decision service calls.
    pub retry: RetryConfig,
    /// Turns of history resent to the decision service.
    pub history_window: usize,
    /// Executor timings.
    pub executor: ExecutorConfig,
    /// CAPTCHA limits.
    pub captcha: CaptchaConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            retry: RetryConfig::default(),
            history_window: 6,
            executor: ExecutorConfig::default(),
            captcha: CaptchaConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Create a new controller config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the turn budget.
    pub fn with_max_turns(mut self, n: usize) -> Self {
        self.max_turns = n;
        self
    }

    /// Set the decision retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the history window.
    pub fn with_history_window(mut self, n: usize) -> Self {
        self.history_window = n;
        self
    }

    /// Set the executor config.
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Set the captcha config.
    pub fn with_captcha(mut self, captcha: CaptchaConfig) -> Self {
        self.captcha = captcha;
        self
    }
}

/// Batch orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Lower bound of the delay between targets.
    pub min_target_delay: Duration,
    /// Upper bound of the delay between targets.
    pub max_target_delay: Duration,
    /// Sleep when the queue has no job.
    pub idle_poll_interval: Duration,
    /// Fixed backoff after a queue transport error.
    pub queue_backoff: Duration,
    /// Attempts for an intermediate progress report; results it misses
    /// go out with a later report.
    pub progress_attempts: usize,
    /// Backoff for the final progress and completion reports. Transient
    /// failures retry without limit; `max_attempts` caps rejected reports.
    pub report_retry: RetryConfig,
    /// Targets driven at the same time within one job.
    pub max_concurrent_targets: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_target_delay: Duration::from_secs(2),
            max_target_delay: Duration::from_secs(8),
            idle_poll_interval: Duration::from_secs(30),
            queue_backoff: Duration::from_secs(5),
            progress_attempts: 3,
            report_retry: RetryConfig::new()
                .with_backoff(Duration::from_secs(5))
                .with_max_backoff(Duration::from_secs(300)),
            max_concurrent_targets: 1,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new orchestrator config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every delay.
    pub fn instant() -> Self {
        Self {
            min_target_delay: Duration::ZERO,
            max_target_delay: Duration::ZERO,
            idle_poll_interval: Duration::ZERO,
            queue_backoff: Duration::ZERO,
            report_retry: RetryConfig::new().with_backoff(Duration::ZERO),
            ..Self::default()
        }
    }

    /// Set the inter-target delay range.
    pub fn with_target_delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_target_delay = min.min(max);
        self.max_target_delay = max.max(min);
        self
    }

    /// Set the idle poll interval.
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Set the queue backoff.
    pub fn with_queue_backoff(mut self, backoff: Duration) -> Self {
        self.queue_backoff = backoff;
        self
    }

    /// Set the backoff for final reports.
    pub fn with_report_retry(mut self, retry: RetryConfig) -> Self {
        self.report_retry = retry;
        self
    }

    /// Set target concurrency.
    pub fn with_max_concurrent_targets(mut self, n: usize) -> Self {
        self.max_concurrent_targets = n.max(1);
        self
    }

    /// A random delay within the configured range.
    pub fn target_delay(&self) -> Duration {
        let min = self.min_target_delay.as_millis() as u64;
        let max = self.max_target_delay.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(fastrand::u64(min..=max))
    }
}

/// Default decision service endpoint.
pub const DEFAULT_DECISION_URL: &str = "https://api.openai.com/v1/chat/completions";
/// Default decision model.
pub const DEFAULT_DECISION_MODEL: &str = "gpt-4o";
/// Default CAPTCHA solver base URL.
pub const DEFAULT_SOLVER_URL: &str = "https://2captcha.com";

/// Process level configuration for the worker binary.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier sent with every queue call.
    pub worker_id: String,
    /// Queue backend base URL.
    pub queue_url: String,
    /// Queue bearer token.
    pub queue_token: String,
    /// Decision service endpoint.
    pub decision_url: String,
    /// Decision service API key.
    pub decision_api_key: String,
    /// Decision model.
    pub decision_model: String,
    /// CAPTCHA solver base URL.
    pub solver_url: String,
    /// CAPTCHA solver key; escalation is disabled without one.
    pub solver_key: Option<String>,
    /// Directory catalog JSON.
    pub catalog_path: PathBuf,
    /// Where per-turn screenshots go.
    pub evidence_dir: PathBuf,
    /// Per-target event log file.
    pub event_log_path: Option<PathBuf>,
    /// HTTP client timeout.
    pub http_timeout: Duration,
    /// Launch the browser headless.
    pub headless: bool,
    /// Turn budget per target.
    pub max_turns: usize,
    /// Safety gate configuration.
    pub safety: SafetyConfig,
    /// Targets driven at the same time within one job.
    pub max_concurrent_targets: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            queue_url: String::new(),
            queue_token: String::new(),
            decision_url: DEFAULT_DECISION_URL.to_string(),
            decision_api_key: String::new(),
            decision_model: DEFAULT_DECISION_MODEL.to_string(),
            solver_url: DEFAULT_SOLVER_URL.to_string(),
            solver_key: None,
            catalog_path: PathBuf::from("directories.json"),
            evidence_dir: PathBuf::from("evidence"),
            event_log_path: None,
            http_timeout: Duration::from_secs(60),
            headless: true,
            max_turns: 20,
            safety: SafetyConfig::default(),
            max_concurrent_targets: 1,
        }
    }
}

impl WorkerConfig {
    /// Read `SUBMIT_*` variables from the process environment.
    pub fn from_env() -> AgentResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("SUBMIT_WORKER_ID") {
            config.worker_id = v;
        }
        config.queue_url = get("SUBMIT_QUEUE_URL")
            .ok_or(AgentError::NotConfigured("SUBMIT_QUEUE_URL"))?
            .trim_end_matches('/')
            .to_string();
        config.queue_token = get("SUBMIT_QUEUE_TOKEN").unwrap_or_default();
        config.decision_api_key = get("SUBMIT_DECISION_API_KEY")
            .ok_or(AgentError::NotConfigured("SUBMIT_DECISION_API_KEY"))?;
        if let Some(v) = get("SUBMIT_DECISION_URL") {
            config.decision_url = v;
        }
        if let Some(v) = get("SUBMIT_DECISION_MODEL") {
            config.decision_model = v;
        }
        if let Some(v) = get("SUBMIT_SOLVER_URL") {
            config.solver_url = v.trim_end_matches('/').to_string();
        }
        config.solver_key = get("SUBMIT_SOLVER_KEY");
        if let Some(v) = get("SUBMIT_CATALOG_PATH") {
            config.catalog_path = PathBuf::from(v);
        }
        if let Some(v) = get("SUBMIT_EVIDENCE_DIR") {
            config.evidence_dir = PathBuf::from(v);
        }
        config.event_log_path = get("SUBMIT_EVENT_LOG").map(PathBuf::from);
        if let Some(v) = get("SUBMIT_HTTP_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| AgentError::InvalidField("SUBMIT_HTTP_TIMEOUT_SECS"))?;
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = get("SUBMIT_HEADLESS") {
            config.headless = !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(v) = get("SUBMIT_MAX_TURNS") {
            config.max_turns = v
                .parse()
                .map_err(|_| AgentError::InvalidField("SUBMIT_MAX_TURNS"))?;
        }
        if let Some(v) = get("SUBMIT_MAX_CONCURRENT") {
            let n: usize = v
                .parse()
                .map_err(|_| AgentError::InvalidField("SUBMIT_MAX_CONCURRENT"))?;
            config.max_concurrent_targets = n.max(1);
        }
        if let Some(v) = get("SUBMIT_SAFETY_POLICY") {
            config.safety.policy = v.parse()?;
        }
        if let Some(v) = get("SUBMIT_CONFIRM_TIMEOUT_SECS") {
            let secs: u64 = v
                .parse()
                .map_err(|_| AgentError::InvalidField("SUBMIT_CONFIRM_TIMEOUT_SECS"))?;
            config.safety.confirmation_timeout = Duration::from_secs(secs);
        }
        config.safety.audit_path = get("SUBMIT_AUDIT_PATH").map(PathBuf::from);

        Ok(config)
    }

    /// Controller settings derived from this config.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::default().with_max_turns(self.max_turns)
    }

    /// Orchestrator settings derived from this config.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default().with_max_concurrent_targets(self.max_concurrent_targets)
    }
}
