//! CAPTCHA escalation to an external solving service.

use super::with_retry;
use crate::config::CaptchaConfig;
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use submit_agent_types::CaptchaAttempt;

/// Poll result from a solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveStatus {
    /// Still working.
    Pending,
    /// Answer ready.
    Solved(String),
    /// The solver gave up.
    Failed(String),
}

/// An image CAPTCHA solving service.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Submit a base64 PNG; returns the task id.
    async fn submit(&self, png_base64: &str) -> AgentResult<String>;

    /// Check on a submitted task.
    async fn poll(&self, task_id: &str) -> AgentResult<SolveStatus>;

    /// Solver name for logging.
    fn name(&self) -> &'static str;
}

/// Pending marker returned by `res.php`.
const NOT_READY: &str = "CAPCHA_NOT_READY";

/// Client for the common `in.php` / `res.php` solver protocol.
#[derive(Debug, Clone)]
pub struct HttpCaptchaSolver {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpCaptchaSolver {
    /// Create a solver client.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn parse_reply(json: &Value) -> (bool, String) {
        let ok = json.get("status").and_then(|v| v.as_i64()) == Some(1);
        let request = match json.get("request") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        (ok, request)
    }
}

#[async_trait]
impl CaptchaSolver for HttpCaptchaSolver {
    async fn submit(&self, png_base64: &str) -> AgentResult<String> {
        let url = format!("{}/in.php", self.base_url);
        let form = [
            ("key", self.api_key.as_str()),
            ("method", "base64"),
            ("body", png_base64),
            ("json", "1"),
        ];
        let response = self.client.post(&url).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(AgentError::Remote(format!(
                "solver submit HTTP {}",
                response.status()
            )));
        }
        let json: Value = response.json().await?;
        match Self::parse_reply(&json) {
            (true, id) if !id.is_empty() => Ok(id),
            (_, err) => Err(AgentError::Solver(err)),
        }
    }

    async fn poll(&self, task_id: &str) -> AgentResult<SolveStatus> {
        let url = format!("{}/res.php", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", task_id),
                ("json", "1"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AgentError::Remote(format!(
                "solver poll HTTP {}",
                response.status()
            )));
        }
        let json: Value = response.json().await?;
        Ok(match Self::parse_reply(&json) {
            (true, answer) => SolveStatus::Solved(answer),
            (false, req) if req == NOT_READY => SolveStatus::Pending,
            (false, err) => SolveStatus::Failed(err),
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Per-target escalation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationBudget {
    used: usize,
    max: usize,
}

impl EscalationBudget {
    /// A fresh budget of `max` escalations.
    pub fn new(max: usize) -> Self {
        Self { used: 0, max }
    }

    /// Escalations performed so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Whether another escalation is allowed.
    pub fn has_remaining(&self) -> bool {
        self.used < self.max
    }
}

/// Result of one escalation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The solver answered.
    Solved(String),
    /// The solver failed or never answered.
    Unresolved(String),
    /// The per-target cap was already reached.
    LimitExceeded,
}

/// Runs escalations against a solver with bounded polling.
#[derive(Clone)]
pub struct CaptchaEscalator {
    solver: Arc<dyn CaptchaSolver>,
    config: CaptchaConfig,
}

impl CaptchaEscalator {
    /// Create an escalator.
    pub fn new(solver: Arc<dyn CaptchaSolver>, config: CaptchaConfig) -> Self {
        Self { solver, config }
    }

    /// A budget sized from the config.
    pub fn budget(&self) -> EscalationBudget {
        EscalationBudget::new(self.config.max_escalations)
    }

    /// Escalate one challenge screenshot.
    ///
    /// Returns the outcome and, unless the cap was already reached, the
    /// attempt record.
    pub async fn escalate(
        &self,
        budget: &mut EscalationBudget,
        challenge_ref: &str,
        png_base64: &str,
    ) -> (EscalationOutcome, Option<CaptchaAttempt>) {
        if !budget.has_remaining() {
            log::warn!(
                "captcha escalation cap ({}) reached for {}",
                budget.max,
                challenge_ref
            );
            return (EscalationOutcome::LimitExceeded, None);
        }
        budget.used += 1;

        let started = Instant::now();
        let result = self.solve(png_base64).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, solved, failure) = match result {
            Ok(answer) => (
                EscalationOutcome::Solved(answer.clone()),
                Some(answer),
                None,
            ),
            Err(reason) => (
                EscalationOutcome::Unresolved(reason.clone()),
                None,
                Some(reason),
            ),
        };

        let attempt = CaptchaAttempt {
            challenge_ref: challenge_ref.to_string(),
            attempt: budget.used,
            solved,
            failure,
            duration_ms,
        };
        log::info!(
            "captcha attempt {} via {}: {} in {}ms",
            attempt.attempt,
            self.solver.name(),
            if attempt.is_solved() { "solved" } else { "unresolved" },
            attempt.duration_ms
        );

        (outcome, Some(attempt))
    }

    async fn solve(&self, png_base64: &str) -> Result<String, String> {
        let retry = &self.config.retry;
        let task_id = with_retry(retry, "captcha submit", || self.solver.submit(png_base64))
            .await
            .map_err(|e| e.to_string())?;

        for _ in 0..self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;
            let status = with_retry(retry, "captcha poll", || self.solver.poll(&task_id))
                .await
                .map_err(|e| e.to_string())?;
            match status {
                SolveStatus::Pending => continue,
                SolveStatus::Solved(answer) => return Ok(answer),
                SolveStatus::Failed(reason) => return Err(reason),
            }
        }

        Err(format!(
            "no answer after {} polls",
            self.config.max_polls
        ))
    }
}

impl std::fmt::Debug for CaptchaEscalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaEscalator")
            .field("solver", &self.solver.name())
            .field("config", &self.config)
            .finish()
    }
}
