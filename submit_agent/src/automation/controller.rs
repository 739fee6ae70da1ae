//! Decide/execute loop for a single target.

use super::captcha::{CaptchaEscalator, CaptchaSolver, EscalationBudget, EscalationOutcome};
use super::evidence::EvidenceCapturer;
use super::executor::{validate_url, ActionExecutor};
use super::prompts::build_instruction;
use super::safety::{GateVerdict, SafetyGate};
use super::with_retry;
use crate::browser::BrowserSession;
use crate::config::ControllerConfig;
use crate::decision::{Decision, DecisionRequest, DecisionService, Observation};
use crate::error::AgentError;
use crate::events::{EventLevel, EventLog};
use std::sync::Arc;
use submit_agent_types::{
    now_ms, BusinessProfile, ConversationTurn, FailureReason, SubmissionTarget, TargetResult,
    TargetStatus, TerminalClass, TerminalClassifier, Viewport,
};

/// Why an attempt stopped early.
type Stop = (FailureReason, String);

fn fatal(e: AgentError) -> Stop {
    (FailureReason::FatalBrowser, e.to_string())
}

/// Mutable state of one attempt. Owned by a single `run` call and dropped
/// when it returns.
#[derive(Debug)]
struct Attempt<'a> {
    target: &'a SubmissionTarget,
    history: Vec<ConversationTurn>,
    budget: Option<EscalationBudget>,
    last_png: String,
    last_ref: Option<String>,
}

impl<'a> Attempt<'a> {
    fn new(target: &'a SubmissionTarget, budget: Option<EscalationBudget>) -> Self {
        Self {
            target,
            history: Vec::new(),
            budget,
            last_png: String::new(),
            last_ref: None,
        }
    }

    fn escalations(&self) -> usize {
        self.budget.map(|b| b.used()).unwrap_or(0)
    }
}

/// Drives one target from its entry URL to a terminal result.
///
/// Each call to [`run`](Self::run) owns its own conversation history, so a
/// controller can be shared across concurrent targets.
#[derive(Clone)]
pub struct ConversationController {
    decision: Arc<dyn DecisionService>,
    executor: ActionExecutor,
    evidence: EvidenceCapturer,
    gate: SafetyGate,
    captcha: Option<CaptchaEscalator>,
    classifier: TerminalClassifier,
    events: Arc<EventLog>,
    config: ControllerConfig,
}

impl ConversationController {
    /// Create a controller without CAPTCHA escalation.
    pub fn new(
        decision: Arc<dyn DecisionService>,
        evidence: EvidenceCapturer,
        gate: SafetyGate,
        config: ControllerConfig,
    ) -> Self {
        Self {
            decision,
            executor: ActionExecutor::new(config.executor.clone()),
            evidence,
            gate,
            captcha: None,
            classifier: TerminalClassifier::new(),
            events: Arc::new(EventLog::disabled()),
            config,
        }
    }

    /// Escalate challenges to `solver` using the `captcha` settings of the
    /// controller config.
    pub fn with_solver(self, solver: Arc<dyn CaptchaSolver>) -> Self {
        let escalator = CaptchaEscalator::new(solver, self.config.captcha.clone());
        self.with_captcha(escalator)
    }

    /// Escalate challenges through `escalator`.
    pub fn with_captcha(mut self, escalator: CaptchaEscalator) -> Self {
        self.captcha = Some(escalator);
        self
    }

    /// Replace the terminal text classifier.
    pub fn with_classifier(mut self, classifier: TerminalClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Send per-target events to `events`.
    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Controller settings.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Submit `profile` to `target` using `session`.
    ///
    /// Always yields exactly one result; failures are folded into it.
    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        target: &SubmissionTarget,
        profile: &BusinessProfile,
    ) -> TargetResult {
        let started = now_ms();
        let instruction = build_instruction(profile, target);
        let mut attempt = Attempt::new(target, self.captcha.as_ref().map(|c| c.budget()));

        self.events
            .info(&target.id, format!("attempt started at {}", target.entry_url))
            .await;

        let result = match self.drive(session, &instruction, &mut attempt).await {
            Ok(message) => TargetResult::submitted(&target.id, &target.name, message, started),
            Err((reason, message)) => {
                TargetResult::failed(&target.id, &target.name, reason, message, started)
            }
        }
        .with_evidence(attempt.last_ref.clone())
        .with_counters(attempt.history.len(), attempt.escalations());

        let level = match result.status {
            TargetStatus::Submitted => EventLevel::Info,
            TargetStatus::Failed => EventLevel::Warn,
            TargetStatus::Error => EventLevel::Error,
        };
        self.events
            .emit(
                &target.id,
                level,
                format!("attempt {}: {}", result.status, result.message),
                serde_json::json!({
                    "reason": result.reason.map(|r| r.code()),
                    "turns": result.turns,
                    "captchaEscalations": result.captcha_escalations,
                }),
            )
            .await;

        result
    }

    async fn drive(
        &self,
        session: &dyn BrowserSession,
        instruction: &str,
        attempt: &mut Attempt<'_>,
    ) -> Result<String, Stop> {
        let entry = validate_url(&attempt.target.entry_url).map_err(fatal)?;
        session.navigate(&entry).await.map_err(|e| {
            (
                FailureReason::FatalBrowser,
                format!("navigation to {} failed: {}", entry, e),
            )
        })?;
        self.executor.settle(session).await.map_err(fatal)?;

        let mut observation = self.observe(session, attempt).await?;

        loop {
            let decision = self.exchange(instruction, observation, attempt).await?;

            if decision.actions.is_empty() && decision.dropped > 0 {
                return Err((
                    FailureReason::DecisionService,
                    format!(
                        "none of the {} proposed action(s) could be read",
                        decision.dropped
                    ),
                ));
            }
            if decision.dropped > 0 {
                log::warn!(
                    "[{}] skipping {} unreadable action(s)",
                    attempt.target.id,
                    decision.dropped
                );
            }

            if decision.actions.is_empty() {
                match self.classifier.classify(&decision.text) {
                    TerminalClass::Success(message) => return Ok(message),
                    TerminalClass::Incomplete if decision.text.trim().is_empty() => {
                        return Err((
                            FailureReason::TaskIncomplete,
                            "empty reply with no actions".to_string(),
                        ));
                    }
                    TerminalClass::Incomplete => {
                        return Err((FailureReason::TaskIncomplete, decision.text));
                    }
                    TerminalClass::ChallengeBlocked => {
                        self.ensure_turns_left(attempt)?;
                        let answer = self.escalate(attempt).await?;
                        observation = self
                            .observe(session, attempt)
                            .await?
                            .with_captcha_solution(answer);
                        continue;
                    }
                }
            }

            self.ensure_turns_left(attempt)?;

            let viewport = self.viewport(session).await?;
            let mut outcomes = Vec::with_capacity(decision.actions.len());
            for action in &decision.actions {
                if let GateVerdict::Refused { outcome, reason } =
                    self.gate.check(&attempt.target.id, action).await
                {
                    return Err((reason, outcome.error.unwrap_or_default()));
                }
                let outcome = self
                    .executor
                    .execute(session, action, viewport)
                    .await
                    .map_err(fatal)?;
                outcomes.push(outcome);
            }

            self.executor.settle(session).await.map_err(fatal)?;
            observation = self
                .observe(session, attempt)
                .await?
                .with_outcomes(outcomes);
        }
    }

    fn ensure_turns_left(&self, attempt: &Attempt<'_>) -> Result<(), Stop> {
        if attempt.history.len() >= self.config.max_turns {
            return Err((
                FailureReason::MaxTurnsReached,
                format!("no terminal answer after {} turns", attempt.history.len()),
            ));
        }
        Ok(())
    }

    async fn viewport(&self, session: &dyn BrowserSession) -> Result<Viewport, Stop> {
        match session.viewport().await {
            Ok(v) if v.width > 0 && v.height > 0 => Ok(v),
            Ok(_) => Ok(self.executor.config().viewport),
            Err(e) if e.is_fatal_browser() => Err(fatal(e)),
            Err(e) => {
                log::debug!("viewport lookup failed, using configured size: {}", e);
                Ok(self.executor.config().viewport)
            }
        }
    }

    /// Screenshot for the next turn.
    async fn observe(
        &self,
        session: &dyn BrowserSession,
        attempt: &mut Attempt<'_>,
    ) -> Result<Observation, Stop> {
        let turn = attempt.history.len();
        let evidence = self
            .evidence
            .capture(session, &attempt.target.id, turn)
            .await
            .map_err(|e| {
                (
                    FailureReason::FatalBrowser,
                    format!("screenshot for turn {} failed: {}", turn, e),
                )
            })?;

        if evidence.reference.is_some() {
            attempt.last_ref = evidence.reference.clone();
        }
        attempt.last_png = evidence.png_base64.clone();

        Ok(Observation::new(evidence.png_base64)
            .with_url(evidence.url)
            .with_challenge_hint(evidence.challenge_hint))
    }

    /// One decision call; the turn is appended to the history.
    async fn exchange(
        &self,
        instruction: &str,
        observation: Observation,
        attempt: &mut Attempt<'_>,
    ) -> Result<Decision, Stop> {
        let index = attempt.history.len();
        let window = index.saturating_sub(self.config.history_window);
        let request = DecisionRequest {
            instruction,
            history: &attempt.history[window..],
            observation: &observation,
        };

        let decision = with_retry(&self.config.retry, "decision service", || {
            self.decision.decide(&request)
        })
        .await
        .map_err(|e| {
            let reason = match e {
                AgentError::Http(_) | AgentError::Timeout => FailureReason::Transport,
                _ => FailureReason::DecisionService,
            };
            (
                reason,
                format!("{} failed: {}", self.decision.service_name(), e),
            )
        })?;

        if !decision.text.is_empty() {
            log::info!(
                "[{}] turn {}: {}",
                attempt.target.id,
                index,
                decision.text
            );
        }
        log::debug!(
            "[{}] turn {} proposed {} action(s)",
            attempt.target.id,
            index,
            decision.actions.len()
        );

        attempt.history.push(ConversationTurn {
            index,
            instruction: observation.describe(),
            screenshot_ref: attempt.last_ref.clone(),
            outcomes: observation.outcomes,
            actions: decision.actions.clone(),
            terminal_text: decision.text.clone(),
        });

        Ok(decision)
    }

    async fn escalate(&self, attempt: &mut Attempt<'_>) -> Result<String, Stop> {
        let Some(escalator) = &self.captcha else {
            return Err((
                FailureReason::CaptchaUnresolved,
                "challenge detected and no solver is configured".to_string(),
            ));
        };
        let target_id = attempt.target.id.clone();
        let challenge_ref = attempt.last_ref.clone().unwrap_or_else(|| {
            format!(
                "{}/turn-{:03}",
                target_id,
                attempt.history.len().saturating_sub(1)
            )
        });

        let budget = attempt.budget.get_or_insert_with(|| escalator.budget());
        let (outcome, record) = escalator
            .escalate(budget, &challenge_ref, &attempt.last_png)
            .await;

        if let Some(record) = &record {
            let level = if record.is_solved() {
                EventLevel::Info
            } else {
                EventLevel::Warn
            };
            self.events
                .emit(
                    &target_id,
                    level,
                    "captcha escalation",
                    serde_json::to_value(record).unwrap_or_default(),
                )
                .await;
        }

        match outcome {
            EscalationOutcome::Solved(answer) => Ok(answer),
            EscalationOutcome::Unresolved(reason) => {
                Err((FailureReason::CaptchaUnresolved, reason))
            }
            EscalationOutcome::LimitExceeded => Err((
                FailureReason::CaptchaLimitExceeded,
                format!(
                    "captcha escalation limit reached after {}",
                    budget.used()
                ),
            )),
        }
    }
}

impl std::fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationController")
            .field("decision", &self.decision.service_name())
            .field("gate", &self.gate)
            .field("captcha", &self.captcha)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
