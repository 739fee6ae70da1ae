//! Terminal records: per-target results, audit entries and job rollups.

use crate::actions::{ActionDescriptor, ActionKind, ActionOutcome};

/// Terminal status of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// The form was submitted.
    Submitted,
    /// The attempt ended without a submission.
    Failed,
    /// The attempt was aborted by an infrastructure error.
    Error,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Reason code for a non-submitted target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The service claimed more work remained but proposed no actions.
    TaskIncomplete,
    /// The turn budget ran out.
    MaxTurnsReached,
    /// The solver never produced an answer.
    CaptchaUnresolved,
    /// Too many escalations for one target.
    CaptchaLimitExceeded,
    /// A `block` annotated action was refused.
    ActionBlocked,
    /// A confirmation policy denied (or timed out on) an action.
    ConfirmationDenied,
    /// Navigation to an invalid scheme, crashed session and so on.
    FatalBrowser,
    /// The decision service kept failing.
    DecisionService,
    /// Any other external call kept failing.
    Transport,
}

impl FailureReason {
    /// Stable reason code.
    pub fn code(self) -> &'static str {
        match self {
            Self::TaskIncomplete => "task_incomplete",
            Self::MaxTurnsReached => "max_turns_reached",
            Self::CaptchaUnresolved => "captcha_unresolved",
            Self::CaptchaLimitExceeded => "captcha_limit_exceeded",
            Self::ActionBlocked => "action_blocked",
            Self::ConfirmationDenied => "confirmation_denied",
            Self::FatalBrowser => "fatal_browser",
            Self::DecisionService => "decision_service",
            Self::Transport => "transport",
        }
    }

    /// Status a target ends with for this reason.
    pub fn status(self) -> TargetStatus {
        match self {
            Self::FatalBrowser | Self::DecisionService | Self::Transport => TargetStatus::Error,
            _ => TargetStatus::Failed,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal record for one target within a job.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    /// Target identifier.
    pub target_id: String,
    /// Target display name.
    pub target_name: String,
    /// Terminal status.
    pub status: TargetStatus,
    /// Reason code when not submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Human readable message.
    pub message: String,
    /// Final screenshot reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<String>,
    /// Start time (unix millis).
    pub started_at_ms: u64,
    /// End time (unix millis).
    pub finished_at_ms: u64,
    /// Turns exchanged with the decision service.
    #[serde(default)]
    pub turns: usize,
    /// CAPTCHA escalations performed.
    #[serde(default)]
    pub captcha_escalations: usize,
}

impl TargetResult {
    /// A submitted result.
    pub fn submitted(
        target_id: impl Into<String>,
        target_name: impl Into<String>,
        message: impl Into<String>,
        started_at_ms: u64,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            target_name: target_name.into(),
            status: TargetStatus::Submitted,
            reason: None,
            message: message.into(),
            evidence_ref: None,
            started_at_ms,
            finished_at_ms: crate::now_ms(),
            turns: 0,
            captcha_escalations: 0,
        }
    }

    /// A failed (or errored, depending on `reason`) result.
    pub fn failed(
        target_id: impl Into<String>,
        target_name: impl Into<String>,
        reason: FailureReason,
        message: impl Into<String>,
        started_at_ms: u64,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            target_name: target_name.into(),
            status: reason.status(),
            reason: Some(reason),
            message: message.into(),
            evidence_ref: None,
            started_at_ms,
            finished_at_ms: crate::now_ms(),
            turns: 0,
            captcha_escalations: 0,
        }
    }

    /// Attach the final screenshot.
    pub fn with_evidence(mut self, evidence_ref: Option<String>) -> Self {
        self.evidence_ref = evidence_ref;
        self
    }

    /// Attach loop counters.
    pub fn with_counters(mut self, turns: usize, captcha_escalations: usize) -> Self {
        self.turns = turns;
        self.captcha_escalations = captcha_escalations;
        self
    }

    /// Whether the target was submitted.
    pub fn is_submitted(&self) -> bool {
        self.status == TargetStatus::Submitted
    }
}

/// Job level rollup reported on completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Targets attempted.
    pub total: usize,
    /// Targets submitted.
    pub successful: usize,
    /// Targets failed or errored.
    pub failed: usize,
    /// Wall clock duration.
    pub duration_seconds: f64,
}

impl BatchSummary {
    /// Compute the rollup for a finished job.
    pub fn from_results(results: &[TargetResult], duration: std::time::Duration) -> Self {
        let successful = results.iter().filter(|r| r.is_submitted()).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            duration_seconds: duration.as_secs_f64(),
        }
    }
}

/// Outcome of a gated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyDecision {
    /// Allowed to execute.
    Approved,
    /// Must not execute.
    Denied,
}

/// Who made a safety decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionActor {
    /// Auto-approval policy.
    Auto,
    /// A person at an interactive prompt.
    Human,
    /// An external approval channel.
    External,
    /// Fixed policy (hard blocks, timeouts).
    Policy,
}

/// Append-only audit entry for a gated action.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SafetyDecisionRecord {
    /// Target the action belonged to.
    pub target_id: String,
    /// Action kind.
    pub action_kind: ActionKind,
    /// Explanation attached to the risk annotation.
    pub explanation: String,
    /// Decision.
    pub decision: SafetyDecision,
    /// Unix epoch millis.
    pub at_ms: u64,
    /// Who decided.
    pub actor: DecisionActor,
}

/// One escalation to the CAPTCHA solving service.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CaptchaAttempt {
    /// Screenshot reference submitted to the solver.
    pub challenge_ref: String,
    /// Escalation number for the target (1-indexed).
    pub attempt: usize,
    /// Solved value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solved: Option<String>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Wall clock duration in millis.
    pub duration_ms: u64,
}

impl CaptchaAttempt {
    /// Whether the solver returned a value.
    pub fn is_solved(&self) -> bool {
        self.solved.is_some()
    }
}

/// One request/response exchange with the decision service.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationTurn {
    /// Zero-based turn index.
    pub index: usize,
    /// Instruction or observation text sent for this turn.
    pub instruction: String,
    /// Screenshot sent with the observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
    /// Outcomes of the previous turn's actions.
    #[serde(default)]
    pub outcomes: Vec<ActionOutcome>,
    /// Actions proposed in reply.
    #[serde(default)]
    pub actions: Vec<ActionDescriptor>,
    /// Text proposed in reply.
    #[serde(default)]
    pub terminal_text: String,
}

impl ConversationTurn {
    /// Whether the service proposed nothing further to do.
    pub fn is_terminal(&self) -> bool {
        self.actions.is_empty()
    }
}
