//! Safety gate for risk-annotated actions.
//!
//! Every `requires_confirmation` or `block` action passes through the gate,
//! which asks the configured [`ConfirmationPolicy`] (blocks never reach it)
//! and writes a [`SafetyDecisionRecord`] before anything executes.

use crate::config::{PolicyKind, SafetyConfig};
use crate::error::AgentResult;
use async_trait::async_trait;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use submit_agent_types::{
    now_ms, ActionDescriptor, ActionOutcome, DecisionActor, FailureReason, RiskAnnotation,
    SafetyDecision, SafetyDecisionRecord,
};
use tokio::sync::{mpsc, oneshot};

/// What a policy is asked to approve.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// Target the action belongs to.
    pub target_id: String,
    /// The gated action.
    pub action: ActionDescriptor,
    /// Explanation supplied by the decision service.
    pub explanation: String,
}

/// A policy's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Approve or deny.
    pub decision: SafetyDecision,
    /// Who answered.
    pub actor: DecisionActor,
}

impl PolicyDecision {
    /// Approved by `actor`.
    pub fn approve(actor: DecisionActor) -> Self {
        Self {
            decision: SafetyDecision::Approved,
            actor,
        }
    }

    /// Denied by `actor`.
    pub fn deny(actor: DecisionActor) -> Self {
        Self {
            decision: SafetyDecision::Denied,
            actor,
        }
    }
}

/// Decides whether a `requires_confirmation` action may run.
#[async_trait]
pub trait ConfirmationPolicy: Send + Sync {
    /// Approve or deny. Failures must resolve to a denial.
    async fn confirm(&self, request: &ConfirmationRequest) -> PolicyDecision;

    /// Policy name for logging.
    fn name(&self) -> &'static str;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprovePolicy;

#[async_trait]
impl ConfirmationPolicy for AutoApprovePolicy {
    async fn confirm(&self, request: &ConfirmationRequest) -> PolicyDecision {
        log::info!(
            "auto-approving {} on {}: {}",
            request.action.kind,
            request.target_id,
            request.explanation
        );
        PolicyDecision::approve(DecisionActor::Auto)
    }

    fn name(&self) -> &'static str {
        "auto_approve"
    }
}

type PromptFn = dyn Fn(&ConfirmationRequest) -> bool + Send + Sync;

/// Asks a person synchronously; stdin by default.
#[derive(Clone)]
pub struct InteractivePolicy {
    prompt: Arc<PromptFn>,
}

impl Default for InteractivePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractivePolicy {
    /// Prompt on stdin/stderr.
    pub fn new() -> Self {
        Self {
            prompt: Arc::new(stdin_prompt),
        }
    }

    /// Use a custom blocking prompt.
    pub fn with_prompt<F>(prompt: F) -> Self
    where
        F: Fn(&ConfirmationRequest) -> bool + Send + Sync + 'static,
    {
        Self {
            prompt: Arc::new(prompt),
        }
    }
}

fn stdin_prompt(request: &ConfirmationRequest) -> bool {
    let mut err = std::io::stderr();
    let _ = writeln!(
        err,
        "\n[confirm] {} wants to run `{}`: {}",
        request.target_id, request.action.kind, request.explanation
    );
    let _ = write!(err, "Allow? [y/N] ");
    let _ = err.flush();

    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl ConfirmationPolicy for InteractivePolicy {
    async fn confirm(&self, request: &ConfirmationRequest) -> PolicyDecision {
        let prompt = self.prompt.clone();
        let owned = request.clone();
        match tokio::task::spawn_blocking(move || prompt(&owned)).await {
            Ok(true) => PolicyDecision::approve(DecisionActor::Human),
            Ok(false) => PolicyDecision::deny(DecisionActor::Human),
            Err(e) => {
                log::warn!("confirmation prompt failed: {}", e);
                PolicyDecision::deny(DecisionActor::Policy)
            }
        }
    }

    fn name(&self) -> &'static str {
        "interactive"
    }
}

impl std::fmt::Debug for InteractivePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractivePolicy").finish_non_exhaustive()
    }
}

/// A pending approval handed to an external approver.
#[derive(Debug)]
pub struct ApprovalRequest {
    /// The request.
    pub request: ConfirmationRequest,
    /// Send `true` to approve.
    pub respond: oneshot::Sender<bool>,
}

/// Asks an external approver over a channel and denies on timeout.
#[derive(Debug, Clone)]
pub struct ChannelPolicy {
    sender: mpsc::Sender<ApprovalRequest>,
    timeout: Duration,
}

impl ChannelPolicy {
    /// Create the policy and the receiver an approver listens on.
    pub fn new(timeout: Duration) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (sender, receiver) = mpsc::channel(16);
        (Self { sender, timeout }, receiver)
    }
}

#[async_trait]
impl ConfirmationPolicy for ChannelPolicy {
    async fn confirm(&self, request: &ConfirmationRequest) -> PolicyDecision {
        let (tx, rx) = oneshot::channel();
        let pending = ApprovalRequest {
            request: request.clone(),
            respond: tx,
        };

        let exchange = async {
            self.sender.send(pending).await.ok()?;
            rx.await.ok()
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Some(true)) => PolicyDecision::approve(DecisionActor::External),
            Ok(Some(false)) => PolicyDecision::deny(DecisionActor::External),
            Ok(None) => {
                log::warn!("approval channel closed; denying {}", request.action.kind);
                PolicyDecision::deny(DecisionActor::Policy)
            }
            Err(_) => {
                log::warn!(
                    "no approval within {:?}; denying {}",
                    self.timeout,
                    request.action.kind
                );
                PolicyDecision::deny(DecisionActor::Policy)
            }
        }
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Append-only destination for safety decisions.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record.
    async fn record(&self, record: &SafetyDecisionRecord) -> AgentResult<()>;
}

/// In-process audit log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: parking_lot::Mutex<Vec<SafetyDecisionRecord>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records.
    pub fn records(&self) -> Vec<SafetyDecisionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, record: &SafetyDecisionRecord) -> AgentResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// JSON-lines audit file.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditLog {
    /// Append to `path`, creating it if needed.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    async fn record(&self, record: &SafetyDecisionRecord) -> AgentResult<()> {
        use tokio::io::AsyncWriteExt;

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Gate verdict for one action.
#[derive(Debug, Clone)]
pub enum GateVerdict {
    /// Execute the action.
    Proceed,
    /// Do not execute; the outcome and reason are already determined.
    Refused {
        /// `denied` outcome carrying the error code.
        outcome: ActionOutcome,
        /// Why the target fails.
        reason: FailureReason,
    },
}

impl GateVerdict {
    /// Whether the action may run.
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Applies the confirmation policy and writes the audit trail.
#[derive(Clone)]
pub struct SafetyGate {
    policy: Arc<dyn ConfirmationPolicy>,
    audit: Arc<dyn AuditSink>,
}

impl SafetyGate {
    /// Create a gate.
    pub fn new(policy: Arc<dyn ConfirmationPolicy>, audit: Arc<dyn AuditSink>) -> Self {
        Self { policy, audit }
    }

    /// Build the gate described by `config`.
    ///
    /// For [`PolicyKind::Channel`] the receiver the approver must drain is
    /// returned alongside.
    pub fn from_config(config: &SafetyConfig) -> (Self, Option<mpsc::Receiver<ApprovalRequest>>) {
        let audit: Arc<dyn AuditSink> = match &config.audit_path {
            Some(path) => Arc::new(JsonlAuditLog::new(path.clone())),
            None => Arc::new(MemoryAuditLog::new()),
        };
        match config.policy {
            PolicyKind::AutoApprove => (Self::new(Arc::new(AutoApprovePolicy), audit), None),
            PolicyKind::Interactive => (Self::new(Arc::new(InteractivePolicy::new()), audit), None),
            PolicyKind::Channel => {
                let (policy, rx) = ChannelPolicy::new(config.confirmation_timeout);
                (Self::new(Arc::new(policy), audit), Some(rx))
            }
        }
    }

    /// Name of the active policy.
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Gate one action for `target_id`.
    pub async fn check(&self, target_id: &str, action: &ActionDescriptor) -> GateVerdict {
        let explanation = action.explanation.clone().unwrap_or_default();

        let verdict = match action.risk {
            RiskAnnotation::None => return GateVerdict::Proceed,
            RiskAnnotation::Block => PolicyDecision::deny(DecisionActor::Policy),
            RiskAnnotation::RequiresConfirmation => {
                let request = ConfirmationRequest {
                    target_id: target_id.to_string(),
                    action: action.clone(),
                    explanation: explanation.clone(),
                };
                self.policy.confirm(&request).await
            }
        };

        let record = SafetyDecisionRecord {
            target_id: target_id.to_string(),
            action_kind: action.kind.clone(),
            explanation,
            decision: verdict.decision,
            at_ms: now_ms(),
            actor: verdict.actor,
        };

        log::info!(
            "safety {:?} {} on {} by {:?} ({})",
            record.decision,
            record.action_kind,
            target_id,
            record.actor,
            self.policy.name()
        );

        let audited = match self.audit.record(&record).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("audit write failed for {}: {}", target_id, e);
                false
            }
        };

        let reason = match (action.risk, verdict.decision, audited) {
            (RiskAnnotation::Block, _, _) => FailureReason::ActionBlocked,
            (_, SafetyDecision::Approved, true) => return GateVerdict::Proceed,
            _ => FailureReason::ConfirmationDenied,
        };

        let message = match reason {
            FailureReason::ActionBlocked => format!("{} blocked by policy", action.kind),
            _ if !audited => format!("{} denied: audit trail unavailable", action.kind),
            _ => format!("{} denied by {:?}", action.kind, verdict.actor),
        };

        GateVerdict::Refused {
            outcome: ActionOutcome::denied(action, reason.code(), message),
            reason,
        }
    }
}

impl std::fmt::Debug for SafetyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyGate")
            .field("policy", &self.policy.name())
            .finish_non_exhaustive()
    }
}
