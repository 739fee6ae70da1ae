//! Automation module for submit_agent.
//!
//! Everything a single target attempt needs:
//! - Conversation controller driving the decide/execute loop
//! - Action executor over normalized coordinates
//! - Evidence capture per turn
//! - Safety gate with pluggable confirmation policies
//! - CAPTCHA escalation with a per-target budget

mod captcha;
mod controller;
mod evidence;
mod executor;
mod prompts;
mod safety;

pub use captcha::{
    CaptchaEscalator, CaptchaSolver, EscalationBudget, EscalationOutcome, HttpCaptchaSolver,
    SolveStatus,
};
pub use controller::ConversationController;
pub use evidence::{Evidence, EvidenceCapturer, EvidenceStore, FsEvidenceStore, MemoryEvidenceStore};
pub use executor::{drag_path, validate_url, ActionExecutor};
pub use prompts::{build_instruction, SUBMISSION_SYSTEM_PROMPT};
pub use safety::{
    ApprovalRequest, AuditSink, AutoApprovePolicy, ChannelPolicy, ConfirmationPolicy,
    ConfirmationRequest, GateVerdict, InteractivePolicy, JsonlAuditLog, MemoryAuditLog,
    PolicyDecision, SafetyGate,
};

use crate::config::RetryConfig;
use crate::error::AgentResult;
use std::future::Future;

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub(crate) async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    what: &str,
    mut op: F,
) -> AgentResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AgentResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < retry.max_attempts => {
                log::warn!("{} failed (attempt {}): {}", what, attempt + 1, e);
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
