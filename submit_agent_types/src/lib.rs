//! Pure data types for `submit_agent`.
//!
//! Jobs, targets, action descriptors, outcomes, audit records and the
//! terminal text classifier. Nothing here touches the network or a browser.

#![warn(missing_docs)]

pub mod actions;
pub mod challenge;
pub mod classifier;
pub mod job;
pub mod results;

pub use actions::{
    denormalize, normalize, ActionDescriptor, ActionKind, ActionOutcome, OutcomeStatus,
    RiskAnnotation, ScrollDirection, Viewport, COORDINATE_SCALE,
};
pub use challenge::{detect_challenge_marker, has_challenge_marker};
pub use classifier::{RuleClass, TerminalClass, TerminalClassifier, CLASSIFIER_VERSION};
pub use job::{normalize_host, BusinessProfile, Job, JobStatus, RiskTier, SubmissionTarget};
pub use results::{
    BatchSummary, CaptchaAttempt, ConversationTurn, DecisionActor, FailureReason,
    SafetyDecision, SafetyDecisionRecord, TargetResult, TargetStatus,
};

/// Milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
