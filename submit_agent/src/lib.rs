//! # Submit Agent
//!
//! An agentic worker that fills and submits web forms on directory sites,
//! guided by a vision decision service.
//!
//! ## Features
//!
//! - **Conversation loop**: screenshot, ask the decision service, execute, repeat
//! - **Normalized coordinates**: actions use a 0-1000 grid mapped onto the viewport
//! - **Safety gate**: pluggable confirmation policies with an append-only audit log
//! - **CAPTCHA escalation**: bounded polling and a per-target escalation cap
//! - **Job orchestration**: queue polling, paced targets, progress and completion reports
//! - **Browser automation**: Chrome support via chromiumoxide
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use submit_agent::{
//!     ChromeSessionFactory, ControllerConfig, ConversationController, EvidenceCapturer,
//!     FsEvidenceStore, HttpQueueClient, Orchestrator, OrchestratorConfig,
//!     RemoteDecisionService, SafetyConfig, SafetyGate, TargetCatalog,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let decision = Arc::new(RemoteDecisionService::new("sk-...", "gpt-4o"));
//!     let evidence = EvidenceCapturer::new(Arc::new(FsEvidenceStore::new("evidence")));
//!     let (gate, _) = SafetyGate::from_config(&SafetyConfig::default());
//!     let controller =
//!         ConversationController::new(decision, evidence, gate, ControllerConfig::default());
//!
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(HttpQueueClient::new("https://queue.example/api", "worker-1")),
//!         TargetCatalog::load("directories.json").await?,
//!         Arc::new(ChromeSessionFactory::launch(true, Default::default()).await?),
//!         controller,
//!         OrchestratorConfig::default(),
//!     );
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     orchestrator.run_forever(shutdown).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `chrome` - Browser sessions via chromiumoxide

#![warn(missing_docs)]

pub mod automation;
pub mod browser;
mod catalog;
mod config;
pub mod decision;
mod error;
mod events;
mod orchestrator;
mod queue;

// Re-exports
pub use catalog::TargetCatalog;
pub use config::{
    CaptchaConfig, ControllerConfig, ExecutorConfig, OrchestratorConfig, PolicyKind,
    RetryConfig, SafetyConfig, WorkerConfig, DEFAULT_DECISION_MODEL, DEFAULT_DECISION_URL,
    DEFAULT_SOLVER_URL,
};
pub use error::{AgentError, AgentResult};
pub use events::{Event, EventLevel, EventLog};
pub use orchestrator::{JobReport, Orchestrator};
pub use queue::{parse_job, HttpQueueClient, QueueClient};

pub use automation::{
    ActionExecutor, ApprovalRequest, AuditSink, AutoApprovePolicy, CaptchaEscalator,
    CaptchaSolver, ChannelPolicy, ConfirmationPolicy, ConfirmationRequest,
    ConversationController, EscalationBudget, EscalationOutcome, Evidence, EvidenceCapturer,
    EvidenceStore, FsEvidenceStore, GateVerdict, HttpCaptchaSolver, InteractivePolicy,
    JsonlAuditLog, MemoryAuditLog, MemoryEvidenceStore, PolicyDecision, SafetyGate,
    SolveStatus,
};
pub use browser::{BrowserSession, SessionFactory};
#[cfg(feature = "chrome")]
pub use browser::{ChromeSession, ChromeSessionFactory};
pub use decision::{Decision, DecisionRequest, DecisionService, Observation, RemoteDecisionService};

// Re-export the data types so callers need a single dependency.
pub use submit_agent_types::*;
