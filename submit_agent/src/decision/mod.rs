//! Decision service abstractions.
//!
//! The decision service looks at a screenshot plus a short observation and
//! replies with the next batch of actions, or with free text when it thinks
//! the task is over.

mod parse;
mod remote;

pub use parse::{extract_json, fenced_blocks, json_spans, parse_decision};
pub use remote::{ChatMessage, RemoteDecisionService};

use crate::error::AgentResult;
use async_trait::async_trait;
use submit_agent_types::{ActionDescriptor, ActionOutcome, ConversationTurn};

/// Proposes the next actions for a page.
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Ask for the next batch of actions.
    async fn decide(&self, request: &DecisionRequest<'_>) -> AgentResult<Decision>;

    /// Service name for logging.
    fn service_name(&self) -> &'static str;
}

/// What the page looks like right now.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Base64 PNG of the viewport.
    pub screenshot_base64: String,
    /// Current URL.
    pub url: Option<String>,
    /// Outcomes of the previous batch.
    pub outcomes: Vec<ActionOutcome>,
    /// Challenge widget marker found in the page HTML.
    pub challenge_hint: Option<String>,
    /// Answer returned by the CAPTCHA solver.
    pub captcha_solution: Option<String>,
    /// Free-form note for the service.
    pub note: Option<String>,
}

impl Observation {
    /// Create an observation from a screenshot.
    pub fn new(screenshot_base64: impl Into<String>) -> Self {
        Self {
            screenshot_base64: screenshot_base64.into(),
            ..Default::default()
        }
    }

    /// Set the URL.
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    /// Set previous outcomes.
    pub fn with_outcomes(mut self, outcomes: Vec<ActionOutcome>) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Set the challenge hint.
    pub fn with_challenge_hint(mut self, hint: Option<String>) -> Self {
        self.challenge_hint = hint;
        self
    }

    /// Set the solver answer.
    pub fn with_captcha_solution(mut self, solution: impl Into<String>) -> Self {
        self.captcha_solution = Some(solution.into());
        self
    }

    /// Set a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Text part sent next to the screenshot.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if let Some(url) = &self.url {
            out.push_str("Current URL: ");
            out.push_str(url);
            out.push('\n');
        }
        if !self.outcomes.is_empty() {
            out.push_str("Results of your previous actions:\n");
            for outcome in &self.outcomes {
                out.push_str("- ");
                out.push_str(outcome.kind.as_str());
                out.push_str(": ");
                out.push_str(&outcome_label(outcome));
                if let Some(err) = &outcome.error {
                    out.push_str(" (");
                    out.push_str(err);
                    out.push(')');
                }
                out.push('\n');
            }
        }
        if let Some(hint) = &self.challenge_hint {
            out.push_str("Note: the page embeds a challenge widget (");
            out.push_str(hint);
            out.push_str(").\n");
        }
        if let Some(solution) = &self.captcha_solution {
            out.push_str("The challenge on screen was solved. Enter this answer: ");
            out.push_str(solution);
            out.push('\n');
        }
        if let Some(note) = &self.note {
            out.push_str(note);
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str("Here is the current page.");
        }
        out
    }
}

fn outcome_label(outcome: &ActionOutcome) -> String {
    serde_json::to_value(outcome.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// One call to the decision service.
#[derive(Debug, Clone)]
pub struct DecisionRequest<'a> {
    /// Instruction template with the business fields.
    pub instruction: &'a str,
    /// Prior turns, oldest first.
    pub history: &'a [ConversationTurn],
    /// Current observation.
    pub observation: &'a Observation,
}

/// Reply from the decision service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// Proposed actions; empty means the service considers itself done.
    pub actions: Vec<ActionDescriptor>,
    /// Free text.
    pub text: String,
    /// Proposed actions that could not be read.
    pub dropped: usize,
}

impl Decision {
    /// A reply with actions.
    pub fn actions(actions: Vec<ActionDescriptor>) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    /// A terminal text-only reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use submit_agent_types::ActionOutcome;

    #[test]
    fn test_observation_describe() {
        let click = ActionDescriptor::click(1.0, 2.0);
        let obs = Observation::new("png")
            .with_url(Some("https://dir.example.com/add".into()))
            .with_outcomes(vec![
                ActionOutcome::success(&click),
                ActionOutcome::error(&click, "not clickable"),
            ])
            .with_challenge_hint(Some("g-recaptcha".into()))
            .with_captcha_solution("x7k2p");

        let text = obs.describe();
        assert!(text.contains("Current URL: https://dir.example.com/add"));
        assert!(text.contains("- click: success"));
        assert!(text.contains("- click: error (not clickable)"));
        assert!(text.contains("g-recaptcha"));
        assert!(text.contains("x7k2p"));

        assert_eq!(Observation::new("png").describe(), "Here is the current page.");
    }
}
