//! Terminal text classification.
//!
//! When the decision service proposes no further actions its free text is the
//! only signal of how the attempt ended. The classifier runs an ordered list
//! of vocabulary rules over that text; the first rule that matches wins and
//! anything unmatched counts as success. Blank text is never a success.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// Bumped whenever the default vocabulary or rule order changes.
pub const CLASSIFIER_VERSION: u32 = 2;

/// Words that mean the page is asking the agent to prove it is human.
pub static CHALLENGE_PATTERNS: &[&str] = &["verify", "robot", "puzzle", "captcha", "human"];

/// Phrases that mean the service intended to keep going.
pub static CONTINUATION_PATTERNS: &[&str] = &["i will", "next step", "i'll", "let me"];

/// Classification of a terminal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalClass {
    /// A challenge blocks progress; escalate.
    ChallengeBlocked,
    /// The service stopped but described more work.
    Incomplete,
    /// The attempt finished; carries the message.
    Success(String),
}

/// Outcome a rule maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleClass {
    /// Maps to [`TerminalClass::ChallengeBlocked`].
    Challenge,
    /// Maps to [`TerminalClass::Incomplete`].
    Continuation,
}

#[derive(Debug, Clone)]
struct Rule {
    class: RuleClass,
    patterns: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl Rule {
    fn new(class: RuleClass, patterns: &[&str]) -> Self {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_ascii_lowercase()).collect();
        let matcher = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(&patterns)
            .ok();
        Self {
            class,
            patterns,
            matcher,
        }
    }

    fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Some(ac) => ac.is_match(text),
            None => {
                let lower = text.to_ascii_lowercase();
                self.patterns.iter().any(|p| lower.contains(p.as_str()))
            }
        }
    }
}

/// Ordered vocabulary classifier for terminal text.
#[derive(Debug, Clone)]
pub struct TerminalClassifier {
    rules: Vec<Rule>,
}

impl Default for TerminalClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalClassifier {
    /// Default rules: challenge vocabulary first, then continuation phrases.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Rule::new(RuleClass::Challenge, CHALLENGE_PATTERNS),
                Rule::new(RuleClass::Continuation, CONTINUATION_PATTERNS),
            ],
        }
    }

    /// A classifier with no rules; every text is a success.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule, evaluated after the existing ones.
    pub fn with_rule(mut self, class: RuleClass, patterns: &[&str]) -> Self {
        self.rules.push(Rule::new(class, patterns));
        self
    }

    /// Version of the default vocabulary.
    pub fn version(&self) -> u32 {
        CLASSIFIER_VERSION
    }

    /// Classify terminal text.
    pub fn classify(&self, text: &str) -> TerminalClass {
        if text.trim().is_empty() {
            return TerminalClass::Incomplete;
        }
        for rule in &self.rules {
            if rule.matches(text) {
                return match rule.class {
                    RuleClass::Challenge => TerminalClass::ChallengeBlocked,
                    RuleClass::Continuation => TerminalClass::Incomplete,
                };
            }
        }
        TerminalClass::Success(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_vocabulary() {
        let c = TerminalClassifier::new();
        assert_eq!(
            c.classify("Please complete the CAPTCHA to continue."),
            TerminalClass::ChallengeBlocked
        );
        assert_eq!(
            c.classify("The site wants me to prove I'm not a Robot"),
            TerminalClass::ChallengeBlocked
        );
    }

    #[test]
    fn test_challenge_wins_over_continuation() {
        let c = TerminalClassifier::new();
        assert_eq!(
            c.classify("I will need you to solve the puzzle first"),
            TerminalClass::ChallengeBlocked
        );
    }

    #[test]
    fn test_continuation_vocabulary() {
        let c = TerminalClassifier::new();
        assert_eq!(
            c.classify("I'll fill in the phone field next."),
            TerminalClass::Incomplete
        );
        assert_eq!(
            c.classify("Let me scroll down to find the form"),
            TerminalClass::Incomplete
        );
    }

    #[test]
    fn test_success_default() {
        let c = TerminalClassifier::new();
        assert_eq!(
            c.classify("  The listing was submitted successfully. "),
            TerminalClass::Success("The listing was submitted successfully.".into())
        );
    }

    #[test]
    fn test_blank_text_is_incomplete() {
        let c = TerminalClassifier::new();
        assert_eq!(c.classify(""), TerminalClass::Incomplete);
        assert_eq!(c.classify(" \n\t"), TerminalClass::Incomplete);
        assert_eq!(TerminalClassifier::empty().classify(""), TerminalClass::Incomplete);
    }

    #[test]
    fn test_custom_rule() {
        let c = TerminalClassifier::empty().with_rule(RuleClass::Continuation, &["pending review"]);
        assert_eq!(c.classify("Pending Review"), TerminalClass::Incomplete);
        assert!(matches!(c.classify("captcha"), TerminalClass::Success(_)));
        assert_eq!(c.version(), CLASSIFIER_VERSION);
    }
}
