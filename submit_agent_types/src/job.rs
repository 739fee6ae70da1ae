//! Jobs pulled from the queue and the targets they fan out to.

use std::collections::BTreeMap;

/// Lifecycle of a queue job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting on the queue.
    #[default]
    Pending,
    /// Acquired by a worker.
    InProgress,
    /// Every target was attempted.
    Complete,
    /// The job could not be processed.
    Failed,
}

impl JobStatus {
    /// Terminal states are reported and never mutated again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Complete)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Business profile submitted to every target.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BusinessProfile {
    /// Business name.
    pub name: String,
    /// Street address.
    #[serde(default)]
    pub address: String,
    /// City.
    #[serde(default)]
    pub city: String,
    /// State or region.
    #[serde(default)]
    pub state: String,
    /// Postal code.
    #[serde(default)]
    pub zip: String,
    /// Phone number.
    #[serde(default)]
    pub phone: String,
    /// Website URL.
    #[serde(default)]
    pub website: String,
    /// Contact email.
    #[serde(default)]
    pub email: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Any additional fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BusinessProfile {
    /// Create a profile with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Non-empty fields as ordered `(label, value)` pairs.
    pub fn fields(&self) -> Vec<(String, String)> {
        let named = [
            ("name", &self.name),
            ("address", &self.address),
            ("city", &self.city),
            ("state", &self.state),
            ("zip", &self.zip),
            ("phone", &self.phone),
            ("website", &self.website),
            ("email", &self.email),
            ("description", &self.description),
        ];

        let mut out: Vec<(String, String)> = named
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (k, v) in &self.extra {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            if !text.trim().is_empty() {
                out.push((k.clone(), text));
            }
        }

        out
    }
}

/// A unit of work from the queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Queue identifier.
    pub id: String,
    /// Business payload.
    #[serde(alias = "businessData", alias = "targetPayload")]
    pub payload: BusinessProfile,
    /// Requested number of targets.
    #[serde(default, alias = "itemCount", alias = "directoryLimit")]
    pub item_count: usize,
    /// Status.
    #[serde(default)]
    pub status: JobStatus,
}

impl Job {
    /// Create a pending job.
    pub fn new(id: impl Into<String>, payload: BusinessProfile, item_count: usize) -> Self {
        Self {
            id: id.into(),
            payload,
            item_count,
            status: JobStatus::Pending,
        }
    }

    /// Move to `next` if legal; returns whether the status changed.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Known bot-defense tier of a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// No known defenses.
    #[default]
    None,
    /// Simple visual challenges.
    BasicChallenge,
    /// Requires an account; handled manually.
    LoginRequired,
}

/// One destination site.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubmissionTarget {
    /// Identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Entry URL.
    pub entry_url: String,
    /// Risk tier.
    #[serde(default)]
    pub risk_tier: RiskTier,
    /// Whether the site answered the last reachability check.
    #[serde(default = "default_accessible")]
    pub accessible: bool,
}

fn default_accessible() -> bool {
    true
}

impl SubmissionTarget {
    /// Create a target.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        entry_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entry_url: entry_url.into(),
            risk_tier: RiskTier::None,
            accessible: true,
        }
    }

    /// Set the risk tier.
    pub fn with_risk_tier(mut self, tier: RiskTier) -> Self {
        self.risk_tier = tier;
        self
    }

    /// Whether the orchestrator may schedule this target.
    pub fn is_schedulable(&self) -> bool {
        self.accessible && self.risk_tier != RiskTier::LoginRequired
    }

    /// Normalized host of the entry URL.
    pub fn host(&self) -> String {
        normalize_host(&self.entry_url)
    }
}

/// Lower-cased host without a leading `www.`; empty when the URL is invalid.
pub fn normalize_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .map(|h| h.strip_prefix("www.").map(str::to_string).unwrap_or(h))
        .unwrap_or_default()
}
