//! Directory catalog: the pool of targets a job draws from.

use crate::error::{AgentError, AgentResult};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use submit_agent_types::{RiskTier, SubmissionTarget};

#[derive(Debug, serde::Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default, alias = "submissionUrl")]
    submission_url: Option<String>,
    #[serde(default = "default_true")]
    accessible: bool,
    #[serde(default, alias = "riskTier")]
    risk_tier: RiskTier,
    #[serde(default, alias = "requiresLogin")]
    requires_login: bool,
}

fn default_true() -> bool {
    true
}

impl CatalogEntry {
    fn into_target(self, position: usize) -> Option<SubmissionTarget> {
        let entry_url = self
            .submission_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(self.url);
        if entry_url.trim().is_empty() {
            return None;
        }

        let id = match self.id {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            _ => format!("dir-{}", position),
        };
        let name = if self.name.is_empty() {
            id.clone()
        } else {
            self.name
        };
        let risk_tier = if self.requires_login {
            RiskTier::LoginRequired
        } else {
            self.risk_tier
        };

        let mut target = SubmissionTarget::new(id, name, entry_url).with_risk_tier(risk_tier);
        target.accessible = self.accessible;
        Some(target)
    }
}

/// A catalog file: a bare list, or URL-test output with the list under `results`.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Entries(Vec<CatalogEntry>),
    Wrapped { results: Vec<CatalogEntry> },
}

/// Ordered list of known submission targets.
#[derive(Debug, Clone, Default)]
pub struct TargetCatalog {
    targets: Vec<SubmissionTarget>,
}

impl TargetCatalog {
    /// Catalog over `targets` in the given order.
    pub fn from_targets(targets: Vec<SubmissionTarget>) -> Self {
        Self { targets }
    }

    /// Parse directory entries from a JSON array or a `{"results": [...]}` object.
    pub fn from_json(json: &str) -> AgentResult<Self> {
        let entries = match serde_json::from_str(json)? {
            CatalogFile::Entries(entries) | CatalogFile::Wrapped { results: entries } => entries,
        };
        let targets = entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, e)| e.into_target(i))
            .collect();
        Ok(Self { targets })
    }

    /// Load a catalog file.
    pub async fn load(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            AgentError::Io(std::io::Error::new(
                e.kind(),
                format!("catalog {}: {}", path.display(), e),
            ))
        })?;
        let catalog = Self::from_json(&text)?;
        log::info!(
            "loaded {} targets from {}",
            catalog.targets.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Every entry, including unschedulable ones.
    pub fn targets(&self) -> &[SubmissionTarget] {
        &self.targets
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Up to `item_count` schedulable targets, one per host, in catalog order.
    ///
    /// An `item_count` of zero takes every schedulable target.
    pub fn resolve(&self, item_count: usize) -> Vec<SubmissionTarget> {
        let limit = if item_count == 0 {
            usize::MAX
        } else {
            item_count
        };
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .filter(|t| t.is_schedulable())
            .filter(|t| {
                let host = t.host();
                !host.is_empty() && seen.insert(host)
            })
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {"id": 1, "name": "Alpha", "url": "https://www.alpha.example", "submission_url": "https://www.alpha.example/add", "accessible": true},
        {"id": 2, "name": "Alpha mirror", "url": "https://ALPHA.example/list", "accessible": true},
        {"id": "b", "name": "Beta", "url": "https://beta.example", "submissionUrl": "", "accessible": true},
        {"id": 3, "name": "Gamma", "url": "https://gamma.example", "accessible": false},
        {"id": 4, "name": "Delta", "url": "https://delta.example", "risk_tier": "login_required"},
        {"id": 5, "name": "Epsilon", "url": "https://epsilon.example", "requiresLogin": true},
        {"id": 6, "name": "Zeta", "url": "https://zeta.example", "risk_tier": "basic_challenge"},
        {"id": 7, "name": "Nowhere", "url": ""}
    ]"#;

    #[test]
    fn test_resolve_filters_and_dedups() {
        let catalog = TargetCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 7);

        let targets = catalog.resolve(0);
        let ids: Vec<&str> = targets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "b", "6"]);
        assert_eq!(targets[0].entry_url, "https://www.alpha.example/add");
        assert_eq!(targets[1].entry_url, "https://beta.example");
        assert_eq!(targets[2].risk_tier, RiskTier::BasicChallenge);
    }

    #[test]
    fn test_resolve_honours_item_count() {
        let catalog = TargetCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.resolve(2).len(), 2);
        assert_eq!(catalog.resolve(50).len(), 3);
    }

    #[test]
    fn test_url_test_results_shape() {
        let wrapped = format!("{{\"tested\": 6, \"results\": {}}}", CATALOG);
        let catalog = TargetCatalog::from_json(&wrapped).unwrap();
        let bare = TargetCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 7);
        assert_eq!(catalog.targets(), bare.targets());
        assert_eq!(catalog.resolve(0), bare.resolve(0));
    }

    #[test]
    fn test_invalid_catalog() {
        assert!(TargetCatalog::from_json("{\"not\": \"a list\"}").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directories.json");
        std::fs::write(&path, CATALOG).unwrap();
        let catalog = TargetCatalog::load(&path).await.unwrap();
        assert_eq!(catalog.resolve(1)[0].name, "Alpha");

        assert!(TargetCatalog::load(dir.path().join("missing.json")).await.is_err());
    }
}
