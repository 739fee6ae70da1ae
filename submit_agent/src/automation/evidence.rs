//! Screenshot capture and the per-turn evidence trail.

use crate::browser::BrowserSession;
use crate::error::AgentResult;
use async_trait::async_trait;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use submit_agent_types::detect_challenge_marker;

/// Persists screenshots keyed by `(target id, turn index)`.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Persist a PNG and return its reference.
    async fn store(&self, target_id: &str, turn: usize, png: &[u8]) -> AgentResult<String>;
}

fn safe_segment(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "target".to_string()
    } else {
        cleaned
    }
}

fn turn_file(turn: usize) -> String {
    format!("turn-{:03}.png", turn)
}

/// Writes `{root}/{target_id}/turn-{NNN}.png`.
#[derive(Debug, Clone)]
pub struct FsEvidenceStore {
    root: PathBuf,
}

impl FsEvidenceStore {
    /// Store under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a turn is written to.
    pub fn path_for(&self, target_id: &str, turn: usize) -> PathBuf {
        self.root.join(safe_segment(target_id)).join(turn_file(turn))
    }
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn store(&self, target_id: &str, turn: usize, png: &[u8]) -> AgentResult<String> {
        let path = self.path_for(target_id, turn);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, png).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Keeps screenshots in memory.
#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    items: parking_lot::Mutex<Vec<(String, usize, Vec<u8>)>>,
}

impl MemoryEvidenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// `(target id, turn)` keys in insertion order.
    pub fn keys(&self) -> Vec<(String, usize)> {
        self.items
            .lock()
            .iter()
            .map(|(t, n, _)| (t.clone(), *n))
            .collect()
    }

    /// Stored screenshots.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn store(&self, target_id: &str, turn: usize, png: &[u8]) -> AgentResult<String> {
        self.items
            .lock()
            .push((target_id.to_string(), turn, png.to_vec()));
        Ok(format!("mem://{}/{}", safe_segment(target_id), turn_file(turn)))
    }
}

/// One captured observation of the page.
#[derive(Debug, Clone)]
pub struct Evidence {
    /// Base64 PNG.
    pub png_base64: String,
    /// Stored reference, when persisting succeeded.
    pub reference: Option<String>,
    /// Page URL.
    pub url: Option<String>,
    /// Challenge widget marker in the page HTML.
    pub challenge_hint: Option<String>,
}

/// Takes screenshots and files them in the evidence store.
#[derive(Clone)]
pub struct EvidenceCapturer {
    store: Arc<dyn EvidenceStore>,
}

impl EvidenceCapturer {
    /// Create a capturer.
    pub fn new(store: Arc<dyn EvidenceStore>) -> Self {
        Self { store }
    }

    /// Screenshot the page and persist it for `(target_id, turn)`.
    ///
    /// A failed screenshot is returned as an error; a failed write is logged
    /// and leaves `reference` empty.
    pub async fn capture(
        &self,
        session: &dyn BrowserSession,
        target_id: &str,
        turn: usize,
    ) -> AgentResult<Evidence> {
        let png = session.screenshot().await?;

        let reference = match self.store.store(target_id, turn, &png).await {
            Ok(r) => Some(r),
            Err(e) => {
                log::warn!("evidence for {} turn {} not stored: {}", target_id, turn, e);
                None
            }
        };

        let url = session.current_url().await.ok().flatten();
        let challenge_hint = session
            .html()
            .await
            .ok()
            .and_then(|html| detect_challenge_marker(&html).map(str::to_string));

        Ok(Evidence {
            png_base64: base64::engine::general_purpose::STANDARD.encode(&png),
            reference,
            url,
            challenge_hint,
        })
    }
}

impl std::fmt::Debug for EvidenceCapturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceCapturer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let store = FsEvidenceStore::new("/tmp/evidence");
        assert_eq!(
            store.path_for("dir/42", 7),
            PathBuf::from("/tmp/evidence/dir_42/turn-007.png")
        );
    }

    #[tokio::test]
    async fn test_fs_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEvidenceStore::new(dir.path());
        let reference = store.store("t1", 0, b"\x89PNG").await.unwrap();
        let bytes = std::fs::read(&reference).unwrap();
        assert_eq!(bytes, b"\x89PNG");
        assert!(reference.ends_with("turn-000.png"));
    }

    #[tokio::test]
    async fn test_memory_store_keys() {
        let store = MemoryEvidenceStore::new();
        let r = store.store("a", 1, b"x").await.unwrap();
        store.store("a", 2, b"y").await.unwrap();
        assert_eq!(r, "mem://a/turn-001.png");
        assert_eq!(store.keys(), vec![("a".to_string(), 1), ("a".to_string(), 2)]);
        assert_eq!(store.len(), 2);
    }
}
