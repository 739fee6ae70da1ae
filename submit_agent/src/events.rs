//! Per-target event log (JSON lines).

use std::path::PathBuf;
use submit_agent_types::now_ms;

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Progress.
    Info,
    /// Something went wrong but the attempt continues.
    Warn,
    /// The attempt ended badly.
    Error,
}

/// One event line.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Event {
    /// Unix epoch millis.
    pub ts: u64,
    /// Target the event belongs to.
    pub target_id: String,
    /// Severity.
    pub level: EventLevel,
    /// Message.
    pub message: String,
    /// Structured details.
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug)]
enum Sink {
    Disabled,
    Memory(parking_lot::Mutex<Vec<Event>>),
    Jsonl {
        path: PathBuf,
        lock: tokio::sync::Mutex<()>,
    },
}

/// Where events go. Write failures are logged and swallowed.
#[derive(Debug)]
pub struct EventLog {
    sink: Sink,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::disabled()
    }
}

impl EventLog {
    /// Drop every event.
    pub fn disabled() -> Self {
        Self {
            sink: Sink::Disabled,
        }
    }

    /// Keep events in memory.
    pub fn memory() -> Self {
        Self {
            sink: Sink::Memory(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Append events to a JSON lines file.
    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self {
            sink: Sink::Jsonl {
                path: path.into(),
                lock: tokio::sync::Mutex::new(()),
            },
        }
    }

    /// Record an event.
    pub async fn emit(
        &self,
        target_id: &str,
        level: EventLevel,
        message: impl Into<String>,
        extra: serde_json::Value,
    ) {
        let event = Event {
            ts: now_ms(),
            target_id: target_id.to_string(),
            level,
            message: message.into(),
            extra,
        };

        match &self.sink {
            Sink::Disabled => (),
            Sink::Memory(events) => events.lock().push(event),
            Sink::Jsonl { path, lock } => {
                let _guard = lock.lock().await;
                if let Err(e) = append_line(path, &event).await {
                    log::warn!("event log write to {} failed: {}", path.display(), e);
                }
            }
        }
    }

    /// Info shorthand without details.
    pub async fn info(&self, target_id: &str, message: impl Into<String>) {
        self.emit(target_id, EventLevel::Info, message, serde_json::Value::Null)
            .await
    }

    /// Events kept in memory (empty for other sinks).
    pub fn events(&self) -> Vec<Event> {
        match &self.sink {
            Sink::Memory(events) => events.lock().clone(),
            _ => Vec::new(),
        }
    }
}

async fn append_line(path: &PathBuf, event: &Event) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_events() {
        let log = EventLog::memory();
        log.info("t1", "navigated").await;
        log.emit(
            "t1",
            EventLevel::Error,
            "fatal",
            serde_json::json!({"reason": "fatal_browser"}),
        )
        .await;
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].level, EventLevel::Error);
        assert_eq!(events[1].extra["reason"], "fatal_browser");
        assert!(EventLog::disabled().events().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EventLog::jsonl(&path);
        log.info("a", "one").await;
        log.info("b", "two").await;

        let text = std::fs::read_to_string(&path).unwrap();
        let events: Vec<Event> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].target_id, "a");
        assert_eq!(events[1].message, "two");
    }
}
