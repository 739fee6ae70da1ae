//! Executes action descriptors against a browser session.

use crate::browser::BrowserSession;
use crate::config::ExecutorConfig;
use crate::error::{AgentError, AgentResult};
use submit_agent_types::{ActionDescriptor, ActionKind, ActionOutcome, Viewport};

/// Runs one proposed action at a time and reports what happened.
///
/// Non-fatal browser failures come back as `OutcomeStatus::Error` outcomes;
/// only `AgentError::FatalBrowser` is returned as an error.
#[derive(Debug, Clone, Default)]
pub struct ActionExecutor {
    config: ExecutorConfig,
}

impl ActionExecutor {
    /// Create an executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Executor timings.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a single action.
    pub async fn execute(
        &self,
        session: &dyn BrowserSession,
        action: &ActionDescriptor,
        viewport: Viewport,
    ) -> AgentResult<ActionOutcome> {
        let result = match &action.kind {
            ActionKind::Click => self.click(session, action, viewport).await,
            ActionKind::TypeText => self.type_text(session, action, viewport).await,
            ActionKind::Navigate => self.navigate(session, action).await,
            ActionKind::Scroll => {
                let (dx, dy) = action
                    .direction
                    .unwrap_or_default()
                    .delta(self.config.scroll_distance);
                session.scroll_by(dx, dy).await
            }
            ActionKind::Drag => self.drag(session, action, viewport).await,
            ActionKind::Wait => {
                tokio::time::sleep(self.config.wait_duration).await;
                Ok(())
            }
            ActionKind::GoBack => session.go_back().await,
            ActionKind::Other(name) => {
                log::info!("unimplemented action `{}`", name);
                return Ok(ActionOutcome::unimplemented(action));
            }
        };

        match result {
            Ok(()) => {
                let url = session.current_url().await.ok().flatten();
                Ok(ActionOutcome::success(action).with_url(url))
            }
            Err(e) if e.is_fatal_browser() => Err(e),
            Err(e) => {
                log::warn!("{} failed: {}", action.kind, e);
                Ok(ActionOutcome::error(action, e.to_string()))
            }
        }
    }

    /// Wait for network idle and the settle delay after a batch.
    pub async fn settle(&self, session: &dyn BrowserSession) -> AgentResult<()> {
        match session
            .wait_for_network_idle(self.config.network_idle_timeout)
            .await
        {
            Err(e) if e.is_fatal_browser() => return Err(e),
            Err(e) => log::debug!("network idle wait failed: {}", e),
            Ok(()) => (),
        }
        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }
        Ok(())
    }

    async fn click(
        &self,
        session: &dyn BrowserSession,
        action: &ActionDescriptor,
        viewport: Viewport,
    ) -> AgentResult<()> {
        let (x, y) = point(action, viewport)?;
        session.click(x, y).await
    }

    async fn type_text(
        &self,
        session: &dyn BrowserSession,
        action: &ActionDescriptor,
        viewport: Viewport,
    ) -> AgentResult<()> {
        let text = action
            .text
            .as_deref()
            .ok_or(AgentError::MissingField("text"))?;
        if action.x.is_some() && action.y.is_some() {
            let (x, y) = point(action, viewport)?;
            session.click(x, y).await?;
        }
        session.clear_focused().await?;
        session.type_text(text).await?;
        if action.press_enter {
            session.press_key("Enter").await?;
        }
        Ok(())
    }

    async fn navigate(
        &self,
        session: &dyn BrowserSession,
        action: &ActionDescriptor,
    ) -> AgentResult<()> {
        let raw = action
            .url
            .as_deref()
            .ok_or(AgentError::MissingField("url"))?;
        let url = validate_url(raw)?;
        session.navigate(&url).await
    }

    async fn drag(
        &self,
        session: &dyn BrowserSession,
        action: &ActionDescriptor,
        viewport: Viewport,
    ) -> AgentResult<()> {
        let start = point(action, viewport)?;
        let end = match (action.dest_x, action.dest_y) {
            (Some(x), Some(y)) => viewport.to_pixels(x, y),
            _ => return Err(AgentError::MissingField("dest_x/dest_y")),
        };

        session.mouse_move(start.0, start.1).await?;
        session.mouse_down(start.0, start.1).await?;
        for (x, y) in drag_path(start, end, self.config.drag_steps) {
            session.mouse_move(x, y).await?;
        }
        session.mouse_up(end.0, end.1).await
    }
}

fn point(action: &ActionDescriptor, viewport: Viewport) -> AgentResult<(f64, f64)> {
    match (action.x, action.y) {
        (Some(x), Some(y)) => Ok(viewport.to_pixels(x, y)),
        _ => Err(AgentError::MissingField("x/y")),
    }
}

/// Check a navigation target; anything but a parseable http(s) URL is fatal.
pub fn validate_url(raw: &str) -> AgentResult<String> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| AgentError::FatalBrowser(format!("invalid url `{}`: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        scheme => Err(AgentError::FatalBrowser(format!(
            "blocked url scheme `{}`",
            scheme
        ))),
    }
}

/// Intermediate pointer positions from `start` to `end`, ending at `end`.
pub fn drag_path(start: (f64, f64), end: (f64, f64), steps: usize) -> Vec<(f64, f64)> {
    let steps = steps.max(1);
    (1..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            (
                start.0 + (end.0 - start.0) * t,
                start.1 + (end.1 - start.1) * t,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drag_path() {
        let path = drag_path((0.0, 0.0), (100.0, 50.0), 10);
        assert_eq!(path.len(), 10);
        assert_eq!(path[0], (10.0, 5.0));
        assert_eq!(path[9], (100.0, 50.0));
        assert_eq!(drag_path((1.0, 1.0), (2.0, 2.0), 0), vec![(2.0, 2.0)]);
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url("https://dir.example.com/add").unwrap(),
            "https://dir.example.com/add"
        );
        assert!(validate_url("javascript:alert(1)")
            .unwrap_err()
            .is_fatal_browser());
        assert!(validate_url("file:///etc/passwd")
            .unwrap_err()
            .is_fatal_browser());
        assert!(validate_url("not a url").unwrap_err().is_fatal_browser());
    }
}
