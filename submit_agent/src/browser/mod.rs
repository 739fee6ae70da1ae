//! Browser session seam.
//!
//! The controller and executor only talk to a [`BrowserSession`]; the
//! orchestrator gets a fresh one per target from a [`SessionFactory`].
//! The Chrome backend lives behind the `chrome` feature.

#[cfg(feature = "chrome")]
mod chrome;

#[cfg(feature = "chrome")]
pub use chrome::{ChromeSession, ChromeSessionFactory};

use crate::error::AgentResult;
use async_trait::async_trait;
use std::time::Duration;
use submit_agent_types::Viewport;

/// Low level operations on one isolated page.
///
/// Coordinates are CSS pixels. Errors that leave the page usable are
/// `AgentError::Browser`; a dead session is `AgentError::FatalBrowser`.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load a URL and wait for the load event.
    async fn navigate(&self, url: &str) -> AgentResult<()>;

    /// History back.
    async fn go_back(&self) -> AgentResult<()>;

    /// Current page URL.
    async fn current_url(&self) -> AgentResult<Option<String>>;

    /// Current page HTML.
    async fn html(&self) -> AgentResult<String>;

    /// PNG screenshot of the viewport.
    async fn screenshot(&self) -> AgentResult<Vec<u8>>;

    /// Viewport size.
    async fn viewport(&self) -> AgentResult<Viewport>;

    /// Move the pointer and click.
    async fn click(&self, x: f64, y: f64) -> AgentResult<()>;

    /// Select all text in the focused element and delete it.
    async fn clear_focused(&self) -> AgentResult<()>;

    /// Type into the focused element.
    async fn type_text(&self, text: &str) -> AgentResult<()>;

    /// Press a named key (e.g. `Enter`).
    async fn press_key(&self, key: &str) -> AgentResult<()>;

    /// Scroll the document.
    async fn scroll_by(&self, dx: f64, dy: f64) -> AgentResult<()>;

    /// Move the pointer without pressing.
    async fn mouse_move(&self, x: f64, y: f64) -> AgentResult<()>;

    /// Press the left button at a point.
    async fn mouse_down(&self, x: f64, y: f64) -> AgentResult<()>;

    /// Release the left button at a point.
    async fn mouse_up(&self, x: f64, y: f64) -> AgentResult<()>;

    /// Wait until the network is quiet or `timeout` elapses.
    async fn wait_for_network_idle(&self, timeout: Duration) -> AgentResult<()>;

    /// Release the session and everything it holds.
    async fn close(&self) -> AgentResult<()>;
}

/// Produces isolated sessions, one per target.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a fresh session with no cookies or storage.
    async fn open(&self) -> AgentResult<Box<dyn BrowserSession>>;
}
