//! Chrome backed sessions (chromey).

use super::{BrowserSession, SessionFactory};
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::EventLoadingFinished;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::{Point, ScrollBehavior};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use submit_agent_types::Viewport;

/// Quiet window that counts as network idle.
const IDLE_WINDOW: Duration = Duration::from_millis(500);

fn map_cdp(e: CdpError) -> AgentError {
    match &e {
        CdpError::Ws(_)
        | CdpError::ChannelSendError(_)
        | CdpError::NoResponse
        | CdpError::LaunchExit(_, _)
        | CdpError::LaunchTimeout(_)
        | CdpError::LaunchIo(_, _) => AgentError::FatalBrowser(e.to_string()),
        _ => AgentError::Browser(e.to_string()),
    }
}

/// Launches one Chrome process and hands out isolated contexts.
pub struct ChromeSessionFactory {
    browser: Arc<Browser>,
    handler: tokio::task::JoinHandle<()>,
    viewport: Viewport,
}

impl ChromeSessionFactory {
    /// Launch Chrome.
    pub async fn launch(headless: bool, viewport: Viewport) -> AgentResult<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(viewport.width, viewport.height)
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: viewport.width,
                height: viewport.height,
                ..Default::default()
            });
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(AgentError::FatalBrowser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(map_cdp)?;

        // Poll the handler until the connection goes away.
        let handler = tokio::spawn(async move {
            while let Some(k) = handler.next().await {
                if let Err(e) = k {
                    match e {
                        CdpError::Ws(_)
                        | CdpError::LaunchExit(_, _)
                        | CdpError::LaunchTimeout(_)
                        | CdpError::LaunchIo(_, _) => break,
                        _ => continue,
                    }
                }
            }
        });

        log::info!(
            "chrome launched ({}x{}, headless: {})",
            viewport.width,
            viewport.height,
            headless
        );

        Ok(Self {
            browser: Arc::new(browser),
            handler,
            viewport,
        })
    }
}

impl Drop for ChromeSessionFactory {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self) -> AgentResult<Box<dyn BrowserSession>> {
        let mut create = CreateBrowserContextParams::default();
        create.dispose_on_detach = Some(true);
        let context_id = self
            .browser
            .execute(create)
            .await
            .map_err(map_cdp)?
            .result
            .browser_context_id;

        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(context_id.clone());
        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = self.browser.dispose_browser_context(context_id).await;
                return Err(map_cdp(e));
            }
        };

        Ok(Box::new(ChromeSession {
            browser: self.browser.clone(),
            page,
            context_id,
            viewport: self.viewport,
        }))
    }
}

/// One page inside its own browser context.
pub struct ChromeSession {
    browser: Arc<Browser>,
    page: Page,
    context_id: BrowserContextId,
    viewport: Viewport,
}

impl ChromeSession {
    async fn mouse(&self, kind: DispatchMouseEventType, x: f64, y: f64) -> AgentResult<()> {
        let pressed = matches!(kind, DispatchMouseEventType::MousePressed);
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(MouseButton::Left);
        if pressed {
            builder = builder.buttons(1).click_count(1);
        }
        let cmd = builder.build().map_err(AgentError::Browser)?;
        self.page.execute(cmd).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn key(&self, kind: DispatchKeyEventType, key: &str, modifiers: i64) -> AgentResult<()> {
        let cmd = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key)
            .modifiers(modifiers)
            .build()
            .map_err(AgentError::Browser)?;
        self.page.execute(cmd).await.map_err(map_cdp)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> AgentResult<()> {
        self.page.goto(url).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn go_back(&self) -> AgentResult<()> {
        self.page
            .evaluate("window.history.back()")
            .await
            .map_err(map_cdp)?;
        Ok(())
    }

    async fn current_url(&self) -> AgentResult<Option<String>> {
        self.page.url().await.map_err(map_cdp)
    }

    async fn html(&self) -> AgentResult<String> {
        self.page.content().await.map_err(map_cdp)
    }

    async fn screenshot(&self) -> AgentResult<Vec<u8>> {
        self.page
            .screenshot(ScreenshotParams::builder().full_page(false).build())
            .await
            .map_err(map_cdp)
    }

    async fn viewport(&self) -> AgentResult<Viewport> {
        let size: Option<Vec<u32>> = self
            .page
            .evaluate("[window.innerWidth, window.innerHeight]")
            .await
            .map_err(map_cdp)?
            .into_value()
            .ok();
        Ok(match size.as_deref() {
            Some([w, h, ..]) if *w > 0 && *h > 0 => Viewport::new(*w, *h),
            _ => self.viewport,
        })
    }

    async fn click(&self, x: f64, y: f64) -> AgentResult<()> {
        let point = Point::new(x, y);
        self.page.move_mouse(point).await.map_err(map_cdp)?;
        self.page.click(point).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn clear_focused(&self) -> AgentResult<()> {
        // Ctrl+A then Backspace.
        self.key(DispatchKeyEventType::RawKeyDown, "a", 2).await?;
        self.key(DispatchKeyEventType::KeyUp, "a", 2).await?;
        self.page.press_key("Backspace").await.map_err(map_cdp)?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> AgentResult<()> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(map_cdp)?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> AgentResult<()> {
        self.page.press_key(key).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> AgentResult<()> {
        self.page
            .scroll_by(dx, dy, ScrollBehavior::Instant)
            .await
            .map_err(map_cdp)?;
        Ok(())
    }

    async fn mouse_move(&self, x: f64, y: f64) -> AgentResult<()> {
        self.mouse(DispatchMouseEventType::MouseMoved, x, y).await
    }

    async fn mouse_down(&self, x: f64, y: f64) -> AgentResult<()> {
        self.mouse(DispatchMouseEventType::MousePressed, x, y).await
    }

    async fn mouse_up(&self, x: f64, y: f64) -> AgentResult<()> {
        self.mouse(DispatchMouseEventType::MouseReleased, x, y).await
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> AgentResult<()> {
        if timeout.is_zero() {
            return Ok(());
        }
        let Ok(mut events) = self.page.event_listener::<EventLoadingFinished>().await else {
            tokio::time::sleep(timeout.min(IDLE_WINDOW)).await;
            return Ok(());
        };

        let quiet = async {
            loop {
                let sleep = tokio::time::sleep(IDLE_WINDOW);
                tokio::pin!(sleep);
                tokio::select! {
                    _ = &mut sleep => break,
                    v = events.next() => {
                        if v.is_none() {
                            break;
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(timeout, quiet).await.is_err() {
            log::debug!("network idle wait hit {:?}", timeout);
        }
        Ok(())
    }

    async fn close(&self) -> AgentResult<()> {
        if let Err(e) = self.page.clone().close().await {
            log::debug!("page close failed: {}", e);
        }
        self.browser
            .dispose_browser_context(self.context_id.clone())
            .await
            .map(|_| ())
            .map_err(map_cdp)
    }
}
