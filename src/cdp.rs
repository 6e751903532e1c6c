//! Chrome DevTools Protocol adapter implementation

use crate::{
    BoundingBox, ClipRegion, Error, Interaction, RenderContext, Renderer, RendererConfig,
    RendererLauncher, Result, Viewport,
};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Page, Target};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Launches headless Chrome instances (uses the `headless_chrome` crate)
pub struct CdpLauncher {
    config: RendererConfig,
}

impl CdpLauncher {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }
}

impl RendererLauncher for CdpLauncher {
    fn launch(&self) -> Result<Arc<dyn Renderer>> {
        Ok(Arc::new(CdpRenderer::launch(&self.config)?))
    }
}

/// CDP-based renderer instance
///
/// Owns one headless Chrome process. Every [`RenderContext`] it hands out
/// lives in its own browser context (separate cookies, storage and page).
pub struct CdpRenderer {
    browser: Browser,
    viewport: Viewport,
}

impl CdpRenderer {
    pub fn launch(config: &RendererConfig) -> Result<Self> {
        // The window size doubles as the viewport of every page the browser opens
        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .path(config.chrome_path.clone())
            .idle_browser_timeout(Duration::from_millis(config.idle_timeout_ms))
            .build()
            .map_err(|e| {
                Error::RendererUnavailable(format!("Failed to build launch options: {}", e))
            })?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::RendererUnavailable(format!("Failed to launch browser: {}", e)))?;

        Ok(Self {
            browser,
            viewport: config.viewport,
        })
    }

    /// Only a browser that stopped answering is reported as unavailable; any
    /// other creation failure is scoped to the request that hit it.
    fn creation_error(&self, what: &str, err: anyhow::Error) -> Error {
        let message = format!("Failed to create {}: {}", what, err);
        if self.is_running() {
            Error::CdpError(message)
        } else {
            Error::RendererUnavailable(message)
        }
    }
}

impl Renderer for CdpRenderer {
    fn is_running(&self) -> bool {
        self.browser.get_version().is_ok()
    }

    fn new_context(&self, viewport: Viewport) -> Result<Box<dyn RenderContext>> {
        if viewport != self.viewport {
            warn!(
                "Requested viewport {}x{} differs from launch viewport {}x{}; using launch viewport",
                viewport.width, viewport.height, self.viewport.width, self.viewport.height
            );
        }

        let context = self
            .browser
            .new_context()
            .map_err(|e| self.creation_error("context", e))?;
        let context_id = context.get_id().to_string();

        let tab = match context.new_tab() {
            Ok(tab) => tab,
            Err(e) => {
                dispose_context(&self.browser, &context_id);
                return Err(self.creation_error("tab", e));
            }
        };

        debug!("Opened browser context {}", context_id);

        Ok(Box::new(CdpContext {
            browser: self.browser.clone(),
            context_id,
            tab,
        }))
    }

    fn close(&self) -> Result<()> {
        // Closing every tab lets Chrome exit once the last handle is dropped
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map(|tabs| tabs.clone())
            .unwrap_or_default();
        for tab in tabs {
            if let Err(e) = tab.close(false) {
                warn!("Failed to close tab {}: {}", tab.get_target_id(), e);
            }
        }
        Ok(())
    }
}

/// One isolated browser context with a single page
pub struct CdpContext {
    browser: Browser,
    context_id: String,
    tab: Arc<Tab>,
}

impl RenderContext for CdpContext {
    fn load_local_document(&mut self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::CdpError(format!("Wait for navigation failed: {}", e)))?;

        Ok(())
    }

    fn interact(&mut self, selector: &str, action: Interaction) -> Result<()> {
        let element = self
            .tab
            .wait_for_element(selector)
            .map_err(|e| Error::RenderTargetNotFound(format!("{}: {}", selector, e)))?;

        match action {
            Interaction::Click => {
                element
                    .click()
                    .map_err(|e| Error::CdpError(format!("Click on {} failed: {}", selector, e)))?;
            }
        }
        Ok(())
    }

    fn set_field_value(&mut self, selector: &str, value: &str) -> Result<()> {
        let element = self
            .tab
            .wait_for_element(selector)
            .map_err(|e| Error::RenderTargetNotFound(format!("{}: {}", selector, e)))?;

        // Full replacement followed by an input event, so the page re-runs its
        // layout for the new text.
        element
            .call_js_fn(
                r#"function(v) {
                    this.focus();
                    this.value = v;
                    this.dispatchEvent(new Event('input', { bubbles: true }));
                    this.dispatchEvent(new Event('change', { bubbles: true }));
                }"#,
                vec![serde_json::Value::String(value.to_string())],
                false,
            )
            .map_err(|e| Error::CdpError(format!("Fill of {} failed: {}", selector, e)))?;

        Ok(())
    }

    fn locate_element_bounding_box(&mut self, selector: &str) -> Result<BoundingBox> {
        let element = self
            .tab
            .wait_for_element(selector)
            .map_err(|e| Error::RenderTargetNotFound(format!("{}: {}", selector, e)))?;

        let model = element
            .get_box_model()
            .map_err(|e| Error::RenderTargetNotFound(format!("{} has no box: {}", selector, e)))?;
        let border = model.border_viewport();

        Ok(BoundingBox {
            x: border.x,
            y: border.y,
            width: border.width,
            height: border.height,
        })
    }

    fn capture_region(&mut self, clip: ClipRegion) -> Result<Vec<u8>> {
        let viewport = Page::Viewport {
            x: clip.x,
            y: clip.y,
            width: clip.width,
            height: clip.height,
            scale: 1.0,
        };

        let png = self
            .tab
            .capture_screenshot(
                Page::CaptureScreenshotFormatOption::Png,
                None,
                Some(viewport),
                true,
            )
            .map_err(|e| Error::CaptureFailed(format!("Screenshot failed: {}", e)))?;

        if png.is_empty() {
            return Err(Error::CaptureFailed("Screenshot returned no data".into()));
        }
        Ok(png)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let closed = self
            .tab
            .close(false)
            .map_err(|e| Error::CdpError(format!("Failed to close tab: {}", e)));
        dispose_context(&self.browser, &self.context_id);
        debug!("Closed browser context {}", self.context_id);
        closed.map(|_| ())
    }
}

fn dispose_context(browser: &Browser, context_id: &str) {
    let _ = browser
        .call_method(Target::DisposeBrowserContext {
            browser_context_id: context_id.to_string(),
        })
        .map_err(|e| warn!("Failed to dispose browser context {}: {}", context_id, e));
}
