//! Chromium driver over the Chrome `DevTools` Protocol.
//!
//! Gives the capability traits one real backend. Element queries are
//! evaluated as JavaScript built from [`Selector::to_query`]; dialogs are
//! tracked from CDP dialog events so `alert()` never blocks on the page.

use crate::dialog::{AlertHandle, DialogKind};
use crate::driver::{Act, Capture, Observe, Screenshot};
use crate::result::{SettleError, SettleResult};
use crate::selector::Selector;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, DialogType, EventJavascriptDialogClosed,
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::debug;

/// Browser configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Running Chromium instance
#[derive(Debug)]
pub struct Browser {
    inner: CdpBrowser,
    handler: JoinHandle<()>,
}

impl Browser {
    /// Launch a new browser instance
    ///
    /// # Errors
    ///
    /// Returns `Browser` error if chromium cannot be started
    pub async fn launch(config: BrowserConfig) -> SettleResult<Self> {
        let mut builder =
            CdpConfig::builder().window_size(config.viewport_width, config.viewport_height);

        if !config.headless {
            builder = builder.with_head();
        }

        if !config.sandbox {
            builder = builder.no_sandbox();
        }

        if let Some(ref path) = config.chromium_path {
            builder = builder.chrome_executable(path);
        }

        let cdp_config = builder.build().map_err(browser_error)?;

        let (browser, mut handler) = CdpBrowser::launch(cdp_config)
            .await
            .map_err(|e| SettleError::Browser {
                message: e.to_string(),
            })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            inner: browser,
            handler,
        })
    }

    /// Open a blank page and wrap it in a driver
    ///
    /// # Errors
    ///
    /// Returns `Browser` error if the page or its dialog listeners cannot be
    /// created
    pub async fn new_driver(&self) -> SettleResult<CdpDriver> {
        let page = self
            .inner
            .new_page("about:blank")
            .await
            .map_err(browser_error)?;
        CdpDriver::attach(page).await
    }

    /// Close the browser
    ///
    /// # Errors
    ///
    /// Returns `Browser` error if chromium does not shut down cleanly
    pub async fn close(mut self) -> SettleResult<()> {
        self.inner.close().await.map_err(browser_error)?;
        self.handler.abort();
        Ok(())
    }
}

fn browser_error(e: impl std::fmt::Display) -> SettleError {
    SettleError::Browser {
        message: e.to_string(),
    }
}

/// [`Observe`]/[`Act`]/[`Capture`] for one chromium page
#[derive(Debug)]
pub struct CdpDriver {
    page: CdpPage,
    dialog: Arc<Mutex<Option<AlertHandle>>>,
    listener: JoinHandle<()>,
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl CdpDriver {
    /// Wrap an existing page, subscribing to its dialog events
    ///
    /// # Errors
    ///
    /// Returns `Browser` error if the event listeners cannot be registered
    pub async fn attach(page: CdpPage) -> SettleResult<Self> {
        let mut opened = page
            .event_listener::<EventJavascriptDialogOpening>()
            .await
            .map_err(browser_error)?;
        let mut closed = page
            .event_listener::<EventJavascriptDialogClosed>()
            .await
            .map_err(browser_error)?;

        let dialog = Arc::new(Mutex::new(None));
        let tracked = Arc::clone(&dialog);
        let listener = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    Some(event) = opened.next() => Some(AlertHandle {
                        kind: dialog_kind(&event.r#type),
                        message: event.message.clone(),
                        default_value: event.default_prompt.clone(),
                    }),
                    Some(_) = closed.next() => None,
                    else => break,
                };
                debug!(open = next.is_some(), "dialog state changed");
                *tracked.lock().unwrap_or_else(PoisonError::into_inner) = next;
            }
        });

        Ok(Self {
            page,
            dialog,
            listener,
        })
    }

    /// The wrapped page
    #[must_use]
    pub const fn page(&self) -> &CdpPage {
        &self.page
    }

    async fn eval<T: DeserializeOwned + Send>(&self, expr: String) -> Result<T, String> {
        let result = self.page.evaluate(expr).await.map_err(|e| e.to_string())?;
        result.into_value().map_err(|e| e.to_string())
    }

    /// Evaluate `body` with `el` bound to the target; `None` when absent
    async fn on_element<T: DeserializeOwned + Send>(
        &self,
        target: &Selector,
        body: &str,
    ) -> Result<Option<T>, String> {
        let expr = format!(
            "JSON.stringify((() => {{ const el = {}; if (el == null) return null; {body} }})())",
            target.to_query()
        );
        let json: String = self.eval(expr).await?;
        serde_json::from_str(&json).map_err(|e| e.to_string())
    }

    /// Observation on an element that must be attached
    async fn observe_attached<T: DeserializeOwned + Send>(
        &self,
        target: &Selector,
        body: &str,
    ) -> SettleResult<T> {
        self.on_element(target, body)
            .await
            .map_err(SettleError::observation)?
            .ok_or_else(|| SettleError::observation(format!("stale element reference: {target}")))
    }

    /// Action on an element that must exist
    async fn act_on(&self, target: &Selector, body: &str) -> SettleResult<()> {
        self.on_element::<bool>(target, body)
            .await
            .map_err(SettleError::action)?
            .map(|_| ())
            .ok_or_else(|| SettleError::action(format!("no such element: {target}")))
    }

    async fn handle_dialog(&self, accept: bool) -> SettleResult<()> {
        self.page
            .execute(HandleJavaScriptDialogParams::new(accept))
            .await
            .map_err(|e| SettleError::action(e.to_string()))?;
        *self.dialog.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

fn dialog_kind(kind: &DialogType) -> DialogKind {
    match kind {
        DialogType::Alert => DialogKind::Alert,
        DialogType::Confirm => DialogKind::Confirm,
        DialogType::Prompt => DialogKind::Prompt,
        DialogType::Beforeunload => DialogKind::BeforeUnload,
    }
}

const VISIBLE: &str = "const s = getComputedStyle(el); const r = el.getBoundingClientRect(); \
     return s.display !== 'none' && s.visibility !== 'hidden' && (r.width > 0 || r.height > 0);";
const ENABLED: &str = "return el.disabled !== true && el.getAttribute('aria-disabled') !== 'true';";
const TEXT: &str = "return (el.innerText ?? el.textContent ?? '').trim();";
const CLICK: &str = "el.click(); return true;";
const SCRIPT_CLICK: &str = "el.dispatchEvent(new MouseEvent('click', { bubbles: true, cancelable: true, view: window })); return true;";
const FOCUS: &str = "el.focus(); return true;";

#[async_trait]
impl Observe for CdpDriver {
    async fn is_present(&self, target: &Selector) -> SettleResult<bool> {
        let expr = format!("({}) != null", target.to_query());
        self.eval(expr).await.map_err(SettleError::observation)
    }

    async fn is_displayed(&self, target: &Selector) -> SettleResult<bool> {
        self.observe_attached(target, VISIBLE).await
    }

    async fn is_enabled(&self, target: &Selector) -> SettleResult<bool> {
        self.observe_attached(target, ENABLED).await
    }

    async fn text(&self, target: &Selector) -> SettleResult<String> {
        self.observe_attached(target, TEXT).await
    }

    async fn current_url(&self) -> SettleResult<String> {
        self.page
            .url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| SettleError::observation(e.to_string()))
    }

    async fn alert(&self) -> SettleResult<Option<AlertHandle>> {
        Ok(self
            .dialog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[async_trait]
impl Act for CdpDriver {
    async fn click(&self, target: &Selector) -> SettleResult<()> {
        self.act_on(target, CLICK).await
    }

    async fn click_via_script(&self, target: &Selector) -> SettleResult<()> {
        self.act_on(target, SCRIPT_CLICK).await
    }

    async fn send_keys(&self, target: &Selector, text: &str) -> SettleResult<()> {
        let value = serde_json::to_string(text)?;
        let body = format!(
            "el.focus(); el.value = (el.value ?? '') + {value}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;"
        );
        self.act_on(target, &body).await
    }

    async fn submit(&self, target: &Selector) -> SettleResult<()> {
        self.act_on(target, FOCUS).await?;
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key("Enter")
                .code("Enter")
                .text("\r")
                .windows_virtual_key_code(13)
                .build()
                .map_err(SettleError::action)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| SettleError::action(e.to_string()))?;
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> SettleResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| SettleError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn accept_alert(&self) -> SettleResult<()> {
        self.handle_dialog(true).await
    }

    async fn dismiss_alert(&self) -> SettleResult<()> {
        self.handle_dialog(false).await
    }
}

#[async_trait]
impl Capture for CdpDriver {
    async fn screenshot(&self) -> SettleResult<Screenshot> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        let screenshot = self
            .page
            .execute(params)
            .await
            .map_err(|e| SettleError::capture(e.to_string()))?;

        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD
            .decode(&screenshot.data)
            .map_err(|e| SettleError::capture(e.to_string()))?;
        Ok(Screenshot::new(data))
    }
}
