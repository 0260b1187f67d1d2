//! Driver capabilities consumed by the waits
//!
//! The poller never talks to a browser directly. It consumes three narrow
//! capabilities so any automation backend (CDP, WebDriver, a test double)
//! can sit underneath:
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Observe    │   │     Act      │   │   Capture    │
//! │ present/vis/ │   │ click/keys/  │   │  screenshot  │
//! │ enabled/text │   │ navigate/    │   │   (PNG)      │
//! │ url/alert    │   │ alerts       │   │              │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────── Driver (blanket) ───────┘
//! ```
//!
//! Observation methods may fail with `SettleError::Observation`; the poller
//! treats that as "not yet known" rather than as the outcome of a wait.

use crate::dialog::AlertHandle;
use crate::result::{SettleError, SettleResult};
use crate::selector::Selector;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// PNG signature
const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Screenshot data with metadata
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Raw PNG data
    pub data: Vec<u8>,
    /// Timestamp when screenshot was taken
    pub timestamp: std::time::SystemTime,
}

impl Screenshot {
    /// Create a new screenshot
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            timestamp: std::time::SystemTime::now(),
        }
    }

    /// Get the size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Check for the PNG signature
    #[must_use]
    pub fn is_png(&self) -> bool {
        self.data.starts_with(&PNG_MAGIC)
    }

    /// Width and height from the IHDR chunk
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        if !self.is_png() || self.data.len() < 24 {
            return None;
        }
        let width = u32::from_be_bytes(self.data[16..20].try_into().ok()?);
        let height = u32::from_be_bytes(self.data[20..24].try_into().ok()?);
        Some((width, height))
    }
}

/// Read-only queries against the UI
#[async_trait]
pub trait Observe: Send + Sync {
    /// Whether the target exists in the document
    async fn is_present(&self, target: &Selector) -> SettleResult<bool>;

    /// Whether the target is rendered visibly
    async fn is_displayed(&self, target: &Selector) -> SettleResult<bool>;

    /// Whether the target accepts interaction
    async fn is_enabled(&self, target: &Selector) -> SettleResult<bool>;

    /// Rendered text of the target
    async fn text(&self, target: &Selector) -> SettleResult<String>;

    /// Current location
    async fn current_url(&self) -> SettleResult<String>;

    /// The open dialog, if any
    async fn alert(&self) -> SettleResult<Option<AlertHandle>>;
}

/// Side-effecting actions. Never retried by the waits.
#[async_trait]
pub trait Act: Send + Sync {
    /// Click the target
    async fn click(&self, target: &Selector) -> SettleResult<()>;

    /// Dispatch the click from page script, bypassing hit-testing
    ///
    /// Reaches elements covered by an overlay or iframe. Drivers whose
    /// `click` already goes through script can keep the default.
    async fn click_via_script(&self, target: &Selector) -> SettleResult<()> {
        self.click(target).await
    }

    /// Type text into the target
    async fn send_keys(&self, target: &Selector, text: &str) -> SettleResult<()>;

    /// Press Enter in the target
    async fn submit(&self, target: &Selector) -> SettleResult<()>;

    /// Navigate to URL
    async fn navigate(&self, url: &str) -> SettleResult<()>;

    /// Accept the open dialog
    async fn accept_alert(&self) -> SettleResult<()>;

    /// Dismiss the open dialog
    async fn dismiss_alert(&self) -> SettleResult<()>;
}

/// Visual state capture
#[async_trait]
pub trait Capture: Send + Sync {
    /// Take a PNG screenshot of the current viewport
    async fn screenshot(&self) -> SettleResult<Screenshot>;
}

/// Everything a session needs from a backend
pub trait Driver: Observe + Act + Capture {}

impl<T: Observe + Act + Capture> Driver for T {}

// ============================================================================
// Mock driver
// ============================================================================

/// Element state served by [`MockDriver`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockElement {
    /// Exists in the document
    pub present: bool,
    /// Rendered visibly
    pub displayed: bool,
    /// Accepts interaction
    pub enabled: bool,
    /// Rendered text
    pub text: String,
}

impl MockElement {
    /// Present, visible and enabled
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            present: true,
            displayed: true,
            enabled: true,
            text: String::new(),
        }
    }

    /// Present but not rendered
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            present: true,
            ..Self::default()
        }
    }

    /// Present and visible but disabled
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::interactive()
        }
    }

    /// Set the rendered text
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    elements: HashMap<Selector, MockElement>,
    unqueryable: HashSet<Selector>,
    failing_actions: HashSet<Selector>,
    url: String,
    alert: Option<AlertHandle>,
    screenshots: VecDeque<Screenshot>,
    last_screenshot: Option<Screenshot>,
    queries: usize,
    history: Vec<String>,
}

/// Scriptable driver for unit tests
///
/// Clones share state, so a spawned task can flip element state while a
/// wait is polling the same driver.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an element
    pub fn set_element(&self, target: Selector, element: MockElement) {
        self.state().elements.insert(target, element);
    }

    /// Remove an element from the document
    pub fn remove_element(&self, target: &Selector) {
        self.state().elements.remove(target);
    }

    /// Make every query for `target` fail with an observation error
    pub fn make_unqueryable(&self, target: Selector) {
        self.state().unqueryable.insert(target);
    }

    /// Undo [`Self::make_unqueryable`]
    pub fn make_queryable(&self, target: &Selector) {
        self.state().unqueryable.remove(target);
    }

    /// Make clicks/typing on `target` fail with an action error
    pub fn fail_actions_on(&self, target: Selector) {
        self.state().failing_actions.insert(target);
    }

    /// Set current URL
    pub fn set_url(&self, url: impl Into<String>) {
        self.state().url = url.into();
    }

    /// Open or close a dialog
    pub fn set_alert(&self, alert: Option<AlertHandle>) {
        self.state().alert = alert;
    }

    /// Queue a screenshot; the last one served repeats once the queue drains
    pub fn push_screenshot(&self, screenshot: Screenshot) {
        self.state().screenshots.push_back(screenshot);
    }

    /// Number of observation calls served so far
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.state().queries
    }

    /// Get call history for actions
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.state().history.clone()
    }

    /// Check if an action was called
    #[must_use]
    pub fn was_called(&self, action: &str) -> bool {
        self.state().history.iter().any(|c| c.starts_with(action))
    }

    fn element(&self, target: &Selector) -> SettleResult<Option<MockElement>> {
        let mut state = self.state();
        state.queries += 1;
        if state.unqueryable.contains(target) {
            return Err(SettleError::observation(format!(
                "{target} is not queryable"
            )));
        }
        Ok(state.elements.get(target).filter(|e| e.present).cloned())
    }

    fn attached(&self, target: &Selector) -> SettleResult<MockElement> {
        self.element(target)?
            .ok_or_else(|| SettleError::observation(format!("stale element reference: {target}")))
    }

    fn record_action(&self, target: &Selector, entry: String) -> SettleResult<()> {
        let mut state = self.state();
        if state.failing_actions.contains(target) {
            return Err(SettleError::action(format!("{target} rejected the action")));
        }
        if !state.elements.get(target).is_some_and(|e| e.present) {
            return Err(SettleError::action(format!("no such element: {target}")));
        }
        state.history.push(entry);
        Ok(())
    }
}

#[async_trait]
impl Observe for MockDriver {
    async fn is_present(&self, target: &Selector) -> SettleResult<bool> {
        Ok(self.element(target)?.is_some())
    }

    async fn is_displayed(&self, target: &Selector) -> SettleResult<bool> {
        Ok(self.attached(target)?.displayed)
    }

    async fn is_enabled(&self, target: &Selector) -> SettleResult<bool> {
        Ok(self.attached(target)?.enabled)
    }

    async fn text(&self, target: &Selector) -> SettleResult<String> {
        Ok(self.attached(target)?.text)
    }

    async fn current_url(&self) -> SettleResult<String> {
        let mut state = self.state();
        state.queries += 1;
        Ok(state.url.clone())
    }

    async fn alert(&self) -> SettleResult<Option<AlertHandle>> {
        let mut state = self.state();
        state.queries += 1;
        Ok(state.alert.clone())
    }
}

#[async_trait]
impl Act for MockDriver {
    async fn click(&self, target: &Selector) -> SettleResult<()> {
        self.record_action(target, format!("click:{target}"))
    }

    async fn click_via_script(&self, target: &Selector) -> SettleResult<()> {
        self.record_action(target, format!("script_click:{target}"))
    }

    async fn send_keys(&self, target: &Selector, text: &str) -> SettleResult<()> {
        self.record_action(target, format!("send_keys:{target}:{text}"))
    }

    async fn submit(&self, target: &Selector) -> SettleResult<()> {
        self.record_action(target, format!("submit:{target}"))
    }

    async fn navigate(&self, url: &str) -> SettleResult<()> {
        let mut state = self.state();
        state.history.push(format!("navigate:{url}"));
        state.url = url.to_string();
        Ok(())
    }

    async fn accept_alert(&self) -> SettleResult<()> {
        let mut state = self.state();
        if state.alert.take().is_none() {
            return Err(SettleError::action("no dialog is open"));
        }
        state.history.push("accept_alert".to_string());
        Ok(())
    }

    async fn dismiss_alert(&self) -> SettleResult<()> {
        let mut state = self.state();
        if state.alert.take().is_none() {
            return Err(SettleError::action("no dialog is open"));
        }
        state.history.push("dismiss_alert".to_string());
        Ok(())
    }
}

#[async_trait]
impl Capture for MockDriver {
    async fn screenshot(&self) -> SettleResult<Screenshot> {
        let mut state = self.state();
        if let Some(next) = state.screenshots.pop_front() {
            state.last_screenshot = Some(next);
        }
        state
            .last_screenshot
            .clone()
            .ok_or_else(|| SettleError::capture("No mock screenshot set"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = PNG_MAGIC.to_vec();
        data.extend_from_slice(&[0, 0, 0, 13]);
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data
    }

    mod screenshot_tests {
        use super::*;

        #[test]
        fn test_screenshot_dimensions() {
            let shot = Screenshot::new(png_header(800, 600));
            assert!(shot.is_png());
            assert_eq!(shot.dimensions(), Some((800, 600)));
        }

        #[test]
        fn test_non_png_has_no_dimensions() {
            let shot = Screenshot::new(vec![1, 2, 3]);
            assert!(!shot.is_png());
            assert_eq!(shot.dimensions(), None);
            assert_eq!(shot.size_bytes(), 3);
        }
    }

    mod mock_observe_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_element_is_absent() {
            let driver = MockDriver::new();
            let sel = Selector::id("nope");
            assert!(!driver.is_present(&sel).await.unwrap());
            let err = driver.is_displayed(&sel).await.unwrap_err();
            assert!(err.is_transient());
        }

        #[tokio::test]
        async fn test_unqueryable_element_errors_transiently() {
            let driver = MockDriver::new();
            let sel = Selector::css(".spinner");
            driver.set_element(sel.clone(), MockElement::interactive());
            driver.make_unqueryable(sel.clone());
            assert!(driver.is_present(&sel).await.unwrap_err().is_transient());
            driver.make_queryable(&sel);
            assert!(driver.is_present(&sel).await.unwrap());
        }

        #[tokio::test]
        async fn test_clones_share_state() {
            let driver = MockDriver::new();
            let other = driver.clone();
            other.set_url("https://example.com/app");
            assert_eq!(driver.current_url().await.unwrap(), "https://example.com/app");
            assert_eq!(driver.query_count(), 1);
        }
    }

    mod mock_act_tests {
        use super::*;

        #[tokio::test]
        async fn test_click_records_history() {
            let driver = MockDriver::new();
            let sel = Selector::id("go");
            driver.set_element(sel.clone(), MockElement::interactive());
            driver.click(&sel).await.unwrap();
            assert!(driver.was_called("click:#go"));
        }

        #[tokio::test]
        async fn test_script_click_ignores_visibility() {
            let driver = MockDriver::new();
            let sel = Selector::id("covered");
            driver.set_element(sel.clone(), MockElement::hidden());
            driver.click_via_script(&sel).await.unwrap();
            assert!(driver.was_called("script_click:#covered"));
        }

        #[tokio::test]
        async fn test_click_missing_element_fails() {
            let driver = MockDriver::new();
            let err = driver.click(&Selector::id("go")).await.unwrap_err();
            assert!(matches!(err, SettleError::Action { .. }));
        }

        #[tokio::test]
        async fn test_accept_alert_requires_dialog() {
            let driver = MockDriver::new();
            assert!(driver.accept_alert().await.is_err());
            driver.set_alert(Some(AlertHandle::alert("Saved")));
            driver.accept_alert().await.unwrap();
            assert!(driver.alert().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_navigate_sets_url() {
            let driver = MockDriver::new();
            driver.navigate("https://example.com").await.unwrap();
            assert_eq!(driver.current_url().await.unwrap(), "https://example.com");
            assert!(driver.was_called("navigate"));
        }
    }

    mod mock_capture_tests {
        use super::*;

        #[tokio::test]
        async fn test_screenshot_queue_repeats_last() {
            let driver = MockDriver::new();
            assert!(driver.screenshot().await.is_err());
            driver.push_screenshot(Screenshot::new(vec![1]));
            driver.push_screenshot(Screenshot::new(vec![2]));
            assert_eq!(driver.screenshot().await.unwrap().data, vec![1]);
            assert_eq!(driver.screenshot().await.unwrap().data, vec![2]);
            assert_eq!(driver.screenshot().await.unwrap().data, vec![2]);
        }
    }
}
