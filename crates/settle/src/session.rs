//! Labeled wait operations over a driver
//!
//! A [`Session`] pairs a [`Driver`] with a [`Poller`] and a
//! [`ConvergenceLoop`]. Every method builds one of the standard predicates
//! and hands it to the poller; the caller's label becomes the prefix of the
//! timeout message (`"Save button did not appear"`).

use crate::config::{OperationKind, SettleConfig};
use crate::convergence::{Comparator, ConvergenceLoop, ConvergenceReport, MagickComparator};
use crate::dialog::AlertHandle;
use crate::driver::Driver;
use crate::predicates::{
    AlertPresent, Appears, Disappears, HasText, Removed, TextMatch, UrlMatches, UrlPattern,
};
use crate::result::{SettleError, SettleResult};
use crate::selector::Selector;
use crate::wait::{CancelSignal, Poller, WaitRequest, WaitResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Overlay shown while the app is busy
pub const SPINNER_SELECTOR: &str = ".spinner-backdrop.in";

/// Label used by [`Session::wait_for_spinner`]
pub const SPINNER_LABEL: &str = "Spinner element";

/// Where [`Session::take_screenshot`] writes when no path is given
pub const DEFAULT_SCREENSHOT_PATH: &str = "shot.png";

/// Wait operations bound to one driver
pub struct Session<D: ?Sized> {
    poller: Poller,
    convergence: ConvergenceLoop,
    cancel: Option<CancelSignal>,
    driver: Arc<D>,
}

impl<D: ?Sized> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("poller", &self.poller)
            .field("convergence", &self.convergence)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl<D: Driver + ?Sized> Session<D> {
    /// Create a session comparing screens with ImageMagick
    #[must_use]
    pub fn new(driver: Arc<D>, config: SettleConfig) -> Self {
        let convergence = ConvergenceLoop::new(&config, Arc::new(MagickComparator::new()));
        Self {
            poller: Poller::new(config),
            convergence,
            cancel: None,
            driver,
        }
    }

    /// Replace the screen comparator
    #[must_use]
    pub fn with_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.convergence = ConvergenceLoop::new(self.poller.config(), comparator);
        self
    }

    /// Abort every wait of this session when `cancel` fires
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The underlying driver
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The poller
    #[must_use]
    pub const fn poller(&self) -> &Poller {
        &self.poller
    }

    fn request(&self, label: String, timeout: Option<Duration>) -> WaitRequest {
        let request = WaitRequest::new(label).with_timeout_opt(timeout);
        match self.cancel {
            Some(ref cancel) => request.with_cancel(cancel.clone()),
            None => request,
        }
    }

    /// Wait until `target` exists, is visible and is enabled
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> did not appear"`
    pub async fn wait(
        &self,
        target: &Selector,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<WaitResult> {
        let request = self.request(format!("{label} did not appear"), timeout);
        self.poller
            .until(&Appears::new(self.driver(), target), &request)
            .await
    }

    /// Wait until `target` is absent or hidden
    ///
    /// Query failures count as disappeared.
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> did not disappear"`
    pub async fn wait_disappear(
        &self,
        target: &Selector,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<WaitResult> {
        let request = self.request(format!("{label} did not disappear"), timeout);
        self.poller
            .until(&Disappears::new(self.driver(), target), &request)
            .await
    }

    /// Wait until `target` no longer exists; hidden is not enough
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> did not disappear"`
    pub async fn wait_removed(
        &self,
        target: &Selector,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<WaitResult> {
        let request = self.request(format!("{label} did not disappear"), timeout);
        self.poller
            .until(&Removed::new(self.driver(), target), &request)
            .await
    }

    /// Wait until the text of `target` equals `expected`
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> text did not change"`
    pub async fn wait_for_text(
        &self,
        target: &Selector,
        expected: &str,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<WaitResult> {
        self.wait_for_text_matching(target, expected, TextMatch::Exact, label, timeout)
            .await
    }

    /// [`Self::wait_for_text`] with an explicit comparison mode
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> text did not change"`
    pub async fn wait_for_text_matching(
        &self,
        target: &Selector,
        expected: &str,
        mode: TextMatch,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<WaitResult> {
        let request = self.request(format!("{label} text did not change"), timeout);
        let predicate = HasText::new(self.driver(), target, expected).with_mode(mode);
        self.poller.until(&predicate, &request).await
    }

    /// Wait for a dialog and return its handle
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> alert did not appear"`
    pub async fn wait_for_alert(
        &self,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<AlertHandle> {
        let request = self.request(format!("{label} alert did not appear"), timeout);
        self.poller
            .until_value(&AlertPresent::new(self.driver()), &request)
            .await
    }

    /// Wait until the current URL contains `needle`
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"URL did not contain <needle>"`
    pub async fn wait_for_url(
        &self,
        needle: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<WaitResult> {
        let request = self.request(format!("URL did not contain {needle}"), timeout);
        let pattern = UrlPattern::Contains(needle.to_string());
        self.poller
            .until(&UrlMatches::new(self.driver(), &pattern), &request)
            .await
    }

    /// Wait until the current URL matches `pattern`
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"URL did not match <pattern>"`
    pub async fn wait_for_url_pattern(
        &self,
        pattern: &UrlPattern,
        timeout: Option<Duration>,
    ) -> SettleResult<WaitResult> {
        let request = self.request(format!("URL did not match {pattern}"), timeout);
        self.poller
            .until(&UrlMatches::new(self.driver(), pattern), &request)
            .await
    }

    /// Wait until `target` is clickable, then click it once
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> not clickable"`, or the click's own error
    pub async fn click_when_clickable(
        &self,
        target: &Selector,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<()> {
        let request = self.request(format!("{label} not clickable"), timeout);
        self.poller
            .until(&Appears::new(self.driver(), target), &request)
            .await?;
        self.driver.click(target).await?;
        debug!(%target, "clicked");
        Ok(())
    }

    /// Wait until `target` exists, then click it from page script
    ///
    /// Visibility is not checked: the element may sit under an iframe or
    /// overlay that would swallow a real click.
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"<label> not found"`, or the click's own error
    pub async fn click_via_script(
        &self,
        target: &Selector,
        label: &str,
        timeout: Option<Duration>,
    ) -> SettleResult<()> {
        let request = self.request(format!("{label} not found"), timeout);
        let driver = self.driver();
        self.poller
            .until_fn(move || driver.is_present(target), &request)
            .await?;
        driver.click_via_script(target).await?;
        debug!(%target, "clicked via script");
        Ok(())
    }

    /// Wait for the busy overlay to go away
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"Spinner element did not disappear"`
    pub async fn wait_for_spinner(&self, timeout: Option<Duration>) -> SettleResult<WaitResult> {
        self.wait_disappear(&Selector::css(SPINNER_SELECTOR), SPINNER_LABEL, timeout)
            .await
    }

    /// Capture the screen and write it to `path` (default `shot.png`)
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"screenshot"` under the capture deadline, or the
    /// capture/write error
    pub async fn take_screenshot(
        &self,
        path: Option<&Path>,
        timeout: Option<Duration>,
    ) -> SettleResult<PathBuf> {
        let path = path.map_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_PATH), Path::to_path_buf);
        let request = self.request("screenshot".to_string(), timeout);
        let driver = self.driver();
        let size = self
            .poller
            .within(&request, OperationKind::Capture, async {
                let shot = driver.screenshot().await?;
                tokio::fs::write(&path, &shot.data).await?;
                Ok::<_, SettleError>(shot.size_bytes())
            })
            .await?;
        info!(path = %path.display(), bytes = size, "screenshot saved");
        Ok(path)
    }

    /// Wait until the screen matches `reference`
    ///
    /// # Errors
    ///
    /// `Timeout` labeled `"screen image did not converge"` under the
    /// convergence deadline, or `DiffTool` under `FailAfter`
    pub async fn wait_for_screen_image(
        &self,
        reference: &Path,
        timeout: Option<Duration>,
    ) -> SettleResult<ConvergenceReport> {
        let request = self.request("screen image did not converge".to_string(), timeout);
        self.convergence
            .run(&self.poller, self.driver(), reference, &request)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::convergence::ScriptedComparator;
    use crate::driver::{MockDriver, MockElement, Screenshot};
    use crate::wait::cancel_pair;
    use tokio::time::Instant;

    fn session() -> (MockDriver, Session<MockDriver>) {
        let driver = MockDriver::new();
        let session = Session::new(Arc::new(driver.clone()), SettleConfig::default());
        (driver, session)
    }

    fn short() -> Option<Duration> {
        Some(Duration::from_millis(500))
    }

    fn label_of(err: SettleError) -> String {
        match err {
            SettleError::Timeout { label, .. } => label,
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    mod appear_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_wait_resolves_when_element_becomes_interactive() {
            let (driver, session) = session();
            let sel = Selector::id("save");
            driver.set_element(sel.clone(), MockElement::disabled());
            let flip = driver.clone();
            let target = sel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flip.set_element(target, MockElement::interactive());
            });
            let start = Instant::now();
            session.wait(&sel, "Save button", None).await.unwrap();
            assert!(start.elapsed() >= Duration::from_millis(300));
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_timeout_label() {
            let (_driver, session) = session();
            let err = session
                .wait(&Selector::id("save"), "Save button", short())
                .await
                .unwrap_err();
            assert_eq!(label_of(err), "Save button did not appear");
        }
    }

    mod disappear_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_disappear_fails_open_on_query_error() {
            let (driver, session) = session();
            let sel = Selector::css(".modal");
            driver.set_element(sel.clone(), MockElement::interactive());
            driver.make_unqueryable(sel.clone());
            session.wait_disappear(&sel, "Modal", short()).await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_removed_does_not_fail_open() {
            let (driver, session) = session();
            let sel = Selector::css(".modal");
            driver.set_element(sel.clone(), MockElement::interactive());
            driver.make_unqueryable(sel.clone());
            let err = session.wait_removed(&sel, "Modal", short()).await.unwrap_err();
            assert_eq!(label_of(err), "Modal did not disappear");
        }

        #[tokio::test(start_paused = true)]
        async fn test_hidden_disappears_but_is_not_removed() {
            let (driver, session) = session();
            let sel = Selector::css(".modal");
            driver.set_element(sel.clone(), MockElement::hidden());
            session.wait_disappear(&sel, "Modal", short()).await.unwrap();
            assert!(session.wait_removed(&sel, "Modal", short()).await.is_err());
            driver.remove_element(&sel);
            session.wait_removed(&sel, "Modal", short()).await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_spinner_label_propagates() {
            let (driver, session) = session();
            driver.set_element(Selector::css(SPINNER_SELECTOR), MockElement::interactive());
            let err = session.wait_for_spinner(short()).await.unwrap_err();
            let message = err.to_string();
            assert!(message.contains("Spinner element"));
            assert_eq!(label_of(err), "Spinner element did not disappear");
        }

        #[tokio::test(start_paused = true)]
        async fn test_spinner_gone() {
            let (_driver, session) = session();
            let result = session.wait_for_spinner(None).await.unwrap();
            assert_eq!(result.attempts, 1);
        }
    }

    mod text_url_alert_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_text() {
            let (driver, session) = session();
            let sel = Selector::id("status");
            driver.set_element(sel.clone(), MockElement::interactive().with_text("Saving"));
            let err = session
                .wait_for_text(&sel, "Saved", "Status", short())
                .await
                .unwrap_err();
            assert_eq!(label_of(err), "Status text did not change");

            driver.set_element(sel.clone(), MockElement::interactive().with_text("Saved"));
            session.wait_for_text(&sel, "Saved", "Status", short()).await.unwrap();
            session
                .wait_for_text_matching(&sel, "Save", TextMatch::Contains, "Status", short())
                .await
                .unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_url() {
            let (driver, session) = session();
            driver.set_url("https://apps.example.com/editor");
            session.wait_for_url("editor", short()).await.unwrap();
            let err = session.wait_for_url("/settings", short()).await.unwrap_err();
            assert_eq!(label_of(err), "URL did not contain /settings");
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_url_pattern() {
            let (driver, session) = session();
            driver.set_url("https://apps.example.com/editor/42");
            let pattern = UrlPattern::Regex(r"/editor/\d+$".to_string());
            session.wait_for_url_pattern(&pattern, short()).await.unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_alert_returns_handle() {
            let (driver, session) = session();
            let opener = driver.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(120)).await;
                opener.set_alert(Some(AlertHandle::alert("Discard changes?")));
            });
            let alert = session.wait_for_alert("Discard", None).await.unwrap();
            assert_eq!(alert.message, "Discard changes?");
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_alert_label() {
            let (_driver, session) = session();
            let err = session.wait_for_alert("Discard", short()).await.unwrap_err();
            assert_eq!(label_of(err), "Discard alert did not appear");
        }
    }

    mod click_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_clicks_once_after_enabled() {
            let (driver, session) = session();
            let sel = Selector::id("publish");
            driver.set_element(sel.clone(), MockElement::disabled());
            let flip = driver.clone();
            let target = sel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flip.set_element(target, MockElement::interactive());
            });
            session.click_when_clickable(&sel, "Publish", None).await.unwrap();
            assert_eq!(driver.history(), vec!["click:#publish".to_string()]);
        }

        #[tokio::test(start_paused = true)]
        async fn test_click_error_propagates_unmodified() {
            let (driver, session) = session();
            let sel = Selector::id("publish");
            driver.set_element(sel.clone(), MockElement::interactive());
            driver.fail_actions_on(sel.clone());
            let err = session
                .click_when_clickable(&sel, "Publish", short())
                .await
                .unwrap_err();
            assert!(matches!(err, SettleError::Action { .. }));
            assert!(driver.history().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_not_clickable_label() {
            let (_driver, session) = session();
            let err = session
                .click_when_clickable(&Selector::id("publish"), "Publish", short())
                .await
                .unwrap_err();
            assert_eq!(label_of(err), "Publish not clickable");
        }
    }

    mod script_click_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_clicks_covered_element_once_attached() {
            let (driver, session) = session();
            let sel = Selector::id("embedded-submit");
            let attach = driver.clone();
            let target = sel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                attach.set_element(target, MockElement::hidden());
            });
            session
                .click_via_script(&sel, "Embedded submit", None)
                .await
                .unwrap();
            assert_eq!(
                driver.history(),
                vec!["script_click:#embedded-submit".to_string()]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn test_not_found_label() {
            let (driver, session) = session();
            let err = session
                .click_via_script(&Selector::id("embedded-submit"), "Embedded submit", short())
                .await
                .unwrap_err();
            assert_eq!(label_of(err), "Embedded submit not found");
            assert!(driver.history().is_empty());
        }
    }

    mod capture_tests {
        use super::*;

        #[tokio::test]
        async fn test_take_screenshot_writes_file() {
            let (driver, session) = session();
            driver.push_screenshot(Screenshot::new(vec![0x89, b'P', b'N', b'G']));
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("capture.png");
            let written = session.take_screenshot(Some(&path), None).await.unwrap();
            assert_eq!(written, path);
            assert_eq!(std::fs::read(&path).unwrap(), vec![0x89, b'P', b'N', b'G']);
        }

        #[tokio::test]
        async fn test_take_screenshot_capture_error() {
            let (_driver, session) = session();
            let dir = tempfile::tempdir().unwrap();
            let err = session
                .take_screenshot(Some(&dir.path().join("x.png")), None)
                .await
                .unwrap_err();
            assert!(matches!(err, SettleError::Capture { .. }));
        }

        #[tokio::test(start_paused = true)]
        async fn test_wait_for_screen_image() {
            let (driver, session) = session();
            driver.push_screenshot(Screenshot::new(vec![1, 2, 3]));
            let session = session.with_comparator(Arc::new(ScriptedComparator::new([
                500.0, 300.0, 150.0,
            ])));
            let report = session
                .wait_for_screen_image(Path::new("reference.png"), None)
                .await
                .unwrap();
            assert_eq!(report.attempts, 3);
        }

        #[tokio::test(start_paused = true)]
        async fn test_screen_image_timeout_label() {
            let (driver, session) = session();
            driver.push_screenshot(Screenshot::new(vec![1, 2, 3]));
            let session = session.with_comparator(Arc::new(ScriptedComparator::new([900.0])));
            let err = session
                .wait_for_screen_image(Path::new("reference.png"), Some(Duration::from_secs(3)))
                .await
                .unwrap_err();
            assert_eq!(label_of(err), "screen image did not converge");
        }
    }

    mod cancel_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_session_cancel_aborts_wait() {
            let (handle, signal) = cancel_pair();
            let (_driver, session) = session();
            let session = session.with_cancel(signal);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                handle.cancel();
            });
            let err = session
                .wait(&Selector::id("never"), "Ghost", None)
                .await
                .unwrap_err();
            assert!(matches!(err, SettleError::Cancelled { ref label } if label == "Ghost did not appear"));
        }
    }
}
