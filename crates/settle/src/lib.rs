//! Settle: condition polling and convergence retry for asynchronous UIs
//!
//! UI state changes (an element appears, becomes interactive, its text
//! updates, the page navigates, the screen converges to a reference image)
//! happen on unpredictable schedules. Settle turns each "wait for X" into one
//! predicate evaluated by a single poller under a labeled deadline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     SETTLE Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │  Session   │    │  Poller    │    │  Driver    │            │
//! │   │  (labels)  │───►│ (deadline, │───►│ Observe /  │            │
//! │   │            │    │  cadence)  │    │ Act/Capture│            │
//! │   └─────┬──────┘    └─────▲──────┘    └────────────┘            │
//! │         │          ┌──────┴───────┐   ┌────────────┐            │
//! │         └─────────►│ Convergence  │──►│ Comparator │            │
//! │                    │    Loop      │   │ (MSE diff) │            │
//! │                    └──────────────┘   └────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use settle::{MockDriver, MockElement, Selector, Session, SettleConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> settle::SettleResult<()> {
//! let driver = MockDriver::new();
//! driver.set_element(Selector::id("save"), MockElement::interactive());
//! let session = Session::new(Arc::new(driver), SettleConfig::default());
//! session.wait_for_spinner(None).await?;
//! session.click_when_clickable(&Selector::id("save"), "Save button", None).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
mod browser;
mod config;
#[allow(clippy::doc_markdown)]
mod convergence;
mod dialog;
mod driver;
mod predicates;
mod result;
mod selector;
mod session;
/// Multi-step account sign-in built on session waits
pub mod signin;
mod wait;

#[cfg(feature = "browser")]
pub use browser::{Browser, BrowserConfig, CdpDriver};
pub use config::{
    DiffFailurePolicy, OperationKind, SettleConfig, DEFAULT_CAPTURE_TIMEOUT_MS,
    DEFAULT_CONVERGENCE_DELAY_MS, DEFAULT_CONVERGENCE_THRESHOLD, DEFAULT_CONVERGENCE_TIMEOUT_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS,
};
#[cfg(feature = "media")]
pub use convergence::PixelComparator;
pub use convergence::{
    parse_score, Comparator, ConvergenceLoop, ConvergenceReport, MagickComparator,
    ScriptedComparator, QUANTUM_RANGE,
};
pub use dialog::{AlertHandle, DialogKind};
pub use driver::{Act, Capture, Driver, MockDriver, MockElement, Observe, Screenshot};
pub use predicates::{
    AlertPresent, Appears, Disappears, HasText, Removed, TextMatch, UrlMatches, UrlPattern,
};
pub use result::{SettleError, SettleResult};
pub use selector::Selector;
pub use session::{Session, DEFAULT_SCREENSHOT_PATH, SPINNER_LABEL, SPINNER_SELECTOR};
pub use signin::{sign_in, SignInCredentials, SignInOptions, SignInOutcome};
pub use wait::{
    cancel_pair, CancelHandle, CancelSignal, FnPredicate, Poller, Predicate, Probe,
    QueryErrorPolicy, WaitRequest, WaitResult,
};

/// Prelude for convenient imports
pub mod prelude {
    #[cfg(feature = "browser")]
    pub use super::browser::*;
    pub use super::config::*;
    pub use super::convergence::*;
    pub use super::dialog::*;
    pub use super::driver::*;
    pub use super::predicates::*;
    pub use super::result::*;
    pub use super::selector::*;
    pub use super::session::*;
    pub use super::signin::*;
    pub use super::wait::*;
}
