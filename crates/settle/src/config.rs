//! Timing configuration injected into the poller.
//!
//! Each operation kind carries its own default deadline: plain waits,
//! convergence waits and capture-only operations never share one value.

use crate::result::{SettleError, SettleResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default deadline for wait operations (30 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Default deadline for convergence waits (9 seconds)
pub const DEFAULT_CONVERGENCE_TIMEOUT_MS: u64 = 9_000;

/// Default deadline for capture-only operations (2 seconds)
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 2_000;

/// Default interval between predicate evaluations (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default delay between convergence attempts (1 second)
pub const DEFAULT_CONVERGENCE_DELAY_MS: u64 = 1_000;

/// Scores strictly below this count as converged
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 200.0;

/// What the convergence loop does when the comparator itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffFailurePolicy {
    /// Swallow the failure and try again on the next cycle
    #[default]
    Retry,
    /// Give up with `SettleError::DiffTool` after this many consecutive failures
    FailAfter(u32),
}

/// Operation kinds with independent default deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Predicate waits (appear, disappear, text, url, alert, clickable)
    Wait,
    /// Screenshot-diff convergence
    Convergence,
    /// Capture-only (take a screenshot and persist it)
    Capture,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wait => write!(f, "wait"),
            Self::Convergence => write!(f, "convergence"),
            Self::Capture => write!(f, "capture"),
        }
    }
}

/// Timing configuration for all wait-style operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// Deadline for predicate waits, in milliseconds
    pub wait_timeout_ms: u64,
    /// Deadline for convergence waits, in milliseconds
    pub convergence_timeout_ms: u64,
    /// Deadline for capture-only operations, in milliseconds
    pub capture_timeout_ms: u64,
    /// Interval between predicate evaluations, in milliseconds
    pub poll_interval_ms: u64,
    /// Delay between convergence attempts, in milliseconds
    pub convergence_delay_ms: u64,
    /// Dissimilarity threshold (exclusive)
    pub convergence_threshold: f64,
    /// Comparator failure handling
    pub diff_failure_policy: DiffFailurePolicy,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            convergence_timeout_ms: DEFAULT_CONVERGENCE_TIMEOUT_MS,
            capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            convergence_delay_ms: DEFAULT_CONVERGENCE_DELAY_MS,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            diff_failure_policy: DiffFailurePolicy::Retry,
        }
    }
}

impl SettleConfig {
    /// Create config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the predicate-wait deadline
    #[must_use]
    pub const fn with_wait_timeout(mut self, ms: u64) -> Self {
        self.wait_timeout_ms = ms;
        self
    }

    /// Set the convergence deadline
    #[must_use]
    pub const fn with_convergence_timeout(mut self, ms: u64) -> Self {
        self.convergence_timeout_ms = ms;
        self
    }

    /// Set the capture deadline
    #[must_use]
    pub const fn with_capture_timeout(mut self, ms: u64) -> Self {
        self.capture_timeout_ms = ms;
        self
    }

    /// Set the polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the delay between convergence attempts
    #[must_use]
    pub const fn with_convergence_delay(mut self, ms: u64) -> Self {
        self.convergence_delay_ms = ms;
        self
    }

    /// Set the convergence threshold
    #[must_use]
    pub const fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    /// Set the comparator failure policy
    #[must_use]
    pub const fn with_diff_failure_policy(mut self, policy: DiffFailurePolicy) -> Self {
        self.diff_failure_policy = policy;
        self
    }

    /// Default deadline for an operation kind
    #[must_use]
    pub const fn default_timeout(&self, kind: OperationKind) -> Duration {
        let ms = match kind {
            OperationKind::Wait => self.wait_timeout_ms,
            OperationKind::Convergence => self.convergence_timeout_ms,
            OperationKind::Capture => self.capture_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    /// Poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Convergence delay as Duration
    #[must_use]
    pub const fn convergence_delay(&self) -> Duration {
        Duration::from_millis(self.convergence_delay_ms)
    }

    /// Reject values that would make every wait fail instantly or spin
    pub fn validate(&self) -> SettleResult<()> {
        let checks = [
            ("wait_timeout_ms", self.wait_timeout_ms),
            ("convergence_timeout_ms", self.convergence_timeout_ms),
            ("capture_timeout_ms", self.capture_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("convergence_delay_ms", self.convergence_delay_ms),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, v)| *v == 0) {
            return Err(SettleError::config(format!("{name} must be positive")));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold <= 0.0 {
            return Err(SettleError::config(
                "convergence_threshold must be a positive number",
            ));
        }
        if self.diff_failure_policy == DiffFailurePolicy::FailAfter(0) {
            return Err(SettleError::config("fail_after needs at least one failure"));
        }
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> SettleResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> SettleResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => serde_yaml_ng::from_str(&text)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> SettleResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}
