//! Convergence retry loop
//!
//! Captures the screen, compares it against a reference image, and repeats
//! on a fixed cadence until the dissimilarity score drops below the
//! threshold. The deadline is the same outer wrapper the poller uses, so a
//! comparison still running at the deadline is dropped (and the external
//! diff process killed).
//!
//! ```text
//! capture ──► temp PNG ──► Comparator ──► score < threshold? ──► done
//!    ▲                                          │ no
//!    └───────────── sleep(delay) ◄──────────────┘
//! ```

use crate::config::{DiffFailurePolicy, OperationKind, SettleConfig};
use crate::driver::{Capture, Screenshot};
use crate::result::{SettleError, SettleResult};
use crate::wait::{Poller, WaitRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Scale applied to normalized MSE, matching ImageMagick's 16-bit quantum
pub const QUANTUM_RANGE: f64 = 65_535.0;

/// Produces a dissimilarity score for two image files
///
/// Lower is more similar; `0.0` means identical.
#[async_trait]
pub trait Comparator: Send + Sync {
    /// Compare `actual` against `reference`
    async fn compare(&self, actual: &Path, reference: &Path) -> SettleResult<f64>;

    /// Short name for logs
    fn name(&self) -> &str;
}

// =============================================================================
// IMAGEMAGICK
// =============================================================================

/// Runs ImageMagick `compare -metric MSE <actual> <reference> <diff>`
#[derive(Debug, Clone)]
pub struct MagickComparator {
    program: PathBuf,
    metric: String,
}

impl Default for MagickComparator {
    fn default() -> Self {
        Self {
            program: PathBuf::from("compare"),
            metric: "MSE".to_string(),
        }
    }
}

impl MagickComparator {
    /// Use `compare` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific binary
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Comparator for MagickComparator {
    async fn compare(&self, actual: &Path, reference: &Path) -> SettleResult<f64> {
        let diff = tempfile::Builder::new()
            .prefix("settle-diff-")
            .suffix(".png")
            .tempfile()?;

        let output = tokio::process::Command::new(&self.program)
            .arg("-metric")
            .arg(&self.metric)
            .arg(actual)
            .arg(reference)
            .arg(diff.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SettleError::diff_tool(format!("failed to run {}: {e}", self.program.display()))
            })?;

        // compare writes the metric to stderr; read both like `2>&1`
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        // exit 0: similar, 1: dissimilar, 2: error
        if output.status.code() == Some(2) {
            return Err(SettleError::diff_tool(text.trim().to_string()));
        }
        parse_score(&text).ok_or_else(|| {
            SettleError::diff_tool(format!(
                "no score in compare output ({}): {}",
                output.status,
                text.trim()
            ))
        })
    }

    fn name(&self) -> &str {
        "imagemagick"
    }
}

/// Read the leading integer of the tool output
///
/// `"1234.5 (0.0188)"` scores `1234`; output that does not start with a
/// number has no score.
#[must_use]
pub fn parse_score(output: &str) -> Option<f64> {
    let trimmed = output.trim_start();
    let (sign, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<f64>().ok().map(|n| sign * n)
}

// =============================================================================
// IN-PROCESS
// =============================================================================

/// Mean squared error over RGB channels, scaled like ImageMagick's MSE
#[cfg(feature = "media")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelComparator;

#[cfg(feature = "media")]
impl PixelComparator {
    /// Create a new comparator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Score two decoded images
    ///
    /// # Errors
    ///
    /// Returns `DiffTool` if the dimensions differ
    pub fn score(
        actual: &image::DynamicImage,
        reference: &image::DynamicImage,
    ) -> SettleResult<f64> {
        use image::GenericImageView;

        let (width, height) = actual.dimensions();
        let (ref_width, ref_height) = reference.dimensions();
        if width != ref_width || height != ref_height {
            return Err(SettleError::diff_tool(format!(
                "image dimensions differ: actual {width}x{height}, reference {ref_width}x{ref_height}"
            )));
        }

        let actual = actual.to_rgb8();
        let reference = reference.to_rgb8();
        let mut sum = 0.0_f64;
        let mut samples = 0_u64;
        for (a, r) in actual.pixels().zip(reference.pixels()) {
            for channel in 0..3 {
                let delta = (f64::from(a[channel]) - f64::from(r[channel])) / 255.0;
                sum += delta * delta;
                samples += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let mse = if samples > 0 { sum / samples as f64 } else { 0.0 };
        Ok(mse * QUANTUM_RANGE)
    }
}

#[cfg(feature = "media")]
#[async_trait]
impl Comparator for PixelComparator {
    async fn compare(&self, actual: &Path, reference: &Path) -> SettleResult<f64> {
        let actual = actual.to_path_buf();
        let reference = reference.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let load = |path: &Path| {
                image::open(path).map_err(|e| {
                    SettleError::diff_tool(format!("failed to decode {}: {e}", path.display()))
                })
            };
            Self::score(&load(&actual)?, &load(&reference)?)
        })
        .await
        .map_err(|e| SettleError::diff_tool(format!("comparison task failed: {e}")))?
    }

    fn name(&self) -> &str {
        "pixel"
    }
}

// =============================================================================
// SCRIPTED
// =============================================================================

/// Comparator that replays a fixed sequence of scores and failures
///
/// The last entry repeats once the script runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedComparator {
    script: Arc<Mutex<Script>>,
}

#[derive(Debug, Default)]
struct Script {
    pending: VecDeque<Result<f64, String>>,
    last: Option<Result<f64, String>>,
    calls: usize,
}

impl ScriptedComparator {
    /// Replay `scores` in order
    #[must_use]
    pub fn new(scores: impl IntoIterator<Item = f64>) -> Self {
        let comparator = Self::default();
        for score in scores {
            comparator.push_score(score);
        }
        comparator
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a score
    pub fn push_score(&self, score: f64) {
        self.script().pending.push_back(Ok(score));
    }

    /// Queue a comparator failure
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script().pending.push_back(Err(message.into()));
    }

    /// Number of comparisons performed
    #[must_use]
    pub fn calls(&self) -> usize {
        self.script().calls
    }
}

#[async_trait]
impl Comparator for ScriptedComparator {
    async fn compare(&self, _actual: &Path, _reference: &Path) -> SettleResult<f64> {
        let mut script = self.script();
        script.calls += 1;
        if let Some(next) = script.pending.pop_front() {
            script.last = Some(next);
        }
        match &script.last {
            Some(Ok(score)) => Ok(*score),
            Some(Err(message)) => Err(SettleError::diff_tool(message.clone())),
            None => Err(SettleError::diff_tool("no scripted score")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// =============================================================================
// LOOP
// =============================================================================

/// Outcome of a converged loop
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceReport {
    /// Capture-and-compare cycles run
    pub attempts: u32,
    /// Score of the converging cycle
    pub final_score: f64,
    /// Time until convergence
    pub elapsed: Duration,
}

/// Capture/compare/decide cycle driven under a deadline
#[derive(Clone)]
pub struct ConvergenceLoop {
    comparator: Arc<dyn Comparator>,
    threshold: f64,
    delay: Duration,
    policy: DiffFailurePolicy,
}

impl std::fmt::Debug for ConvergenceLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergenceLoop")
            .field("comparator", &self.comparator.name())
            .field("threshold", &self.threshold)
            .field("delay", &self.delay)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ConvergenceLoop {
    /// Build from configuration
    #[must_use]
    pub fn new(config: &SettleConfig, comparator: Arc<dyn Comparator>) -> Self {
        Self {
            comparator,
            threshold: config.convergence_threshold,
            delay: config.convergence_delay(),
            policy: config.diff_failure_policy,
        }
    }

    /// Score threshold (exclusive)
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Run until the captured screen matches `reference`
    ///
    /// # Errors
    ///
    /// `Timeout` when the request deadline (convergence default) elapses,
    /// `DiffTool` under `FailAfter`, or a fatal capture error.
    pub async fn run<C>(
        &self,
        poller: &Poller,
        capture: &C,
        reference: &Path,
        request: &WaitRequest,
    ) -> SettleResult<ConvergenceReport>
    where
        C: Capture + ?Sized,
    {
        let started = Instant::now();
        let label = request.label.as_str();
        let cycles = async {
            let mut attempts: u32 = 0;
            let mut consecutive_failures: u32 = 0;
            loop {
                attempts += 1;
                match self.cycle(capture, reference).await {
                    Ok(Some(score)) if score < self.threshold => return Ok((attempts, score)),
                    Ok(Some(score)) => {
                        consecutive_failures = 0;
                        debug!(%label, attempts, score, threshold = self.threshold, "not converged");
                    }
                    Ok(None) => {}
                    Err(err) if matches!(err, SettleError::DiffTool { .. }) => {
                        consecutive_failures += 1;
                        if let DiffFailurePolicy::FailAfter(limit) = self.policy {
                            if consecutive_failures >= limit.max(1) {
                                return Err(SettleError::diff_tool(format!(
                                    "{} failed {consecutive_failures} times in a row: {err}",
                                    self.comparator.name()
                                )));
                            }
                        }
                        warn!(%label, attempts, error = %err, "comparison failed, retrying");
                    }
                    Err(err) => return Err(err),
                }
                tokio::time::sleep(self.delay).await;
            }
        };

        let (attempts, final_score) = poller
            .within(request, OperationKind::Convergence, cycles)
            .await?;
        let elapsed = started.elapsed();
        debug!(%label, attempts, final_score, elapsed_ms = elapsed.as_millis() as u64, "converged");
        Ok(ConvergenceReport {
            attempts,
            final_score,
            elapsed,
        })
    }

    /// One cycle. `Ok(None)` when the capture failed transiently.
    async fn cycle<C>(&self, capture: &C, reference: &Path) -> SettleResult<Option<f64>>
    where
        C: Capture + ?Sized,
    {
        let shot = match capture.screenshot().await {
            Ok(shot) => shot,
            Err(err) if err.is_transient() => {
                debug!(error = %err, "capture not ready");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let file = persist(&shot).await?;
        let score = self
            .comparator
            .compare(file.path(), reference)
            .await
            .map_err(|e| match e {
                SettleError::DiffTool { .. } => e,
                other => SettleError::diff_tool(other.to_string()),
            })?;
        Ok(Some(score))
    }
}

/// Write a capture to a fresh temp file, removed on drop
async fn persist(shot: &Screenshot) -> SettleResult<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("settle-shot-")
        .suffix(".png")
        .tempfile()?;
    tokio::fs::write(file.path(), &shot.data).await?;
    Ok(file)
}
