//! Condition Poller
//!
//! One mechanism for every "wait for X": evaluate a predicate repeatedly
//! until it yields true or the deadline elapses.
//!
//! - The deadline is wall-clock from the moment the wait starts, not from
//!   the first evaluation.
//! - Evaluations are strictly sequential; a new one never starts before the
//!   previous one settled.
//! - The deadline races the whole polling loop, so an in-flight evaluation
//!   is dropped at the deadline and the wait can never resolve late.

use crate::config::{OperationKind, SettleConfig};
use crate::result::{SettleError, SettleResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

// =============================================================================
// QUERY ERROR POLICY
// =============================================================================

/// How a predicate's transient query failure is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryErrorPolicy {
    /// The condition is not yet true; keep polling
    #[default]
    TreatAsUnsatisfied,
    /// The condition already holds (fail-open)
    TreatAsSatisfied,
}

// =============================================================================
// PREDICATES
// =============================================================================

/// A re-invocable check of external state
#[async_trait]
pub trait Predicate: Send + Sync {
    /// Evaluate once
    async fn check(&self) -> SettleResult<bool>;

    /// Reading of transient query errors
    fn on_query_error(&self) -> QueryErrorPolicy {
        QueryErrorPolicy::TreatAsUnsatisfied
    }

    /// Description for logs
    fn describe(&self) -> String;
}

/// A check whose success carries a value (e.g. the alert that appeared)
#[async_trait]
pub trait Probe<T>: Send + Sync {
    /// Evaluate once; `Some` settles the wait
    async fn probe(&self) -> SettleResult<Option<T>>;

    /// Description for logs
    fn describe(&self) -> String;
}

/// A closure-based predicate
pub struct FnPredicate<F> {
    func: F,
    description: String,
    policy: QueryErrorPolicy,
}

impl<F> std::fmt::Debug for FnPredicate<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPredicate")
            .field("description", &self.description)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<F, Fut> FnPredicate<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SettleResult<bool>> + Send,
{
    /// Create a new function predicate
    pub fn new(func: F, description: impl Into<String>) -> Self {
        Self {
            func,
            description: description.into(),
            policy: QueryErrorPolicy::TreatAsUnsatisfied,
        }
    }

    /// Override the query-error policy
    #[must_use]
    pub fn with_policy(mut self, policy: QueryErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl<F, Fut> Predicate for FnPredicate<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SettleResult<bool>> + Send,
{
    async fn check(&self) -> SettleResult<bool> {
        (self.func)().await
    }

    fn on_query_error(&self) -> QueryErrorPolicy {
        self.policy
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Sender half: cancels every wait holding a matching [`CancelSignal`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiver half threaded into a [`WaitRequest`]
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a linked cancel handle and signal
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    /// Cancel all linked waits
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; never resolves if the handle was dropped
    async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// WAIT REQUEST / RESULT
// =============================================================================

/// Label and optional deadline override for one wait
#[derive(Debug, Clone)]
pub struct WaitRequest {
    /// Embedded verbatim in the timeout error
    pub label: String,
    /// Overrides the operation default when set
    pub timeout: Option<Duration>,
    /// Optional early abort
    pub cancel: Option<CancelSignal>,
}

impl WaitRequest {
    /// Create a request using the operation default deadline
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            timeout: None,
            cancel: None,
        }
    }

    /// Override the deadline
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the deadline when `timeout` is set
    #[must_use]
    pub const fn with_timeout_opt(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            self.timeout = timeout;
        }
        self
    }

    /// Attach a cancel signal
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Result of a successful wait
#[derive(Debug, Clone)]
pub struct WaitResult {
    /// Time spent waiting
    pub elapsed: Duration,
    /// Predicate evaluations performed
    pub attempts: u32,
    /// Description of what was waited for
    pub waited_for: String,
}

// =============================================================================
// POLLER
// =============================================================================

/// Owns timing, cadence and failure labeling for all waits
#[derive(Debug, Clone, Default)]
pub struct Poller {
    config: SettleConfig,
}

impl Poller {
    /// Create a poller with explicit configuration
    #[must_use]
    pub const fn new(config: SettleConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &SettleConfig {
        &self.config
    }

    /// Deadline for a request: caller override, else the kind's default
    #[must_use]
    pub fn deadline(&self, request: &WaitRequest, kind: OperationKind) -> Duration {
        request
            .timeout
            .unwrap_or_else(|| self.config.default_timeout(kind))
    }

    /// Race `work` against the request deadline (and cancel signal)
    ///
    /// The deadline clock starts when this is called. On expiry `work` is
    /// dropped and a `Timeout` carrying the label is returned.
    pub async fn within<T, Fut>(
        &self,
        request: &WaitRequest,
        kind: OperationKind,
        work: Fut,
    ) -> SettleResult<T>
    where
        Fut: Future<Output = SettleResult<T>>,
    {
        let timeout = self.deadline(request, kind);
        let bounded = tokio::time::timeout(timeout, work);
        let outcome = match request.cancel {
            Some(ref cancel) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(label = %request.label, "wait cancelled");
                        return Err(SettleError::Cancelled {
                            label: request.label.clone(),
                        });
                    }
                    outcome = bounded => outcome,
                }
            }
            None => bounded.await,
        };
        outcome.unwrap_or_else(|_elapsed| {
            warn!(
                label = %request.label,
                timeout_ms = timeout.as_millis() as u64,
                kind = %kind,
                "wait timed out"
            );
            Err(SettleError::timeout(request.label.as_str(), timeout))
        })
    }

    /// Core loop: call `attempt` until it yields `Some`, sleeping the poll
    /// interval in between. Transient errors are absorbed; others propagate.
    async fn settle<T, F, Fut>(
        &self,
        request: &WaitRequest,
        attempt: F,
    ) -> SettleResult<(T, u32, Duration)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SettleResult<Option<T>>>,
    {
        let started = Instant::now();
        let interval = self.config.poll_interval();
        let label = request.label.as_str();
        let mut attempt = attempt;

        let polling = async move {
            let mut attempts: u32 = 0;
            loop {
                attempts += 1;
                match attempt().await {
                    Ok(Some(value)) => return Ok((value, attempts)),
                    Ok(None) => {}
                    Err(err) if err.is_transient() => {
                        debug!(%label, attempts, error = %err, "transient query error, polling on");
                    }
                    Err(err) => return Err(err),
                }
                tokio::time::sleep(interval).await;
            }
        };

        let (value, attempts) = self.within(request, OperationKind::Wait, polling).await?;
        let elapsed = started.elapsed();
        debug!(%label, attempts, elapsed_ms = elapsed.as_millis() as u64, "wait settled");
        Ok((value, attempts, elapsed))
    }

    /// Wait until `predicate` yields true
    pub async fn until<P>(&self, predicate: &P, request: &WaitRequest) -> SettleResult<WaitResult>
    where
        P: Predicate + ?Sized,
    {
        let policy = predicate.on_query_error();
        let ((), attempts, elapsed) = self
            .settle(request, move || async move {
                match predicate.check().await {
                    Ok(true) => Ok(Some(())),
                    Ok(false) => Ok(None),
                    Err(err)
                        if err.is_transient()
                            && policy == QueryErrorPolicy::TreatAsSatisfied =>
                    {
                        warn!(
                            label = %request.label,
                            error = %err,
                            "query failed, treating condition as satisfied"
                        );
                        Ok(Some(()))
                    }
                    Err(err) => Err(err),
                }
            })
            .await?;
        Ok(WaitResult {
            elapsed,
            attempts,
            waited_for: predicate.describe(),
        })
    }

    /// Wait until `probe` yields a value and return it
    pub async fn until_value<T, P>(&self, probe: &P, request: &WaitRequest) -> SettleResult<T>
    where
        P: Probe<T> + ?Sized,
    {
        let (value, attempts, _) = self.settle(request, move || probe.probe()).await?;
        debug!(label = %request.label, attempts, probe = %probe.describe(), "probe yielded");
        Ok(value)
    }

    /// Wait for a closure returning `SettleResult<bool>`
    pub async fn until_fn<F, Fut>(&self, func: F, request: &WaitRequest) -> SettleResult<WaitResult>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = SettleResult<bool>> + Send,
    {
        let predicate = FnPredicate::new(func, request.label.clone());
        self.until(&predicate, request).await
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn poller() -> Poller {
        Poller::new(SettleConfig::default())
    }

    mod request_tests {
        use super::*;

        #[test]
        fn test_default_deadline_per_kind() {
            let p = poller();
            let req = WaitRequest::new("x");
            assert_eq!(p.deadline(&req, OperationKind::Wait), Duration::from_secs(30));
            assert_eq!(
                p.deadline(&req, OperationKind::Convergence),
                Duration::from_secs(9)
            );
            assert_eq!(p.deadline(&req, OperationKind::Capture), Duration::from_secs(2));
        }

        #[test]
        fn test_override_takes_precedence() {
            let req = WaitRequest::new("x").with_timeout(Duration::from_millis(750));
            assert_eq!(
                poller().deadline(&req, OperationKind::Convergence),
                Duration::from_millis(750)
            );
        }

        #[test]
        fn test_none_override_keeps_default() {
            let req = WaitRequest::new("x").with_timeout_opt(None);
            assert!(req.timeout.is_none());
        }
    }

    mod until_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_immediate_success() {
            let result = poller()
                .until_fn(|| async { Ok(true) }, &WaitRequest::new("ready"))
                .await
                .unwrap();
            assert_eq!(result.attempts, 1);
            assert_eq!(result.waited_for, "ready");
        }

        #[tokio::test(start_paused = true)]
        async fn test_resolves_at_or_after_condition_time() {
            let start = Instant::now();
            let becomes_true = Duration::from_millis(1_200);
            let req = WaitRequest::new("late").with_timeout(Duration::from_secs(5));
            let result = poller()
                .until_fn(|| async move { Ok(start.elapsed() >= becomes_true) }, &req)
                .await
                .unwrap();
            let waited = start.elapsed();
            assert!(waited >= becomes_true);
            assert!(waited < becomes_true + Duration::from_millis(100));
            assert!(result.attempts > 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_timeout_not_before_deadline_and_labeled() {
            let start = Instant::now();
            let req = WaitRequest::new("Spinner element").with_timeout(Duration::from_millis(500));
            let err = poller()
                .until_fn(|| async { Ok(false) }, &req)
                .await
                .unwrap_err();
            let waited = start.elapsed();
            assert!(waited >= Duration::from_millis(500));
            assert!(waited < Duration::from_millis(600));
            assert!(err.to_string().contains("Spinner element"));
            match err {
                SettleError::Timeout { label, timeout_ms } => {
                    assert_eq!(label, "Spinner element");
                    assert_eq!(timeout_ms, 500);
                }
                other => panic!("expected Timeout, got {other:?}"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_slow_first_evaluation_never_resolves_late() {
            let start = Instant::now();
            let finished = Arc::new(AtomicU32::new(0));
            let marker = finished.clone();
            let req = WaitRequest::new("slow").with_timeout(Duration::from_millis(500));
            let err = poller()
                .until_fn(
                    move || {
                        let marker = marker.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(800)).await;
                            marker.fetch_add(1, Ordering::SeqCst);
                            Ok(true)
                        }
                    },
                    &req,
                )
                .await
                .unwrap_err();
            assert_eq!(start.elapsed(), Duration::from_millis(500));
            assert!(err.is_timeout());
            assert_eq!(err.to_string(), "slow timed out after 500ms");

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(finished.load(Ordering::SeqCst), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_transient_errors_keep_polling() {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let req = WaitRequest::new("flaky").with_timeout(Duration::from_secs(1));
            let result = poller()
                .until_fn(
                    move || {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n < 3 {
                                Err(SettleError::observation("detached"))
                            } else {
                                Ok(true)
                            }
                        }
                    },
                    &req,
                )
                .await
                .unwrap();
            assert_eq!(result.attempts, 4);
        }

        #[tokio::test(start_paused = true)]
        async fn test_persistent_transient_error_becomes_timeout() {
            let req = WaitRequest::new("never queryable").with_timeout(Duration::from_millis(300));
            let err = poller()
                .until_fn(|| async { Err(SettleError::observation("stale")) }, &req)
                .await
                .unwrap_err();
            assert!(err.is_timeout());
        }

        #[tokio::test(start_paused = true)]
        async fn test_fatal_error_propagates_unmodified() {
            let req = WaitRequest::new("fatal");
            let err = poller()
                .until_fn(|| async { Err(SettleError::action("boom")) }, &req)
                .await
                .unwrap_err();
            assert!(matches!(err, SettleError::Action { ref message } if message == "boom"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_fail_open_policy() {
            let predicate = FnPredicate::new(
                || async { Err(SettleError::observation("gone")) },
                "gone already",
            )
            .with_policy(QueryErrorPolicy::TreatAsSatisfied);
            let result = poller()
                .until(&predicate, &WaitRequest::new("gone"))
                .await
                .unwrap();
            assert_eq!(result.attempts, 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_evaluations_are_sequential() {
            let in_flight = Arc::new(AtomicU32::new(0));
            let flag = in_flight.clone();
            let req = WaitRequest::new("serial").with_timeout(Duration::from_millis(400));
            let _ = poller()
                .until_fn(
                    move || {
                        let flag = flag.clone();
                        async move {
                            assert_eq!(flag.fetch_add(1, Ordering::SeqCst), 0);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            flag.fetch_sub(1, Ordering::SeqCst);
                            Ok(false)
                        }
                    },
                    &req,
                )
                .await;
        }
    }

    mod probe_tests {
        use super::*;

        struct Countdown(AtomicU32);

        #[async_trait]
        impl Probe<&'static str> for Countdown {
            async fn probe(&self) -> SettleResult<Option<&'static str>> {
                if self.0.fetch_sub(1, Ordering::SeqCst) <= 1 {
                    Ok(Some("handle"))
                } else {
                    Ok(None)
                }
            }

            fn describe(&self) -> String {
                "countdown".to_string()
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_probe_returns_value() {
            let probe = Countdown(AtomicU32::new(3));
            let value = poller()
                .until_value(&probe, &WaitRequest::new("countdown"))
                .await
                .unwrap();
            assert_eq!(value, "handle");
        }
    }

    mod cancel_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_cancel_aborts_wait() {
            let (handle, signal) = cancel_pair();
            let req = WaitRequest::new("cancellable").with_cancel(signal);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                handle.cancel();
            });
            let start = Instant::now();
            let err = poller()
                .until_fn(|| async { Ok(false) }, &req)
                .await
                .unwrap_err();
            assert!(matches!(err, SettleError::Cancelled { ref label } if label == "cancellable"));
            assert!(start.elapsed() < Duration::from_secs(1));
        }

        #[tokio::test(start_paused = true)]
        async fn test_dropped_handle_never_cancels() {
            let (handle, signal) = cancel_pair();
            drop(handle);
            let req = WaitRequest::new("orphan")
                .with_timeout(Duration::from_millis(100))
                .with_cancel(signal);
            let err = poller()
                .until_fn(|| async { Ok(false) }, &req)
                .await
                .unwrap_err();
            assert!(err.is_timeout());
        }

        #[test]
        fn test_is_cancelled_flag() {
            let (handle, signal) = cancel_pair();
            assert!(!signal.is_cancelled());
            handle.cancel();
            assert!(signal.is_cancelled());
        }
    }
}
