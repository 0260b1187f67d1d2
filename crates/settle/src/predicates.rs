//! Standard predicates built on the poller
//!
//! | Predicate | True when | Query errors |
//! |---|---|---|
//! | [`Appears`] | present, then visible, then enabled | not yet true |
//! | [`Disappears`] | absent, or present but hidden | satisfied (fail-open) |
//! | [`Removed`] | existence check says absent | not yet true |
//! | [`HasText`] | rendered text matches | not yet true |
//! | [`UrlMatches`] | current location matches | not yet true |
//! | [`AlertPresent`] | a dialog is open (yields its handle) | not yet true |

use crate::dialog::AlertHandle;
use crate::driver::Observe;
use crate::result::SettleResult;
use crate::selector::Selector;
use crate::wait::{Predicate, Probe, QueryErrorPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Target exists, is visible and is enabled
///
/// The three checks run in order; an absent target short-circuits to
/// `false` without querying visibility.
#[derive(Debug)]
pub struct Appears<'a, O: ?Sized> {
    observer: &'a O,
    target: &'a Selector,
}

impl<'a, O: Observe + ?Sized> Appears<'a, O> {
    /// Create the predicate
    pub const fn new(observer: &'a O, target: &'a Selector) -> Self {
        Self { observer, target }
    }
}

#[async_trait]
impl<O: Observe + ?Sized> Predicate for Appears<'_, O> {
    async fn check(&self) -> SettleResult<bool> {
        if !self.observer.is_present(self.target).await? {
            return Ok(false);
        }
        if !self.observer.is_displayed(self.target).await? {
            return Ok(false);
        }
        self.observer.is_enabled(self.target).await
    }

    fn describe(&self) -> String {
        format!("{} to appear", self.target)
    }
}

/// Target is absent, or present but hidden
///
/// A query error counts as "already gone": after a visible-to-removed
/// transition the element reference is expected to go stale.
#[derive(Debug)]
pub struct Disappears<'a, O: ?Sized> {
    observer: &'a O,
    target: &'a Selector,
}

impl<'a, O: Observe + ?Sized> Disappears<'a, O> {
    /// Create the predicate
    pub const fn new(observer: &'a O, target: &'a Selector) -> Self {
        Self { observer, target }
    }
}

#[async_trait]
impl<O: Observe + ?Sized> Predicate for Disappears<'_, O> {
    async fn check(&self) -> SettleResult<bool> {
        if !self.observer.is_present(self.target).await? {
            return Ok(true);
        }
        Ok(!self.observer.is_displayed(self.target).await?)
    }

    fn on_query_error(&self) -> QueryErrorPolicy {
        QueryErrorPolicy::TreatAsSatisfied
    }

    fn describe(&self) -> String {
        format!("{} to disappear", self.target)
    }
}

/// Existence check returns `false`; hidden is not enough
#[derive(Debug)]
pub struct Removed<'a, O: ?Sized> {
    observer: &'a O,
    target: &'a Selector,
}

impl<'a, O: Observe + ?Sized> Removed<'a, O> {
    /// Create the predicate
    pub const fn new(observer: &'a O, target: &'a Selector) -> Self {
        Self { observer, target }
    }
}

#[async_trait]
impl<O: Observe + ?Sized> Predicate for Removed<'_, O> {
    async fn check(&self) -> SettleResult<bool> {
        Ok(!self.observer.is_present(self.target).await?)
    }

    fn describe(&self) -> String {
        format!("{} to be removed", self.target)
    }
}

/// How rendered text is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextMatch {
    /// Whole text equals the expected string
    #[default]
    Exact,
    /// Text contains the expected string
    Contains,
}

impl TextMatch {
    /// Compare `actual` against `expected`
    #[must_use]
    pub fn matches(self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Exact => actual == expected,
            Self::Contains => actual.contains(expected),
        }
    }
}

/// Rendered text of the target matches an expected string
#[derive(Debug)]
pub struct HasText<'a, O: ?Sized> {
    observer: &'a O,
    target: &'a Selector,
    expected: &'a str,
    mode: TextMatch,
}

impl<'a, O: Observe + ?Sized> HasText<'a, O> {
    /// Create the predicate
    pub const fn new(observer: &'a O, target: &'a Selector, expected: &'a str) -> Self {
        Self {
            observer,
            target,
            expected,
            mode: TextMatch::Exact,
        }
    }

    /// Set the comparison mode
    #[must_use]
    pub const fn with_mode(mut self, mode: TextMatch) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl<O: Observe + ?Sized> Predicate for HasText<'_, O> {
    async fn check(&self) -> SettleResult<bool> {
        let text = self.observer.text(self.target).await?;
        Ok(self.mode.matches(&text, self.expected))
    }

    fn describe(&self) -> String {
        format!("{} text to be {:?}", self.target, self.expected)
    }
}

/// URL pattern for matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlPattern {
    /// Contains substring
    Contains(String),
    /// Exact URL match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Regex match
    Regex(String),
}

impl UrlPattern {
    /// Check if a URL matches this pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Contains(pattern) => url.contains(pattern),
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern),
            Self::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(url))
                .unwrap_or(false),
        }
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains(p) | Self::Exact(p) | Self::Prefix(p) | Self::Regex(p) => {
                write!(f, "{p}")
            }
        }
    }
}

/// Current location matches a pattern
#[derive(Debug)]
pub struct UrlMatches<'a, O: ?Sized> {
    observer: &'a O,
    pattern: &'a UrlPattern,
}

impl<'a, O: Observe + ?Sized> UrlMatches<'a, O> {
    /// Create the predicate
    pub const fn new(observer: &'a O, pattern: &'a UrlPattern) -> Self {
        Self { observer, pattern }
    }
}

#[async_trait]
impl<O: Observe + ?Sized> Predicate for UrlMatches<'_, O> {
    async fn check(&self) -> SettleResult<bool> {
        let url = self.observer.current_url().await?;
        Ok(self.pattern.matches(&url))
    }

    fn describe(&self) -> String {
        format!("URL matching {:?}", self.pattern)
    }
}

/// A dialog is open; success carries its handle
#[derive(Debug)]
pub struct AlertPresent<'a, O: ?Sized> {
    observer: &'a O,
}

impl<'a, O: Observe + ?Sized> AlertPresent<'a, O> {
    /// Create the probe
    pub const fn new(observer: &'a O) -> Self {
        Self { observer }
    }
}

#[async_trait]
impl<O: Observe + ?Sized> Probe<AlertHandle> for AlertPresent<'_, O> {
    async fn probe(&self) -> SettleResult<Option<AlertHandle>> {
        self.observer.alert().await
    }

    fn describe(&self) -> String {
        "alert to be present".to_string()
    }
}
