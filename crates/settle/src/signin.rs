//! Multi-step account sign-in
//!
//! Composes session waits into the hosted sign-in flow: email, password,
//! and an optional "Verify it's you" city challenge. When the email field
//! never shows up, the account chooser is used instead.

use crate::driver::Driver;
use crate::result::{SettleError, SettleResult};
use crate::selector::Selector;
use crate::session::Session;
use std::time::Duration;
use tracing::info;

/// Environment variable holding the account email
pub const ENV_USER: &str = "SETTLE_LOGIN_USER";
/// Environment variable holding the password
pub const ENV_PASS: &str = "SETTLE_LOGIN_PASS";
/// Environment variable holding the city challenge answer
pub const ENV_CITY: &str = "SETTLE_LOGIN_CITY";

const CITY_CHALLENGE_TEXT: &str = "Enter the city you usually sign in from";

/// Account credentials
#[derive(Clone, PartialEq, Eq)]
pub struct SignInCredentials {
    /// Account email
    pub user: String,
    /// Account password
    pub password: String,
    /// Answer for the city challenge
    pub city: Option<String>,
}

impl std::fmt::Debug for SignInCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("city", &self.city.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SignInCredentials {
    /// Create credentials without a challenge answer
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            city: None,
        }
    }

    /// Set the city challenge answer
    #[must_use]
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Read `SETTLE_LOGIN_USER`, `SETTLE_LOGIN_PASS` and `SETTLE_LOGIN_CITY`
    ///
    /// # Errors
    ///
    /// `Config` if user or password is unset
    pub fn from_env() -> SettleResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build credentials from any key/value source
    ///
    /// # Errors
    ///
    /// `Config` if user or password is missing or empty
    pub fn from_lookup<F>(lookup: F) -> SettleResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SettleError::config(format!("{key} is not set")))
        };
        Ok(Self {
            user: required(ENV_USER)?,
            password: required(ENV_PASS)?,
            city: lookup(ENV_CITY).filter(|v| !v.is_empty()),
        })
    }
}

/// Deadlines for the sign-in steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInOptions {
    /// Per-step deadline; `None` uses the wait default
    pub step_timeout: Option<Duration>,
    /// How long the account chooser fallback may take
    pub chooser_timeout: Duration,
    /// How long to look for the challenge page before calling it done
    pub challenge_timeout: Duration,
}

impl Default for SignInOptions {
    fn default() -> Self {
        Self {
            step_timeout: None,
            chooser_timeout: Duration::from_millis(3_000),
            challenge_timeout: Duration::from_millis(5_000),
        }
    }
}

/// How the flow finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInOutcome {
    /// Credentials accepted without a challenge
    SignedIn,
    /// The city challenge was answered
    ChallengeAnswered,
    /// An already-known account was picked from the chooser
    AccountChosen,
}

/// Page elements of the hosted sign-in flow
#[derive(Debug, Clone)]
struct SignInPage {
    initial_view: Selector,
    email: Selector,
    email_next: Selector,
    password: Selector,
    password_next: Selector,
    challenge: Selector,
    city_challenge: Selector,
    answer: Selector,
}

impl Default for SignInPage {
    fn default() -> Self {
        Self {
            initial_view: Selector::id("initialView"),
            email: Selector::id("identifierId"),
            email_next: Selector::id("identifierNext"),
            password: Selector::css("#password input"),
            password_next: Selector::id("passwordNext"),
            challenge: Selector::css_with_text("h1", "Verify it's you"),
            city_challenge: Selector::css_with_text("li div", CITY_CHALLENGE_TEXT),
            answer: Selector::id("answer"),
        }
    }
}

/// Drive the sign-in flow; expects it to be already started (sign-in
/// button clicked)
///
/// # Errors
///
/// A labeled `Timeout` for the step that never became ready, an action
/// error, or `Config` when a challenge appears without a configured answer.
pub async fn sign_in<D>(
    session: &Session<D>,
    credentials: &SignInCredentials,
    options: &SignInOptions,
) -> SettleResult<SignInOutcome>
where
    D: Driver + ?Sized,
{
    let page = SignInPage::default();
    let step = options.step_timeout;
    let driver = session.driver();

    session.wait(&page.initial_view, "Sign In Page", step).await?;
    info!("sign-in page found");

    match session.wait(&page.email, "Sign In Email Field", step).await {
        Ok(_) => {}
        Err(err) if err.is_timeout() => {
            let chooser = Selector::css_with_text("p", credentials.user.as_str());
            session
                .click_when_clickable(&chooser, "Account Chooser", Some(options.chooser_timeout))
                .await?;
            info!(user = %credentials.user, "account chosen");
            return Ok(SignInOutcome::AccountChosen);
        }
        Err(err) => return Err(err),
    }

    session.wait(&page.email_next, "Sign In Next Button", step).await?;
    driver.send_keys(&page.email, &credentials.user).await?;
    driver.click(&page.email_next).await?;

    session.wait(&page.password, "Sign In Password Field", step).await?;
    driver.send_keys(&page.password, &credentials.password).await?;
    driver.click(&page.password_next).await?;
    info!("credentials submitted");

    match session
        .wait(&page.challenge, "Verify it's you page", Some(options.challenge_timeout))
        .await
    {
        Ok(_) => {}
        Err(err) if err.is_timeout() => return Ok(SignInOutcome::SignedIn),
        Err(err) => return Err(err),
    }
    info!("verification challenge found");

    let city = credentials
        .city
        .as_deref()
        .ok_or_else(|| SettleError::config(format!("city challenge shown but {ENV_CITY} is not set")))?;
    session
        .click_when_clickable(&page.city_challenge, CITY_CHALLENGE_TEXT, step)
        .await?;
    session.wait(&page.answer, "Challenge answer field", step).await?;
    driver.send_keys(&page.answer, city).await?;
    driver.submit(&page.answer).await?;
    info!("verification challenge answered");
    Ok(SignInOutcome::ChallengeAnswered)
}
