//! Wait-image command handler

use crate::commands::WaitImageArgs;
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use std::time::Duration;

/// Convergence deadline requested on the command line
#[must_use]
pub fn requested_timeout(args: &WaitImageArgs) -> Option<Duration> {
    args.timeout.map(Duration::from_millis)
}

/// Execute the wait-image command
#[cfg(feature = "browser")]
pub async fn execute_wait_image(
    config: &CliConfig,
    args: &WaitImageArgs,
) -> CliResult<settle::ConvergenceReport> {
    use crate::config::load_settle_config;
    use crate::output::ProgressReporter;
    use settle::{Act, Browser, BrowserConfig, Session};
    use std::sync::Arc;

    if !args.reference.is_file() {
        return Err(CliError::invalid_argument(format!(
            "reference image not found: {}",
            args.reference.display()
        )));
    }
    if args.timeout == Some(0) {
        return Err(CliError::invalid_argument("timeout must be positive"));
    }

    let settle_config = load_settle_config(args.file.as_deref())?;
    let comparator = super::comparator_for(args.tool)?;

    let mut reporter =
        ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    reporter.info(&format!("comparing with {}", comparator.name()));
    reporter.start_spinner(&format!("loading {}", args.url));

    let browser = Browser::launch(BrowserConfig::default().with_headless(!args.headed)).await?;
    let result = async {
        let driver = browser.new_driver().await?;
        driver.navigate(&args.url).await?;
        reporter.set_message(&format!("waiting for {}", args.reference.display()));
        let session = Session::new(Arc::new(driver), settle_config).with_comparator(comparator);
        session
            .wait_for_screen_image(&args.reference, requested_timeout(args))
            .await
    }
    .await;
    reporter.finish();

    if let Err(e) = browser.close().await {
        tracing::warn!(error = %e, "browser did not close cleanly");
    }

    match result {
        Ok(report) => {
            reporter.convergence(report.attempts, report.final_score, report.elapsed);
            Ok(report)
        }
        Err(e) => {
            reporter.failure(&e.to_string());
            Err(e.into())
        }
    }
}

/// Execute the wait-image command
#[cfg(not(feature = "browser"))]
#[allow(clippy::unused_async)]
pub async fn execute_wait_image(_config: &CliConfig, _args: &WaitImageArgs) -> CliResult<()> {
    Err(CliError::config(
        "Browser control not enabled. Rebuild with --features browser",
    ))
}
