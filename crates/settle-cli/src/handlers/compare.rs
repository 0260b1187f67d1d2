//! Compare command handler

use super::comparator_for;
use crate::commands::CompareArgs;
use crate::config::{load_settle_config, CliConfig};
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use std::path::Path;

/// Outcome of one comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareOutcome {
    /// Dissimilarity score
    pub score: f64,
    /// Threshold the score was judged against
    pub threshold: f64,
}

impl CompareOutcome {
    /// Score is strictly below the threshold
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.score < self.threshold
    }
}

/// Execute the compare command
///
/// Prints the score on stdout and the verdict on stderr. With `--check` a
/// score at or above the threshold is an error.
pub async fn execute_compare(config: &CliConfig, args: &CompareArgs) -> CliResult<CompareOutcome> {
    require_file(&args.actual)?;
    require_file(&args.reference)?;

    let settle_config = load_settle_config(args.file.as_deref())?;
    let threshold = args
        .threshold
        .unwrap_or(settle_config.convergence_threshold);
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(CliError::invalid_argument(format!(
            "threshold must be a positive number, got {threshold}"
        )));
    }

    let comparator = comparator_for(args.tool)?;
    tracing::debug!(
        tool = comparator.name(),
        actual = %args.actual.display(),
        reference = %args.reference.display(),
        "comparing images"
    );
    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    if config.verbosity.is_verbose() {
        reporter.info(&describe_comparison(comparator.name(), args));
    }
    let score = comparator.compare(&args.actual, &args.reference).await?;
    let outcome = CompareOutcome { score, threshold };

    println!("{score}");
    reporter.verdict(score, threshold);

    if args.check && !outcome.is_match() {
        return Err(CliError::Mismatch { score, threshold });
    }
    Ok(outcome)
}

/// One-line summary of what is being compared and how
#[must_use]
pub fn describe_comparison(tool: &str, args: &CompareArgs) -> String {
    format!(
        "comparing {} against {} with {tool}",
        args.actual.display(),
        args.reference.display()
    )
}

fn require_file(path: &Path) -> CliResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::invalid_argument(format!(
            "image not found: {}",
            path.display()
        )))
    }
}
