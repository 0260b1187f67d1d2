//! Config command handler

use crate::commands::ConfigArgs;
use crate::config::load_settle_config;
use crate::error::CliResult;
use settle::SettleConfig;

/// Execute the config command: print the effective configuration as YAML
pub fn execute_config(args: &ConfigArgs) -> CliResult<()> {
    print!("{}", render_config(args)?);
    Ok(())
}

/// Effective configuration rendered as YAML
pub fn render_config(args: &ConfigArgs) -> CliResult<String> {
    let config: SettleConfig = load_settle_config(args.file.as_deref())?;
    tracing::debug!(file = ?args.file, "loaded settle config");
    Ok(config.to_yaml()?)
}
