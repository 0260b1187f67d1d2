//! Settle CLI: screen comparison and convergence waits
//!
//! ## Usage
//!
//! ```bash
//! settle compare shot.png reference.png          # Print the MSE score
//! settle compare shot.png reference.png --check  # Fail unless score < threshold
//! settle config --file settle.yaml               # Show effective timing config
//! settle wait-image --url http://localhost:8080 --reference home.png
//! ```

use clap::Parser;
use settle_cli::{
    handlers::{execute_compare, execute_config, execute_wait_image},
    logging, Cli, CliConfig, CliError, CliResult, ColorChoice, Commands, Verbosity,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();

    // Build configuration from CLI args
    let config = build_config(&cli);
    logging::init(&config);

    match cli.command {
        Commands::Compare(args) => {
            let rt = runtime()?;
            rt.block_on(execute_compare(&config, &args)).map(|_| ())
        }
        Commands::Config(args) => execute_config(&args),
        Commands::WaitImage(args) => {
            let rt = runtime()?;
            rt.block_on(execute_wait_image(&config, &args)).map(|_| ())
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else {
        match cli.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    };

    let color: ColorChoice = cli.color.clone().into();

    CliConfig::new()
        .with_verbosity(verbosity)
        .with_color(color)
        .with_log_json(cli.log_json)
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::runtime(format!("Failed to create tokio runtime: {e}")))
}
