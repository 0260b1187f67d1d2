//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Settle: screen comparison and convergence waits from the shell
#[derive(Parser, Debug)]
#[command(name = "settle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score how far a screenshot is from a reference image
    Compare(CompareArgs),

    /// Print the effective timing configuration as YAML
    Config(ConfigArgs),

    /// Load a page and wait until it matches a reference image
    ///
    /// Requires the `browser` feature and a local Chromium.
    WaitImage(WaitImageArgs),
}

/// Image comparison backend
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolArg {
    /// ImageMagick `compare -metric MSE`
    #[default]
    Magick,
    /// In-process pixel MSE
    Pixel,
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Captured image
    pub actual: PathBuf,

    /// Reference image
    pub reference: PathBuf,

    /// Comparison backend
    #[arg(short, long, default_value = "magick")]
    pub tool: ToolArg,

    /// Score the images must stay under (defaults to the config threshold)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Exit with failure when the score is not below the threshold
    #[arg(long)]
    pub check: bool,

    /// Timing configuration file (YAML or JSON)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Configuration file to load and validate (YAML or JSON)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Arguments for the wait-image command
#[derive(Parser, Debug)]
pub struct WaitImageArgs {
    /// Page to load
    #[arg(long)]
    pub url: String,

    /// Reference image the page must converge to
    #[arg(long)]
    pub reference: PathBuf,

    /// Convergence deadline in milliseconds (defaults to the config value)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Comparison backend
    #[arg(short, long, default_value = "magick")]
    pub tool: ToolArg,

    /// Timing configuration file (YAML or JSON)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

/// Color output argument
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
