//! Command handlers - extracted from main.rs for testability
//!
//! Each handler module contains:
//! - The execution logic for a CLI command
//! - Pure helper functions
//! - Tests

pub mod compare;
pub mod config;
pub mod wait_image;

pub use compare::execute_compare;
pub use config::execute_config;
pub use wait_image::execute_wait_image;

use crate::commands::ToolArg;
use crate::error::CliResult;
use settle::{Comparator, MagickComparator};
use std::sync::Arc;

/// Comparator backing a `--tool` choice
pub fn comparator_for(tool: ToolArg) -> CliResult<Arc<dyn Comparator>> {
    match tool {
        ToolArg::Magick => Ok(Arc::new(MagickComparator::new())),
        #[cfg(feature = "media")]
        ToolArg::Pixel => Ok(Arc::new(settle::PixelComparator::new())),
        #[cfg(not(feature = "media"))]
        ToolArg::Pixel => Err(crate::error::CliError::config(
            "pixel comparison not enabled. Rebuild with --features media",
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_magick_backend() {
        assert_eq!(comparator_for(ToolArg::Magick).unwrap().name(), "imagemagick");
    }

    #[cfg(feature = "media")]
    #[test]
    fn test_pixel_backend() {
        assert!(comparator_for(ToolArg::Pixel).is_ok());
    }
}
