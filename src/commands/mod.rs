//! CLI command handlers.
//!
//! Each submodule handles one `siliso` command:
//! - `build` - select a kernel and assemble the image
//! - `run` - boot the image interactively
//! - `test` - native or emulated test runs
//! - `preflight` - check host tools and bootloader files
//! - `show` - display configuration and artifact state
//! - `clean` - remove the output directory

pub mod build;
pub mod clean;
mod preflight;
mod run;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use preflight::cmd_preflight;
pub use run::cmd_run;
pub use show::cmd_show;
pub use test::cmd_test;
