//! Siliso library exports for testing.
//!
//! The binary is a thin CLI over these modules; integration tests drive
//! them directly with fake bootloader files and fake host tools.

pub mod artifact;
pub mod commands;
pub mod config;
pub mod digest;
pub mod error;
pub mod iso;
pub mod manifest;
pub mod orchestrator;
pub mod preflight;
pub mod process;
pub mod qemu;
pub mod timing;

pub use error::{PipelineError, PipelineResult};
