//! Clean command - removes build outputs.

use std::fs;

use anyhow::{Context, Result};

use crate::config::Config;

/// Remove the output directory: the image, its checksum and any
/// work directories left by an interrupted build.
pub fn cmd_clean(config: &Config) -> Result<()> {
    let out = &config.output_dir;
    if out.exists() {
        println!("Removing {}...", out.display());
        fs::remove_dir_all(out).with_context(|| format!("Failed to remove {}", out.display()))?;
        println!("Clean complete.");
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}
