//! Build command - select a kernel and assemble the bootable image.

use anyhow::{Context, Result};

use crate::artifact::BuildProfile;
use crate::config::Config;
use crate::iso::BootableImage;
use crate::orchestrator::Orchestrator;

/// Execute the build command.
pub fn cmd_build(config: &Config, profile: Option<BuildProfile>) -> Result<BootableImage> {
    let image = Orchestrator::new(config)
        .build_image(profile)
        .context("Failed to build the boot image")?;

    println!();
    println!("Built {}", image.path.display());
    println!("  kernel:   {} ({})", image.kernel.path.display(), image.kernel.profile);
    println!("  files:    {}", image.staged.len());
    println!("  sha256:   {}", image.sha256);
    Ok(image)
}
