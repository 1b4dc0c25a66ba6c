//! Run command - build, then boot in QEMU attached to the terminal.

use anyhow::{Context, Result};

use crate::artifact::BuildProfile;
use crate::config::Config;
use crate::qemu::{self, BootFirmware};

use super::build::cmd_build;

/// Execute the run command.
pub fn cmd_run(config: &Config, uefi: bool, profile: Option<BuildProfile>) -> Result<()> {
    let image = cmd_build(config, profile)?;
    let firmware = if uefi {
        BootFirmware::uefi(config)?
    } else {
        BootFirmware::Bios
    };

    let status =
        qemu::run_interactive(config, &image.path, firmware).context("Failed to run QEMU")?;
    if !status.success() {
        println!("QEMU exited with {}", status);
    }
    Ok(())
}
