//! Preflight checks.
//!
//! Validates host tools, bootloader files and the output directory before
//! anything is built. Run with `siliso preflight`.

mod environment;
mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::manifest::BootManifest;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(config));

    println!("Checking bootloader files in {}...", config.bootloader_dir.display());
    checks.extend(environment::check_bootloader_files(config, &BootManifest::default()));

    println!("Checking output directory...");
    checks.push(environment::check_output_dir(config));

    println!();
    PreflightReport { checks }
}

/// Run preflight and bail if any check fails.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above first.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn test_missing_bootloader_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = HashMap::new();
        vars.insert("XORRISO".to_string(), "sh".to_string());
        vars.insert("LIMINE_TOOL".to_string(), "sh".to_string());
        vars.insert("QEMU".to_string(), "sh".to_string());
        let config = Config::from_vars(dir.path(), &vars);

        let report = run_preflight(&config);
        assert!(!report.all_passed());
        assert!(report.checks.iter().any(|c| {
            c.name.starts_with("boot/limine/limine.cfg") && c.status == CheckStatus::Fail
        }));
        assert_eq!(report.find("sh").map(|c| c.status), Some(CheckStatus::Pass));
        assert_eq!(
            report.find("output dir writable").map(|c| c.status),
            Some(CheckStatus::Pass)
        );
    }

    #[test]
    fn test_complete_bootloader_dir_passes() {
        let dir = tempfile::tempdir().unwrap();
        let limine = dir.path().join("limine");
        fs::create_dir_all(&limine).unwrap();
        for file in [
            "limine-bios.sys",
            "limine-bios-cd.bin",
            "limine-uefi-cd.bin",
            "BOOTX64.EFI",
            "limine.cfg",
        ] {
            fs::write(limine.join(file), b"blob").unwrap();
        }
        let config = Config::from_vars(dir.path(), &HashMap::new());

        let checks = environment::check_bootloader_files(&config, &BootManifest::default());
        assert_eq!(checks.len(), 5);
        assert!(checks.iter().all(|c| c.status == CheckStatus::Pass));
    }
}
