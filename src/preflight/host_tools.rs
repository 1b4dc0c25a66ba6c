//! Host tool availability checks.

use crate::config::Config;
use crate::process;
use crate::qemu::find_ovmf;

use super::types::CheckResult;

/// Check that required and optional host tools resolve.
pub fn check_host_tools(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    // (program, package hint, purpose)
    let required = [
        (config.xorriso.as_str(), "xorriso", "masters the ISO"),
        (config.limine_tool.as_str(), "limine", "installs the BIOS boot record"),
        (config.qemu.as_str(), "qemu-system-x86", "runs emulated tests"),
    ];
    for (tool, package, purpose) in required {
        results.push(check_tool(tool, package, purpose, true));
    }

    let optional = [
        ("cargo", "rustup", "needed for `siliso test native`"),
        ("rustc", "rustup", "reports the host triple for native tests"),
    ];
    for (tool, package, purpose) in optional {
        results.push(check_tool(tool, package, purpose, false));
    }

    results.push(check_ovmf(config));
    results
}

fn check_tool(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, path.display().to_string()),
        None => {
            let msg = format!("not found. Install '{}'; it {}", package, purpose);
            if required {
                CheckResult::fail(tool, msg)
            } else {
                CheckResult::warn(tool, msg)
            }
        }
    }
}

fn check_ovmf(config: &Config) -> CheckResult {
    let name = "OVMF firmware";
    match &config.ovmf_code {
        Some(path) if path.is_file() => {
            CheckResult::pass_with(name, path.display().to_string())
        }
        Some(path) => CheckResult::warn(
            name,
            format!(
                "OVMF_CODE points to {} which does not exist; --uefi will fail",
                path.display()
            ),
        ),
        None => match find_ovmf() {
            Some(path) => CheckResult::pass_with(name, path.display().to_string()),
            None => CheckResult::warn(name, "not found; --uefi needs edk2-ovmf or OVMF_CODE"),
        },
    }
}
