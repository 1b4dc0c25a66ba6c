//! Bootloader files and output directory checks.

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::manifest::BootManifest;

use super::types::CheckResult;

/// Every bootloader file the manifest stages must be present.
pub fn check_bootloader_files(config: &Config, manifest: &BootManifest) -> Vec<CheckResult> {
    manifest
        .bootloader_entries()
        .map(|entry| {
            let source = manifest.source_path(entry, &config.bootloader_dir, Path::new(""));
            let name = format!("{} ({})", entry.destination, entry.role);
            match fs::metadata(&source) {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    CheckResult::pass_with(&name, format!("{} bytes", meta.len()))
                }
                Ok(meta) if meta.is_file() => {
                    CheckResult::fail(&name, format!("{} is empty", source.display()))
                }
                _ => CheckResult::fail(&name, format!("{} not found", source.display())),
            }
        })
        .collect()
}

/// The output directory must exist or be creatable, and be writable.
pub fn check_output_dir(config: &Config) -> CheckResult {
    let name = "output dir writable";
    let out = &config.output_dir;

    if let Err(e) = fs::create_dir_all(out) {
        return CheckResult::fail(name, format!("cannot create {}: {}", out.display(), e));
    }

    match tempfile::Builder::new().prefix(".preflight-").tempfile_in(out) {
        Ok(_scratch) => CheckResult::pass_with(name, out.display().to_string()),
        Err(e) => CheckResult::fail(name, format!("cannot write to {}: {}", out.display(), e)),
    }
}
