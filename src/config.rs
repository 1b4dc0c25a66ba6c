//! Configuration management for siliso.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

/// File name of the assembled image inside the output directory.
pub const ISO_FILENAME: &str = "silicium.iso";

/// Name the bootloader configuration expects the kernel under.
pub const KERNEL_ISO_PATH: &str = "boot/silicium";

/// Architecture every kernel build targets.
pub const TARGET_ARCH: &str = "x86_64";

pub const DEFAULT_PASS_MARKERS: &str = "Silicium booted successfully!";
pub const DEFAULT_FAIL_MARKERS: &str = "panicked at|System halted";

/// Siliso configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Kernel cargo workspace (default: parent of the siliso crate)
    pub kernel_dir: PathBuf,
    /// Cargo target directory holding the kernel builds
    pub target_dir: PathBuf,
    /// Target triple the kernel is compiled for
    pub kernel_target: String,
    /// File name of the kernel executable
    pub kernel_name: String,
    /// Directory holding the Limine binaries and limine.cfg
    pub bootloader_dir: PathBuf,
    /// Where the image and work directories go
    pub output_dir: PathBuf,
    pub xorriso: String,
    pub limine_tool: String,
    pub qemu: String,
    pub qemu_memory: String,
    pub qemu_smp: u32,
    /// Explicit OVMF firmware, otherwise auto-detected
    pub ovmf_code: Option<PathBuf>,
    pub test_timeout: Duration,
    pub pass_markers: Vec<String>,
    pub fail_markers: Vec<String>,
    /// Crate whose unit tests `test native` runs
    pub native_test_package: String,
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                vars.insert(key, value);
                            }
                            Err(e) => {
                                warn!("ignoring malformed line in {}: {}", env_path.display(), e)
                            }
                        }
                    }
                }
                Err(e) => warn!("could not read {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file
        vars.extend(std::env::vars());

        Self::from_vars(base_dir, &vars)
    }

    /// Resolve configuration from an explicit variable map.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let path = |key: &str, default: &Path| {
            get(key)
                .map(|s| resolve(base_dir, Path::new(s)))
                .unwrap_or_else(|| default.to_path_buf())
        };

        let kernel_dir = path("KERNEL_DIR", &base_dir.join(".."));
        let target_dir = path("CARGO_TARGET_DIR", &kernel_dir.join("target"));

        let qemu_smp = match get("QEMU_SMP").map(str::parse::<u32>) {
            Some(Ok(n)) if n > 0 => n,
            Some(_) => {
                warn!("QEMU_SMP must be a positive integer, using 4");
                4
            }
            None => 4,
        };

        let test_timeout = match get("TEST_TIMEOUT").map(str::parse::<u64>) {
            Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
            Some(_) => {
                warn!("TEST_TIMEOUT must be a positive number of seconds, using 60");
                Duration::from_secs(60)
            }
            None => Duration::from_secs(60),
        };

        Self {
            target_dir,
            kernel_target: get("KERNEL_TARGET").unwrap_or("x86_64-unknown-none").to_string(),
            kernel_name: get("KERNEL_NAME").unwrap_or("silicium").to_string(),
            bootloader_dir: path("LIMINE_DIR", &base_dir.join("limine")),
            output_dir: path("OUTPUT_DIR", &base_dir.join("output")),
            xorriso: get("XORRISO").unwrap_or("xorriso").to_string(),
            limine_tool: get("LIMINE_TOOL").unwrap_or("limine").to_string(),
            qemu: get("QEMU").unwrap_or("qemu-system-x86_64").to_string(),
            qemu_memory: get("QEMU_MEMORY").unwrap_or("512M").to_string(),
            qemu_smp,
            ovmf_code: get("OVMF_CODE").map(|s| resolve(base_dir, Path::new(s))),
            test_timeout,
            pass_markers: split_markers(get("PASS_MARKERS").unwrap_or(DEFAULT_PASS_MARKERS)),
            fail_markers: split_markers(get("FAIL_MARKERS").unwrap_or(DEFAULT_FAIL_MARKERS)),
            native_test_package: get("NATIVE_TEST_PACKAGE").unwrap_or("silicium-sync").to_string(),
            kernel_dir,
        }
    }

    /// Canonical path of the assembled image.
    pub fn iso_path(&self) -> PathBuf {
        self.output_dir.join(ISO_FILENAME)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  KERNEL_DIR:          {}", self.kernel_dir.display());
        println!("  CARGO_TARGET_DIR:    {}", self.target_dir.display());
        println!("  KERNEL_TARGET:       {}", self.kernel_target);
        println!("  KERNEL_NAME:         {}", self.kernel_name);
        println!("  LIMINE_DIR:          {}", self.bootloader_dir.display());
        println!("  OUTPUT_DIR:          {}", self.output_dir.display());
        println!("  XORRISO:             {}", self.xorriso);
        println!("  LIMINE_TOOL:         {}", self.limine_tool);
        println!("  QEMU:                {}", self.qemu);
        println!("  QEMU_MEMORY:         {}", self.qemu_memory);
        println!("  QEMU_SMP:            {}", self.qemu_smp);
        match &self.ovmf_code {
            Some(p) => println!("  OVMF_CODE:           {}", p.display()),
            None => println!("  OVMF_CODE:           (auto-detect)"),
        }
        println!("  TEST_TIMEOUT:        {}s", self.test_timeout.as_secs());
        println!("  PASS_MARKERS:        {}", self.pass_markers.join("|"));
        println!("  FAIL_MARKERS:        {}", self.fail_markers.join("|"));
        println!("  NATIVE_TEST_PACKAGE: {}", self.native_test_package);
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn split_markers(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}
